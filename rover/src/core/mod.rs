//! Deterministic, pure logic shared by the agent.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and take time and randomness as arguments, so every
//! decision is reproducible in tests.

pub mod backoff;
pub mod capture;
pub mod geo;
pub mod geofence;
pub mod movement;
pub mod poi_store;
pub mod route;
pub mod triage;
pub mod types;
