//! Autonomous control loop for a location-based automation agent.
//!
//! The agent walks a virtual position around a map, spins stops, engages
//! encounters and keeps its inventory in shape, one tick at a time. The crate
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (routing, movement, capture and
//!   triage decisions). No I/O; time and randomness come in as arguments.
//! - **[`io`]**: Side effects (the remote service, the clock, `.rover/` files).
//!   Everything behind a trait so tests can swap in fakes.
//!
//! Orchestration modules ([`tick`], [`engage`], [`inventory`], [`looping`])
//! combine the two into the session loop the CLI runs.

pub mod core;
pub mod engage;
pub mod exit_codes;
pub mod inventory;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tick;
