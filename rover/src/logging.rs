//! Development-time tracing for the agent.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted.
//!
//! - **Tick log (`io/tick_log`)**: Product artifact in `.rover/ticks.jsonl`.
//!   Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. When unset, defaults to `warn`, or `rover=info` with
/// `verbose`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=rover=debug cargo run -- simulate --ticks 20
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,rover=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
