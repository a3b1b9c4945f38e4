//! Multi-tick session loop for `rover simulate`.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::core::backoff::Backoff;
use crate::io::cells::CellIndex;
use crate::io::clock::Clock;
use crate::io::init::RoverPaths;
use crate::io::remote::RemoteService;
use crate::io::session_store::write_session;
use crate::io::tick_log::{TickSummary, append_tick};
use crate::tick::{Session, TickError};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The remote session expired; the caller should re-authenticate.
    AuthExpired,
    /// `max_ticks` attempts were made.
    TickLimit,
    /// `should_stop` returned true between ticks.
    Stopped,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub ticks_run: u64,
    pub throttled: u64,
    pub stop: LoopStop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopOptions {
    /// Tick attempts before stopping; throttled attempts count. `None` runs until stopped.
    pub max_ticks: Option<u64>,
}

impl LoopOptions {
    fn reached(&self, attempts: u64) -> bool {
        self.max_ticks.is_some_and(|max| attempts >= max)
    }
}

/// Run ticks until the tick limit, a cooperative stop, or auth loss.
///
/// After each completed tick the snapshot and tick log are written; a failed
/// write is logged and the loop carries on. Throttled ticks sleep on the
/// backoff schedule instead of the tick interval.
pub fn run_loop<R, C, I, S, F>(
    session: &mut Session<'_, R, C, I>,
    paths: &RoverPaths,
    options: &LoopOptions,
    mut should_stop: S,
    mut on_tick: F,
) -> LoopOutcome
where
    R: RemoteService,
    C: Clock,
    I: CellIndex,
    S: FnMut() -> bool,
    F: FnMut(&TickSummary),
{
    let clock = session.clock();
    let config = session.config();
    let mut backoff = Backoff::new(&config.backoff);
    let mut ticks_run = 0u64;
    let mut throttled = 0u64;

    let stop = loop {
        if should_stop() {
            break LoopStop::Stopped;
        }
        if options.reached(ticks_run + throttled) {
            break LoopStop::TickLimit;
        }

        let wait = match session.run_tick() {
            Ok(summary) => {
                backoff.reset();
                ticks_run += 1;
                persist(session, paths, Some(&summary));
                on_tick(&summary);
                Duration::from_secs(config.tick_interval_secs)
            }
            Err(TickError::Throttled(err)) => {
                throttled += 1;
                let delay = backoff.next_delay();
                warn!(
                    error = %err,
                    consecutive = backoff.consecutive(),
                    delay_secs = delay.as_secs(),
                    "tick throttled; backing off"
                );
                delay
            }
            Err(TickError::AuthExpired) => {
                persist(session, paths, None);
                break LoopStop::AuthExpired;
            }
        };

        if !options.reached(ticks_run + throttled) {
            clock.sleep(wait);
        }
    };

    info!(ticks_run, throttled, ?stop, "session loop stopped");
    LoopOutcome {
        ticks_run,
        throttled,
        stop,
    }
}

fn persist<R: RemoteService, C: Clock, I: CellIndex>(
    session: &Session<'_, R, C, I>,
    paths: &RoverPaths,
    summary: Option<&TickSummary>,
) {
    if let Err(err) = write_session(&paths.session_path, &session.snapshot()) {
        error!(error = %format!("{err:#}"), "failed to write session snapshot");
    }
    if let Some(summary) = summary {
        if let Err(err) = append_tick(&paths.tick_log_path, summary, session.trace()) {
            error!(error = %format!("{err:#}"), "failed to append tick log");
        }
    }
}
