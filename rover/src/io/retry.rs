//! Uniform retry policy for remote calls.
//!
//! Queries are safe to repeat and retry on any transient error. Actions have
//! side effects, so they only retry when the remote rejected the request before
//! processing it (rate limiting). A timed-out action is never re-issued: it may
//! already have happened.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::io::clock::Clock;
use crate::io::remote::{ErrorClass, RemoteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Query,
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
        }
    }
}

impl RetryConfig {
    fn retryable(&self, kind: CallKind, err: &RemoteError) -> bool {
        match kind {
            CallKind::Query => matches!(
                err,
                RemoteError::RateLimited | RemoteError::Timeout | RemoteError::Transport(_)
            ),
            CallKind::Action => matches!(err, RemoteError::RateLimited),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub fn call<T, C, F>(&self, clock: &C, kind: CallKind, name: &str, mut op: F) -> Result<T, RemoteError>
    where
        C: Clock + ?Sized,
        F: FnMut() -> Result<T, RemoteError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && self.retryable(kind, &err) => {
                    debug!(call = name, attempt, error = %err, "retrying remote call");
                    clock.sleep(Duration::from_millis(self.delay_ms));
                    attempt += 1;
                }
                Err(err) => {
                    if err.class() != ErrorClass::Phase {
                        warn!(call = name, attempt, error = %err, "remote call failed");
                    }
                    return Err(err);
                }
            }
        }
    }
}
