//! Sleep schedule for consecutive throttling events.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_secs: u64,
    pub step_secs: u64,
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: 5,
            step_secs: 5,
            max_secs: 120,
        }
    }
}

/// Linear backoff: `base`, `base + step`, `base + 2*step`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    step: Duration,
    max: Duration,
    consecutive: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_secs(config.base_secs),
            step: Duration::from_secs(config.step_secs),
            max: Duration::from_secs(config.max_secs.max(config.base_secs)),
            consecutive: 0,
        }
    }

    /// Delay for the next throttling event; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .step
            .checked_mul(self.consecutive)
            .and_then(|extra| self.base.checked_add(extra))
            .unwrap_or(self.max)
            .min(self.max);
        self.consecutive = self.consecutive.saturating_add(1);
        delay
    }

    /// Back to `base` after a successful tick.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_failures_strictly_increase_then_reset() {
        let mut backoff = Backoff::new(&BackoffConfig::default());
        let delays: Vec<Duration> = (0..3).map(|_| backoff.next_delay()).collect();
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(delays[0], Duration::from_secs(5));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn delay_is_capped() {
        let mut backoff = Backoff::new(&BackoffConfig {
            base_secs: 10,
            step_secs: 50,
            max_secs: 100,
        });
        let delays: Vec<u64> = (0..4).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![10, 60, 100, 100]);
    }
}
