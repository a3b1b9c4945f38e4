//! Wall-clock access behind a trait so the loop can be driven by a fake clock.

use std::cell::Cell;
use std::time::Duration;

use crate::core::types::Millis;

pub trait Clock {
    /// Milliseconds since the Unix epoch. Not assumed monotonic.
    fn now_ms(&self) -> Millis;

    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> Millis {
        (**self).now_ms()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Real time via `chrono`, real sleeping via the current thread.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        chrono::Utc::now().timestamp_millis()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Simulated time: sleeping advances the clock instantly.
///
/// Used by `rover simulate` so a long dry run finishes in seconds.
#[derive(Debug)]
pub struct VirtualClock {
    now: Cell<Millis>,
}

impl VirtualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let step = Millis::try_from(duration.as_millis()).unwrap_or(Millis::MAX);
        self.now.set(self.now.get().saturating_add(step));
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> Millis {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn virtual_clock_advances_on_sleep() {
        let clock = VirtualClock::new(1_000);
        clock.sleep(Duration::from_secs(5));
        let by_ref: &dyn Clock = &clock;
        assert_eq!(by_ref.now_ms(), 6_000);
        (&clock).sleep(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 6_250);
    }
}
