//! Time sources for the stepping loop
//!
//! The background loop never calls `Instant::now` or `thread::sleep`
//! directly; it goes through a [`Clock`] so tests can run it on virtual time.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock time
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Virtual time: `sleep` returns immediately after moving the clock forward
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    slept: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += duration;
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        self.advance(duration);
    }
}

/// Fixed per-tick budget; no catch-up after an overrun
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePacer {
    budget: Duration,
}

impl FramePacer {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// How long to sleep after a tick that took `elapsed`, `None` on overrun
    pub fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.budget.checked_sub(elapsed).filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_sleeps_for_the_rest_of_the_budget() {
        let pacer = FramePacer::new(Duration::from_millis(20));
        assert_eq!(pacer.remaining(Duration::from_millis(5)), Some(Duration::from_millis(15)));
        assert_eq!(pacer.remaining(Duration::ZERO), Some(Duration::from_millis(20)));
    }

    #[test]
    fn pacer_skips_sleep_on_overrun() {
        let pacer = FramePacer::new(Duration::from_millis(20));
        assert_eq!(pacer.remaining(Duration::from_millis(20)), None);
        assert_eq!(pacer.remaining(Duration::from_millis(35)), None);
    }

    #[test]
    fn manual_clock_does_not_block() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_secs(3600));
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(3601));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3600)]);
    }
}
