//! # Step Scheduler
//!
//! Turns a protocol's "do one step, call me again in N µs" contract into
//! continuous operation.
//!
//! The embedding loop calls [`Scheduler::tick`] more often than the shortest
//! period any protocol asks for. When the armed period has elapsed the step
//! callback runs, and the next deadline is measured from the time the tick
//! actually fired rather than from the nominal due time. A step that returns
//! zero disarms the scheduler.
//!
//! ```
//! use multirf_tx::scheduler::Scheduler;
//!
//! let mut sched = Scheduler::new();
//! sched.schedule(1000, 0);
//!
//! assert!(!sched.tick(999, || 1000));
//! assert!(sched.tick(1000, || 1000));
//! assert_eq!(sched.deadline(), Some(2000));
//! ```

use tracing::warn;

/// Single-owner cooperative timer.
#[derive(Debug, Default, Clone)]
pub struct Scheduler {
    period_us: u32,
    last_event_us: u64,
    late_events: u64,
    fired: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to fire `period_us` after `now_us`.
    ///
    /// Re-arming with the period already in force keeps the existing
    /// reference time, so the cadence set by the last fire is preserved.
    pub fn schedule(&mut self, period_us: u32, now_us: u64) {
        if self.period_us != period_us {
            self.last_event_us = now_us;
            self.period_us = period_us;
        }
    }

    /// Disarms the timer.
    pub fn cancel(&mut self) {
        self.period_us = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.period_us != 0
    }

    /// Absolute time of the next fire, if armed.
    pub fn deadline(&self) -> Option<u64> {
        self.is_armed()
            .then(|| self.last_event_us + u64::from(self.period_us))
    }

    /// Number of fires that happened more than 1.5 periods after the
    /// previous one.
    pub fn late_events(&self) -> u64 {
        self.late_events
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Runs `step` if the armed period has elapsed.
    ///
    /// `step` returns the delay until the next call in microseconds, or zero
    /// to stop. Returns `true` if the step ran.
    pub fn tick<F>(&mut self, now_us: u64, step: F) -> bool
    where
        F: FnOnce() -> u32,
    {
        if self.period_us == 0 {
            return false;
        }

        let elapsed = now_us.saturating_sub(self.last_event_us);
        let period = u64::from(self.period_us);
        if elapsed < period {
            return false;
        }

        if elapsed * 2 > period * 3 {
            self.late_events += 1;
            warn!(
                "Step fired late: {}us elapsed for a {}us period",
                elapsed, period
            );
        }

        self.last_event_us = now_us;
        self.fired += 1;

        match step() {
            0 => self.cancel(),
            next => self.schedule(next, now_us),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_never_fires() {
        let mut sched = Scheduler::new();
        assert!(!sched.tick(1_000_000, || 10));
        assert_eq!(sched.deadline(), None);
    }

    #[test]
    fn test_rearm_from_actual_fire_time() {
        let mut sched = Scheduler::new();
        sched.schedule(1000, 0);

        // fires 300us late; next deadline is measured from 1300, not 1000
        assert!(sched.tick(1300, || 1000));
        assert_eq!(sched.deadline(), Some(2300));
        assert!(!sched.tick(2299, || 1000));
        assert!(sched.tick(2300, || 1000));
    }

    #[test]
    fn test_period_change_resets_reference() {
        let mut sched = Scheduler::new();
        sched.schedule(1000, 0);
        assert!(sched.tick(1000, || 4500));
        assert_eq!(sched.deadline(), Some(5500));
    }

    #[test]
    fn test_zero_delay_cancels() {
        let mut sched = Scheduler::new();
        sched.schedule(500, 0);
        assert!(sched.tick(500, || 0));
        assert!(!sched.is_armed());
        assert!(!sched.tick(10_000, || 500));
    }

    #[test]
    fn test_late_fire_is_counted_not_corrected() {
        let mut sched = Scheduler::new();
        sched.schedule(1000, 0);
        assert!(sched.tick(1500, || 1000));
        assert_eq!(sched.late_events(), 0, "exactly 1.5 periods is not late");
        assert!(sched.tick(3001, || 1000));
        assert_eq!(sched.late_events(), 1);
        assert_eq!(sched.fired(), 2);
        assert_eq!(sched.deadline(), Some(4001));
    }

    #[test]
    fn test_step_runs_once_per_fire() {
        let mut sched = Scheduler::new();
        sched.schedule(100, 0);
        let mut calls = 0;
        for now in (0..=1000).step_by(10) {
            sched.tick(now, || {
                calls += 1;
                100
            });
        }
        assert_eq!(calls, 10);
    }
}
