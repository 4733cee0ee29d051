//! Deferred-work scheduling primitive.
//!
//! Cooperative, single outstanding timer per owner: scheduling again replaces
//! the pending deadline, cancelling clears it. Whoever owns the scheduler
//! (the charger runner on hardware, a mock in tests) fires the work.

use embassy_time::{Duration, Instant};

/// Single-slot deferred work scheduler.
pub trait Scheduler {
    /// Arm the slot to fire `delay` from now, replacing any pending deadline.
    fn schedule_after(&mut self, delay: Duration);

    /// Disarm the slot.
    fn cancel_scheduled(&mut self);
}

/// Scheduler that only records the next deadline.
///
/// The runner polls [`DeadlineSlot::deadline`] and sleeps until it passes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineSlot {
    deadline: Option<Instant>,
}

impl DeadlineSlot {
    /// Create an empty slot.
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Pending deadline, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and return the deadline that was pending.
    pub fn take(&mut self) -> Option<Instant> {
        self.deadline.take()
    }
}

impl Scheduler for DeadlineSlot {
    fn schedule_after(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now().checked_add(delay).unwrap_or(Instant::MAX));
    }

    fn cancel_scheduled(&mut self) {
        self.deadline = None;
    }
}
