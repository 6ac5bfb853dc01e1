//! Keep-latest time-window throttle for progress updates.
//!
//! The first value after a quiet period passes straight through and opens a window of
//! `interval`. Values offered while the window is open replace each other; the latest one
//! is released when the window closes, which opens the next window. The throttle owns no
//! timer: the caller sleeps until [`ProgressThrottle::deadline`] and then calls
//! [`ProgressThrottle::take_due`].

use std::time::Duration;
use tokio::time::Instant;

/// Time-windowed coalescing buffer holding at most one pending value
#[derive(Debug)]
pub struct ProgressThrottle<T> {
    interval: Duration,
    window_end: Option<Instant>,
    pending: Option<T>,
}

impl<T> ProgressThrottle<T> {
    /// Create a throttle releasing at most one value per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_end: None,
            pending: None,
        }
    }

    /// Offer a value observed at `now`
    ///
    /// Returns the value when it may be emitted right away; otherwise it becomes the
    /// pending value, replacing any older one.
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        match self.window_end {
            Some(end) if now < end => {
                self.pending = Some(value);
                None
            }
            _ => {
                self.window_end = Some(now + self.interval);
                self.pending = None;
                Some(value)
            }
        }
    }

    /// When the pending value becomes due, `None` if nothing is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and(self.window_end)
    }

    /// Release the pending value if its window has closed
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        let end = self.window_end?;
        if now < end {
            return None;
        }
        let value = self.pending.take()?;
        self.window_end = Some(now + self.interval);
        Some(value)
    }

    /// Drop the pending value, e.g. when a terminal event overtakes it
    pub fn discard_pending(&mut self) -> Option<T> {
        self.pending.take()
    }
}
