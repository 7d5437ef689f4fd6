//! # Permit Gate
//!
//! A counting gate with a fixed capacity that blocking threads and async
//! tasks can wait on at the same time.
//!
//! ```text
//!   blocking thread ──wait_for───> [Condvar] ─┐
//!                                              ├── Mutex<available>
//!   async task ─────notified().await──> [Notify] ─┘
//! ```
//!
//! Every release wakes one waiter of each kind. Whoever loses the race for
//! the permit re-checks and goes back to waiting, so a release is never lost.

use parking_lot::{Condvar, Mutex};
use std::pin::pin;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Counting gate shared between sync and async call sites.
pub(crate) struct PermitGate {
    /// Permits currently available. Never exceeds `capacity`.
    available: Mutex<u32>,
    /// Maximum number of permits.
    capacity: u32,
    /// Wakes blocking waiters.
    released: Condvar,
    /// Wakes async waiters.
    notify: Notify,
}

impl PermitGate {
    /// Creates a gate with every permit available.
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            available: Mutex::new(capacity),
            capacity,
            released: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Number of permits currently available.
    pub(crate) fn available(&self) -> u32 {
        *self.available.lock()
    }

    /// Takes a permit if one is free right now.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut available = self.available.lock();
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    /// Blocks the calling thread for at most `timeout` waiting for a permit.
    pub(crate) fn acquire_blocking(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut available = self.available.lock();
        while *available == 0 {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero()
                || self.released.wait_for(&mut available, remaining).timed_out()
            {
                break;
            }
        }
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    /// Suspends the calling task for at most `timeout` waiting for a permit.
    ///
    /// Must run inside a Tokio runtime with the time driver enabled.
    pub(crate) async fn acquire(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            // Register interest before checking, so a release between the
            // check and the await still wakes us.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if self.try_acquire() {
                return true;
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.try_acquire();
            }
        }
    }

    /// Returns a permit and wakes waiters.
    ///
    /// Refuses (and returns `false`) if every permit is already available,
    /// so a stray release can never push the count past `capacity`.
    pub(crate) fn release(&self) -> bool {
        {
            let mut available = self.available.lock();
            if *available >= self.capacity {
                return false;
            }
            *available += 1;
        }
        self.released.notify_one();
        self.notify.notify_one();
        true
    }
}
