//! Coordinator statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the coordinator's counters.
///
/// All counters only ever increase. Two snapshots can be subtracted to get
/// the activity of an interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Render passes started.
    pub renders_begun: u64,
    /// Render attempts that returned [`Busy`](crate::Busy).
    pub render_busy: u64,
    /// Render attempts that returned a [`TimeoutError`](crate::TimeoutError).
    pub render_timeouts: u64,
    /// Remote operations started.
    pub remote_begun: u64,
    /// Remote attempts that returned [`Busy`](crate::Busy).
    pub remote_busy: u64,
    /// Remote attempts that returned a [`TimeoutError`](crate::TimeoutError).
    pub remote_timeouts: u64,
    /// Async remote attempts that had to poll for a render pass to finish.
    pub remote_render_waits: u64,
}

impl CoordinatorStats {
    /// Counter-wise difference `self - earlier`.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            renders_begun: self.renders_begun.saturating_sub(earlier.renders_begun),
            render_busy: self.render_busy.saturating_sub(earlier.render_busy),
            render_timeouts: self.render_timeouts.saturating_sub(earlier.render_timeouts),
            remote_begun: self.remote_begun.saturating_sub(earlier.remote_begun),
            remote_busy: self.remote_busy.saturating_sub(earlier.remote_busy),
            remote_timeouts: self.remote_timeouts.saturating_sub(earlier.remote_timeouts),
            remote_render_waits: self
                .remote_render_waits
                .saturating_sub(earlier.remote_render_waits),
        }
    }

    /// Render attempts that did not produce a guard.
    #[must_use]
    pub fn render_failures(&self) -> u64 {
        self.render_busy + self.render_timeouts
    }

    /// Remote attempts that did not produce a guard.
    #[must_use]
    pub fn remote_failures(&self) -> u64 {
        self.remote_busy + self.remote_timeouts
    }
}

/// Live counters, bumped with relaxed atomics.
#[derive(Default)]
pub(crate) struct StatCounters {
    pub(crate) renders_begun: AtomicU64,
    pub(crate) render_busy: AtomicU64,
    pub(crate) render_timeouts: AtomicU64,
    pub(crate) remote_begun: AtomicU64,
    pub(crate) remote_busy: AtomicU64,
    pub(crate) remote_timeouts: AtomicU64,
    pub(crate) remote_render_waits: AtomicU64,
}

impl StatCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            renders_begun: self.renders_begun.load(Ordering::Relaxed),
            render_busy: self.render_busy.load(Ordering::Relaxed),
            render_timeouts: self.render_timeouts.load(Ordering::Relaxed),
            remote_begun: self.remote_begun.load(Ordering::Relaxed),
            remote_busy: self.remote_busy.load(Ordering::Relaxed),
            remote_timeouts: self.remote_timeouts.load(Ordering::Relaxed),
            remote_render_waits: self.remote_render_waits.load(Ordering::Relaxed),
        }
    }
}
