//! # Sync Coordinator
//!
//! Arbitrates between render passes and remote operations that touch the
//! same host-process state from different threads.
//!
//! ## Shared State
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────┐
//!   │                    SyncCoordinator                     │
//!   │                                                        │
//!   │  render_lock: Mutex<()>      one render pass at a time │
//!   │  rendering:   AtomicBool     written under render_lock │
//!   │  remote:      PermitGate(1)  one remote op at a time   │
//!   │  timeout_ms:  AtomicU64      read by every acquisition │
//!   └────────────────────────────────────────────────────────┘
//!          ▲                                  ▲
//!          │ try_begin_render                 │ try_begin_remote_operation
//!          │ begin_render                     │ begin_remote_operation_async
//!     Render thread                     Remote-call threads
//! ```
//!
//! ## Exclusion Guarantees
//!
//! | Pair             | Guarantee                                           |
//! |------------------|-----------------------------------------------------|
//! | render / render  | strict (mutex)                                      |
//! | remote / remote  | strict (single permit)                              |
//! | render / remote  | sync path: one point-in-time check, best effort     |
//! | render / remote  | async path: polled every 5ms, bounded staleness     |
//!
//! Callers that need the render/remote guarantee must use the async path.
//!
//! ## Timeouts
//!
//! Every acquisition waits at most `timeout` for each resource it needs.
//! The async remote gate needs two (the permit, then an idle renderer), so its
//! worst case is `2 × timeout`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = SyncCoordinator::shared(SyncConfig::default());
//!
//! // Render thread, once per frame
//! match coordinator.try_begin_render() {
//!     Ok(_frame) => draw_overlay(),
//!     Err(_) => {} // skip this frame
//! }
//!
//! // Remote-call task
//! let _op = coordinator.begin_remote_operation_async().await?;
//! write_host_memory();
//! ```

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::config::{SyncConfig, RENDER_POLL_INTERVAL};
use crate::error::{Busy, TimeoutError};
use crate::guard::{RemoteGuard, RenderGuard};
use crate::permit::PermitGate;
use crate::stats::{CoordinatorStats, StatCounters};

/// Process-wide instance behind [`SyncCoordinator::global`].
static GLOBAL: OnceLock<SyncCoordinator> = OnceLock::new();

/// Capacity of the remote-operation gate.
const REMOTE_PERMITS: u32 = 1;

/// Timeout-bounded gate between render passes and remote operations.
///
/// Share one instance per process, either through an [`Arc`] from
/// [`shared`](Self::shared) or through [`global`](Self::global).
pub struct SyncCoordinator {
    /// Held for the whole render pass. Not reentrant.
    render_lock: Mutex<()>,
    /// True only while a [`RenderGuard`] is live. Read without locking.
    rendering: AtomicBool,
    /// Paired with `render_idle` for [`wait_for_render_idle`](Self::wait_for_render_idle).
    idle_lock: Mutex<()>,
    /// Broadcast when a render pass ends.
    render_idle: Condvar,
    /// Single permit for remote operations.
    remote: PermitGate,
    /// Budget for each wait, in milliseconds.
    timeout_ms: AtomicU64,
    /// Outcome counters.
    stats: StatCounters,
}

impl SyncCoordinator {
    /// Creates a coordinator with an idle renderer and a free remote permit.
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self {
            render_lock: Mutex::new(()),
            rendering: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            render_idle: Condvar::new(),
            remote: PermitGate::new(REMOTE_PERMITS),
            timeout_ms: AtomicU64::new(config.timeout_ms),
            stats: StatCounters::default(),
        }
    }

    /// Creates a coordinator ready to hand to several threads.
    #[must_use]
    pub fn shared(config: SyncConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// The process-wide coordinator, created with defaults on first use.
    ///
    /// Lives until the process exits.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::new(SyncConfig::default()))
    }

    /// Creates the process-wide coordinator with `config`.
    ///
    /// Only the first initialisation wins. If the global already exists,
    /// `config` is ignored and the existing instance is returned.
    pub fn init_global(config: SyncConfig) -> &'static Self {
        let mut created = false;
        let global = GLOBAL.get_or_init(|| {
            created = true;
            Self::new(config)
        });
        if created {
            tracing::debug!("Global coordinator created with timeout {}ms", config.timeout_ms);
        } else {
            tracing::debug!(
                "Global coordinator already exists, ignoring timeout {}ms",
                config.timeout_ms
            );
        }
        global
    }

    // =========================================================================
    // Configuration & queries
    // =========================================================================

    /// Current budget for each wait.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Sets the budget for each wait. Applies to the next acquisition, not to
    /// waits already in progress.
    pub fn set_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.set_timeout_ms(millis);
    }

    /// Sets the budget for each wait, in milliseconds.
    #[inline]
    pub fn set_timeout_ms(&self, timeout_ms: u64) {
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    /// Whether a render pass is in flight.
    ///
    /// Never blocks. Advisory outside the gates: the answer may already be
    /// stale when the caller looks at it.
    #[inline]
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::Acquire)
    }

    /// Remote permits currently free (0 or 1).
    #[must_use]
    pub fn remote_permits_available(&self) -> u32 {
        self.remote.available()
    }

    /// Snapshot of the outcome counters.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.snapshot()
    }

    /// Blocks for at most `timeout` until no render pass is in flight.
    ///
    /// Returns `true` if the renderer was idle by the time this returned.
    pub fn wait_for_render_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut idle = self.idle_lock.lock();
        while self.is_rendering() {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() || self.render_idle.wait_for(&mut idle, remaining).timed_out() {
                break;
            }
        }
        !self.is_rendering()
    }

    // =========================================================================
    // Render gate
    // =========================================================================

    /// Starts a render pass, waiting at most [`timeout`](Self::timeout) for
    /// the render lock.
    ///
    /// # Errors
    ///
    /// Returns [`Busy::RenderLock`] if another render pass kept the lock for
    /// the whole timeout. Nothing changes in that case.
    pub fn try_begin_render(&self) -> Result<RenderGuard<'_>, Busy> {
        let timeout = self.timeout();
        match self.render_lock.try_lock_for(timeout) {
            Some(lock) => Ok(self.start_render(lock)),
            None => {
                StatCounters::bump(&self.stats.render_busy);
                tracing::trace!("Render lock busy after {}ms, skipping frame", timeout.as_millis());
                Err(Busy::RenderLock { waited: timeout })
            }
        }
    }

    /// Starts a render pass, treating contention as an error.
    ///
    /// Same acquisition as [`try_begin_render`](Self::try_begin_render), for
    /// call sites where a missed frame is an application-visible failure.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::RenderLock`] after logging a warning.
    pub fn begin_render(&self) -> Result<RenderGuard<'_>, TimeoutError> {
        let timeout = self.timeout();
        match self.render_lock.try_lock_for(timeout) {
            Some(lock) => Ok(self.start_render(lock)),
            None => {
                StatCounters::bump(&self.stats.render_timeouts);
                tracing::warn!("Timed out after {}ms acquiring render lock", timeout.as_millis());
                Err(TimeoutError::RenderLock { waited: timeout })
            }
        }
    }

    /// Runs `frame` as a render pass.
    ///
    /// The pass ends when `frame` returns or unwinds.
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] without running `frame` if the lock was not acquired.
    pub fn try_render<R>(&self, frame: impl FnOnce() -> R) -> Result<R, Busy> {
        let _pass = self.try_begin_render()?;
        Ok(frame())
    }

    fn start_render<'a>(&'a self, lock: MutexGuard<'a, ()>) -> RenderGuard<'a> {
        self.rendering.store(true, Ordering::Release);
        StatCounters::bump(&self.stats.renders_begun);
        RenderGuard::new(self, lock)
    }

    /// Ends a render pass. Called once per guard.
    pub(crate) fn end_render(&self, lock: MutexGuard<'_, ()>) {
        // Publish idle while still holding the render lock.
        self.rendering.store(false, Ordering::Release);
        drop(lock);

        let _idle = self.idle_lock.lock();
        self.render_idle.notify_all();
    }

    // =========================================================================
    // Remote-operation gate
    // =========================================================================

    /// Starts a remote operation if the permit frees up within
    /// [`timeout`](Self::timeout) and no render pass is in flight.
    ///
    /// The render flag is checked exactly once, right after the permit is
    /// taken. A render pass that starts a moment later is not excluded; use
    /// [`begin_remote_operation_async`](Self::begin_remote_operation_async)
    /// when that matters.
    ///
    /// # Errors
    ///
    /// - [`Busy::RemotePermit`] if another remote operation kept the permit.
    /// - [`Busy::Rendering`] if a render pass was in flight. The permit has
    ///   already been returned.
    pub fn try_begin_remote_operation(&self) -> Result<RemoteGuard<'_>, Busy> {
        let timeout = self.timeout();
        if !self.remote.acquire_blocking(timeout) {
            StatCounters::bump(&self.stats.remote_busy);
            tracing::trace!("Remote permit busy after {}ms", timeout.as_millis());
            return Err(Busy::RemotePermit { waited: timeout });
        }

        let guard = RemoteGuard::new(self);
        if self.is_rendering() {
            drop(guard);
            StatCounters::bump(&self.stats.remote_busy);
            tracing::trace!("Render pass in progress, remote operation refused");
            return Err(Busy::Rendering);
        }

        StatCounters::bump(&self.stats.remote_begun);
        Ok(guard)
    }

    /// Starts a remote operation, waiting for the permit and then for any
    /// in-flight render pass to finish.
    ///
    /// Each phase has its own budget of [`timeout`](Self::timeout), so the
    /// call can take up to twice the timeout. The render flag is polled every
    /// [`RENDER_POLL_INTERVAL`], yielding to the runtime between polls.
    ///
    /// Dropping the returned future at any await point returns a permit that
    /// was already taken.
    ///
    /// Must run inside a Tokio runtime with the time driver enabled.
    ///
    /// # Errors
    ///
    /// - [`TimeoutError::RemotePermit`] if the permit was not acquired.
    /// - [`TimeoutError::RenderInProgress`] if rendering did not clear. The
    ///   permit has already been returned.
    ///
    /// Both are logged at warning level.
    pub async fn begin_remote_operation_async(&self) -> Result<RemoteGuard<'_>, TimeoutError> {
        let timeout = self.timeout();
        if !self.remote.acquire(timeout).await {
            StatCounters::bump(&self.stats.remote_timeouts);
            tracing::warn!("Timed out after {}ms waiting for remote permit", timeout.as_millis());
            return Err(TimeoutError::RemotePermit { waited: timeout });
        }

        let guard = RemoteGuard::new(self);

        if self.is_rendering() {
            StatCounters::bump(&self.stats.remote_render_waits);
            let waiting_since = tokio::time::Instant::now();
            while self.is_rendering() && waiting_since.elapsed() < timeout {
                tokio::time::sleep(RENDER_POLL_INTERVAL).await;
            }
        }

        if self.is_rendering() {
            drop(guard);
            StatCounters::bump(&self.stats.remote_timeouts);
            tracing::warn!(
                "Render still in progress after {}ms, remote operation postponed",
                timeout.as_millis()
            );
            return Err(TimeoutError::RenderInProgress { waited: timeout });
        }

        StatCounters::bump(&self.stats.remote_begun);
        Ok(guard)
    }

    /// Runs `operation` as a remote operation through the fast sync path.
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] without running `operation`, see
    /// [`try_begin_remote_operation`](Self::try_begin_remote_operation).
    pub fn try_remote_operation<R>(&self, operation: impl FnOnce() -> R) -> Result<R, Busy> {
        let _op = self.try_begin_remote_operation()?;
        Ok(operation())
    }

    /// Returns the remote permit. Called once per guard.
    pub(crate) fn end_remote_operation(&self) {
        if !self.remote.release() {
            tracing::error!("Remote permit released twice, ignoring");
        }
    }
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("rendering", &self.is_rendering())
            .field("remote_permits_available", &self.remote_permits_available())
            .field("timeout", &self.timeout())
            .finish_non_exhaustive()
    }
}
