//! # Scoped Release Guards
//!
//! A guard is the only proof that an acquisition succeeded and the only way
//! to give the resource back. Release happens exactly once:
//!
//! - explicitly through `release()` (later calls are no-ops), or
//! - implicitly on `Drop`, including during unwinding.
//!
//! Neither guard can fail or panic while releasing.

use parking_lot::MutexGuard;

use crate::coordinator::SyncCoordinator;

/// Proof of an in-flight render pass.
///
/// Holds the render lock. Dropping it clears the rendering flag under the
/// lock, unlocks, and wakes threads blocked in
/// [`wait_for_render_idle`](SyncCoordinator::wait_for_render_idle).
///
/// Not `Send`: a render pass is released by the thread that began it.
#[must_use = "the render pass ends as soon as the guard is dropped"]
pub struct RenderGuard<'a> {
    coordinator: &'a SyncCoordinator,
    lock: Option<MutexGuard<'a, ()>>,
}

impl<'a> RenderGuard<'a> {
    pub(crate) fn new(coordinator: &'a SyncCoordinator, lock: MutexGuard<'a, ()>) -> Self {
        Self {
            coordinator,
            lock: Some(lock),
        }
    }

    /// Ends the render pass now. Idempotent.
    pub fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            self.coordinator.end_render(lock);
        }
    }

    /// Whether [`release`](Self::release) already ran.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.lock.is_none()
    }
}

impl Drop for RenderGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RenderGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGuard")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Proof of an in-flight remote operation.
///
/// Holds the single remote permit until released or dropped.
#[must_use = "the remote operation ends as soon as the guard is dropped"]
pub struct RemoteGuard<'a> {
    coordinator: &'a SyncCoordinator,
    released: bool,
}

impl<'a> RemoteGuard<'a> {
    /// Wraps a permit the caller has already taken.
    pub(crate) fn new(coordinator: &'a SyncCoordinator) -> Self {
        Self {
            coordinator,
            released: false,
        }
    }

    /// Returns the permit now. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.coordinator.end_remote_operation();
        }
    }

    /// Whether [`release`](Self::release) already ran.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for RemoteGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RemoteGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteGuard")
            .field("released", &self.released)
            .finish()
    }
}
