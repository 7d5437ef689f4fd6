//! # Overlay Sync
//!
//! Timeout-bounded coordination between an overlay's render pass and the
//! remote operations that read or write host-process state.
//!
//! ## Rules
//!
//! 1. **One render pass at a time** - guarded by a non-reentrant lock
//! 2. **One remote operation at a time** - guarded by a single permit
//! 3. **No remote operation during a render pass** - best effort on the sync
//!    path, polled with bounded staleness on the async path
//! 4. **Every wait has a deadline** - contention is reported, never waited out
//!
//! ## Example
//!
//! ```rust,ignore
//! use overlay_sync::{SyncConfig, SyncCoordinator};
//!
//! let coordinator = SyncCoordinator::shared(SyncConfig::load("overlay_sync.toml")?);
//!
//! // Render thread
//! if let Ok(_frame) = coordinator.try_begin_render() {
//!     draw_overlay();
//! } // frame released here
//!
//! // Remote-call task
//! let _op = coordinator.begin_remote_operation_async().await?;
//! read_host_state();
//! ```

#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod guard;
mod permit;
pub mod stats;

pub use config::{SyncConfig, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, RENDER_POLL_INTERVAL};
pub use coordinator::SyncCoordinator;
pub use error::{Busy, ConfigError, SyncError, SyncResult, TimeoutError};
pub use guard::{RemoteGuard, RenderGuard};
pub use stats::CoordinatorStats;
