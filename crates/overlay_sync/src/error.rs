//! # Coordinator Error Types
//!
//! Two shapes of acquisition failure are kept apart on purpose:
//!
//! - [`Busy`] - expected contention, returned by the `try_*` entry points.
//!   Callers skip the frame or retry later.
//! - [`TimeoutError`] - hard failure, returned by `begin_render` and the
//!   async remote gate. Always logged at warning level before it is returned.
//!
//! Release never produces an error.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Recoverable contention: the resource was not available in time.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    /// The render lock was not acquired within the timeout.
    #[error("render lock busy after {waited:?}")]
    RenderLock {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The remote-operation permit was not acquired within the timeout.
    #[error("remote permit busy after {waited:?}")]
    RemotePermit {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The permit was acquired but a render pass was in flight.
    #[error("render pass in progress")]
    Rendering,
}

/// Hard acquisition failure after a timeout elapsed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    /// The render lock was not acquired within the timeout.
    #[error("timed out after {waited:?} acquiring the render lock")]
    RenderLock {
        /// The budget that elapsed.
        waited: Duration,
    },

    /// The remote-operation permit was not acquired within the timeout.
    #[error("timed out after {waited:?} acquiring the remote permit")]
    RemotePermit {
        /// The budget that elapsed.
        waited: Duration,
    },

    /// The permit was held but the render pass did not finish in time.
    #[error("render pass still in progress after {waited:?}")]
    RenderInProgress {
        /// The budget that elapsed while polling the render flag.
        waited: Duration,
    },
}

/// Errors raised while loading a [`SyncConfig`](crate::SyncConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parsed but violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Any error this crate can produce.
#[derive(Error, Debug)]
pub enum SyncError {
    /// See [`Busy`].
    #[error(transparent)]
    Busy(#[from] Busy),

    /// See [`TimeoutError`].
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for coordinator operations.
pub type SyncResult<T> = Result<T, SyncError>;
