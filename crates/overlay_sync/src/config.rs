//! # Coordinator Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file (or no file) is a valid configuration.
//!
//! ```toml
//! # Budget for each wait, in milliseconds
//! timeout_ms = 50
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default budget for every timeout-bounded wait (ms).
pub const DEFAULT_TIMEOUT_MS: u64 = 50;

/// Upper bound accepted from a config file (ms).
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Interval between render-flag polls on the async remote gate.
pub const RENDER_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Coordinator configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Budget for each wait, in milliseconds.
    ///
    /// The async remote gate spends up to this much on the permit and up to
    /// this much again waiting for rendering to clear.
    pub timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl SyncConfig {
    /// Config with the given timeout.
    #[must_use]
    pub const fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }

    /// The timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] if [`validate`](Self::validate) fails.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file can not be read, otherwise the
    /// same errors as [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks the values against their allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `timeout_ms` exceeds [`MAX_TIMEOUT_MS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "timeout_ms = {} exceeds the maximum of {MAX_TIMEOUT_MS}",
                self.timeout_ms
            )));
        }
        Ok(())
    }
}
