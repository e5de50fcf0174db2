//! Session configuration.
//!
//! Values come from built-in defaults, an optional TOML file, then command
//! line overrides, in that order. [`SessionConfig::validate`] runs last.
//!
//! ```toml
//! failure_threshold = 3
//! failure_modulus = 5
//! poll_interval_ms = 1000
//! work_interval_ms = 1000
//! session_duration_ms = 30000
//! detection = "counter-probe"
//! history_cap = 1024
//! revert_on_exit = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::monitor::DetectionMode;

/// Every tunable of one hot-patch session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Failures the monitor must observe before it patches.
    pub failure_threshold: u64,
    /// The faulty operation fails on every call that is a multiple of this.
    pub failure_modulus: u64,
    /// Sleep between monitor polls.
    pub poll_interval_ms: u64,
    /// Sleep between worker iterations.
    pub work_interval_ms: u64,
    /// Wall-clock bound of the whole session.
    pub session_duration_ms: u64,
    /// How the monitor derives failure evidence.
    pub detection: DetectionMode,
    /// Maximum call records kept in the worker report.
    pub history_cap: usize,
    /// Revert every patch after both loops have stopped.
    pub revert_on_exit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_modulus: 5,
            poll_interval_ms: 1_000,
            work_interval_ms: 1_000,
            session_duration_ms: 30_000,
            detection: DetectionMode::CounterProbe,
            history_cap: crate::worker::DEFAULT_RECORD_CAP,
            revert_on_exit: false,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    /// `ConfigError::Io` when the file cannot be read, `ConfigError::Parse`
    /// when its content is not a valid config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would make a session meaningless.
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be at least 1"));
        }
        if self.failure_modulus < 2 {
            return Err(invalid("failure_modulus", "must be at least 2"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than 0"));
        }
        if self.work_interval_ms == 0 {
            return Err(invalid("work_interval_ms", "must be greater than 0"));
        }
        if self.session_duration_ms == 0 {
            return Err(invalid("session_duration_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn work_interval(&self) -> Duration {
        Duration::from_millis(self.work_interval_ms)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_millis(self.session_duration_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}
