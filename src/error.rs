//! # Errors
//!
//! Crate-level error enums.
//!
//! - [`OperationError`]: a single call into a patchable operation failed.
//!   Always recovered locally by the caller (the worker loop logs it and moves on).
//! - [`ConfigError`]: session configuration could not be loaded or is invalid.
//! - [`HotPatchError`]: anything that stops a session from starting at all.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of one invocation of a bound operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The operation's own logic rejected this call.
    #[error("call #{call} failed: {reason}")]
    Fault { call: u64, reason: String },
    /// No implementation is bound under the requested name.
    #[error("no implementation bound for operation '{operation}'")]
    Unbound { operation: String },
    /// Input the operation refuses to handle.
    #[error("input rejected: {0}")]
    Rejected(String),
}

/// Errors raised while loading or validating a [`crate::config::SessionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level error for starting and running a session.
#[derive(Debug, Error)]
pub enum HotPatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("failed to encode session report: {0}")]
    Report(#[from] serde_json::Error),
}
