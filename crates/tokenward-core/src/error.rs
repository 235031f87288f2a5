//! Error types for configuration and the external collaborators.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("duplicate connection name: {0}")]
    DuplicateConnection(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors returned by a credential store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store is corrupt: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a token executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor binary not found: {0}")]
    BinaryNotFound(String),

    #[error("executor call timed out after {0:?}")]
    Timeout(Duration),

    #[error("executor command failed ({status}): {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("unexpected executor output: {0}")]
    Parse(String),

    #[error("executor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors returned by a notifier. Always best-effort.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification command failed: {0}")]
    Command(String),

    #[error("notification I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NotifyResult<T> = Result<T, NotifyError>;
