//! Scheduler error types.

use thiserror::Error;

use tokenward_core::{ExecutorError, StoreError};

/// Errors that can occur while starting or running the renewal scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("renewal scheduler is already running")]
    AlreadyRunning,

    #[error("credential store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("failed to read credential for {connection}: {source}")]
    StoreRead {
        connection: String,
        #[source]
        source: StoreError,
    },

    #[error("token lookup failed for {connection}: {source}")]
    Lookup {
        connection: String,
        #[source]
        source: ExecutorError,
    },

    /// The issuer rotated the credential but the new value could not be
    /// saved. The old value in the store may no longer be valid.
    #[error("renewed credential for {connection} could not be written back: {source}")]
    StoreWrite {
        connection: String,
        #[source]
        source: StoreError,
    },

    #[error("lifecycle marker error: {0}")]
    Marker(#[from] std::io::Error),
}

impl SchedulerError {
    /// Whether the failing connection had a retrievable credential.
    pub fn credential_found(&self) -> bool {
        matches!(self, Self::Lookup { .. } | Self::StoreWrite { .. })
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
