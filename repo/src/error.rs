//! Unified error handling for the repository layer.

use crate::store::StoreError;
use crate::sync::{BridgeError, SyncState};
use tether_engine::CoerceError;
use tokio::task::JoinError;

/// A sync down did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SyncDownError {
    #[error("Sync down '{name}' failed to start")]
    FailedToStart {
        name: String,
        #[source]
        source: BridgeError,
    },

    #[error("Sync down '{name}' failed to finish")]
    FailedToFinish {
        name: String,
        #[source]
        source: BridgeError,
    },

    #[error("Cleaning upstream records of '{name}' failed")]
    CleaningUpstreamRecordsFailed {
        name: String,
        #[source]
        source: BridgeError,
    },
}

impl SyncDownError {
    pub(crate) fn from_bridge(name: &str, source: BridgeError) -> Self {
        let name = name.to_string();
        if source.is_start_failure() {
            SyncDownError::FailedToStart { name, source }
        } else {
            SyncDownError::FailedToFinish { name, source }
        }
    }

    /// The terminal state reported by the engine, if any.
    pub fn state(&self) -> Option<&SyncState> {
        match self {
            SyncDownError::FailedToStart { source, .. }
            | SyncDownError::FailedToFinish { source, .. }
            | SyncDownError::CleaningUpstreamRecordsFailed { source, .. } => source.state(),
        }
    }
}

/// A sync up did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SyncUpError {
    #[error("Sync up '{name}' failed to start")]
    FailedToStart {
        name: String,
        #[source]
        source: BridgeError,
    },

    #[error("Sync up '{name}' failed to finish")]
    FailedToFinish {
        name: String,
        #[source]
        source: BridgeError,
    },
}

impl SyncUpError {
    pub(crate) fn from_bridge(name: &str, source: BridgeError) -> Self {
        let name = name.to_string();
        if source.is_start_failure() {
            SyncUpError::FailedToStart { name, source }
        } else {
            SyncUpError::FailedToFinish { name, source }
        }
    }

    pub fn state(&self) -> Option<&SyncState> {
        match self {
            SyncUpError::FailedToStart { source, .. }
            | SyncUpError::FailedToFinish { source, .. } => source.state(),
        }
    }
}

/// A local read or write failed.
#[derive(Debug, thiserror::Error)]
pub enum RepoOperationError {
    #[error("Store operation failed: {message}")]
    StoreOperationFailed {
        message: String,
        #[source]
        source: StoreError,
    },

    #[error("Record {id} not found in soup {soup}")]
    RecordNotFound { id: String, soup: String },

    #[error("Stored record could not be read back")]
    InvalidResultObject {
        #[source]
        source: CoerceError,
    },
}

impl RepoOperationError {
    pub(crate) fn store(message: impl Into<String>) -> impl FnOnce(StoreError) -> Self {
        let message = message.into();
        move |source| RepoOperationError::StoreOperationFailed { message, source }
    }
}

/// Every error a repository call can return.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    SyncDown(#[from] SyncDownError),

    #[error(transparent)]
    SyncUp(#[from] SyncUpError),

    #[error(transparent)]
    Operation(#[from] RepoOperationError),

    #[error("Invalid record: {0}")]
    Coerce(#[from] CoerceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Repository task aborted: {0}")]
    Aborted(#[from] JoinError),
}

/// Result type alias for repository calls.
pub type Result<T> = std::result::Result<T, Error>;
