//! The boundary to a sync engine.
//!
//! A sync engine moves records between a soup and a remote. It is driven
//! through callbacks: every call returns as soon as the operation has been
//! started, and progress is reported through the callback until a terminal
//! state is reached.

use crate::store::StoreError;
use serde::{Deserialize, Serialize};

/// Status reported by a running sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    New,
    Running,
    Done,
    Failed,
    Stopped,
}

impl SyncStatus {
    /// Done, failed and stopped are final. Nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Done | SyncStatus::Failed | SyncStatus::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncDirection {
    Down,
    Up,
}

/// How a sync down treats records with pending local changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeMode {
    /// Remote values replace local ones, clearing local change flags
    Overwrite,
    /// Records with pending local changes are left alone
    #[default]
    LeaveIfChanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    pub merge_mode: MergeMode,
}

impl SyncOptions {
    pub fn with_merge_mode(merge_mode: MergeMode) -> Self {
        Self { merge_mode }
    }
}

/// Which remote records a sync down fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDownTarget {
    pub object_type: String,
    /// Fields copied into the soup. Empty means every field.
    pub fields: Vec<String>,
}

impl SyncDownTarget {
    pub fn new<I, S>(object_type: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            object_type: object_type.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Which fields a sync up pushes. Empty lists mean every field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUpTarget {
    pub create_fields: Vec<String>,
    pub update_fields: Vec<String>,
}

impl SyncUpTarget {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        Self {
            create_fields: fields.clone(),
            update_fields: fields,
        }
    }
}

/// A snapshot of a sync's progress, as passed to callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub id: u64,
    pub name: String,
    pub soup: String,
    pub direction: SyncDirection,
    pub status: SyncStatus,
    /// Percent complete
    pub progress: u8,
    /// Records processed by the last run
    pub total_size: usize,
    /// Failure description, set on `Failed`
    pub error: Option<String>,
}

impl SyncState {
    pub fn new(id: u64, name: &str, soup: &str, direction: SyncDirection) -> Self {
        Self {
            id,
            name: name.to_string(),
            soup: soup.to_string(),
            direction,
            status: SyncStatus::New,
            progress: 0,
            total_size: 0,
            error: None,
        }
    }

    pub fn with_status(&self, status: SyncStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Receives every state change of a sync.
pub type SyncCallback = Box<dyn FnMut(SyncState) + Send + 'static>;

/// Receives the outcome of a ghost cleanup: the number of local records
/// removed because they no longer exist remotely.
pub type GhostCallback = Box<dyn FnOnce(Result<usize, EngineError>) + Send + 'static>;

/// Errors raised by a sync engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No sync named '{0}'")]
    UnknownSync(String),

    #[error("Sync '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Sync '{0}' is not a sync down")]
    NotSyncDown(String),

    #[error("Sync engine unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(String),
}

/// A callback driven sync engine.
///
/// Every method returns `Err` when the operation could not be started; once
/// started, the outcome arrives through the callback only.
pub trait SyncEngine: Send + Sync {
    /// Define a named sync down into `soup` and run it.
    fn sync_down(
        &self,
        target: SyncDownTarget,
        options: SyncOptions,
        soup: &str,
        name: &str,
        callback: SyncCallback,
    ) -> Result<SyncState, EngineError>;

    /// Define a named sync up from `soup` and run it.
    fn sync_up(
        &self,
        target: SyncUpTarget,
        options: SyncOptions,
        soup: &str,
        name: &str,
        callback: SyncCallback,
    ) -> Result<SyncState, EngineError>;

    /// Run a previously defined sync again.
    fn re_sync(&self, name: &str, callback: SyncCallback) -> Result<SyncState, EngineError>;

    /// Remove local records a sync down brought in that no longer exist
    /// remotely. Records with pending local changes are kept.
    fn clean_resync_ghosts(&self, name: &str, callback: GhostCallback) -> Result<(), EngineError>;
}
