//! Sync engine boundary.
//!
//! - [`engine`]: the callback driven [`SyncEngine`] trait and its types
//! - [`bridge`]: [`SyncBridge`], which awaits engine callbacks as futures
//! - [`memory`]: [`MemoryRemote`], an in-process engine

pub mod bridge;
pub mod engine;
pub mod memory;

pub use bridge::{BridgeError, SyncBridge};
pub use engine::{
    EngineError, GhostCallback, MergeMode, SyncCallback, SyncDirection, SyncDownTarget,
    SyncEngine, SyncOptions, SyncState, SyncStatus, SyncUpTarget,
};
pub use memory::{Failure, MemoryRemote};
