//! # Tether Repo
//!
//! Local-first repositories over a SQLite store, kept in step with a remote
//! through a callback driven sync engine.
//!
//! - [`store`]: soups of JSON records with a store-wide write lock
//! - [`sync`]: the [`SyncEngine`](sync::SyncEngine) boundary, the
//!   [`SyncBridge`](sync::SyncBridge) that awaits it, and the in-process
//!   [`MemoryRemote`](sync::MemoryRemote)
//! - [`repository`]: [`SyncableRepo`], the observable record list with local
//!   create, update, delete and undelete
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_engine::contact;
//! use tether_repo::config::{Account, RepoSettings};
//! use tether_repo::store::Store;
//! use tether_repo::sync::{MemoryRemote, SyncBridge};
//! use tether_repo::SyncableRepo;
//!
//! # async fn demo() -> tether_repo::Result<()> {
//! let store = Store::open_in_memory(Account::new("005A", "00DB")).await?;
//! let remote = MemoryRemote::new(store.clone());
//! let bridge = SyncBridge::new_shared(Arc::new(remote));
//! let repo = SyncableRepo::open(store, bridge, RepoSettings::contacts(), contact::schema()).await?;
//!
//! let fields = contact::Contact::new("Smith").with_first_name("Ann").to_fields();
//! let created = repo.locally_create(fields).await?;
//! assert!(created.is_local());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod repository;
pub mod store;
pub mod sync;

pub use config::{Account, RepoSettings, StoreConfig};
pub use error::{Error, RepoOperationError, Result, SyncDownError, SyncUpError};
pub use repository::{RefreshSummary, SyncableRepo};
pub use store::{Store, StoreError};
