//! # Tether Engine
//!
//! The I/O-free core of a local-first record repository.
//!
//! This crate describes what a record is, how its local sync status is
//! derived, how raw payloads are coerced into records, and how the
//! in-memory snapshot of a repository is patched. Storage, sync engines and
//! concurrency live in `tether-repo`.
//!
//! ## Design Principles
//!
//! - **No IO**: nothing here touches files, network or clocks
//! - **Derived status**: [`LocalStatus`] is a pure function of [`SyncFlags`]
//!   and is never stored
//! - **Strict coercion**: a missing or wrongly typed required field fails
//!   with a [`CoerceError`] carrying the offending payload
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] has an id, an object type, a field map and three local
//! change flags: created, updated and deleted. The `__local__` flag written
//! to payloads is always recomputed from those three.
//!
//! ### Local status
//!
//! ```text
//! MatchesUpstream --(local edit)---> LocallyUpdated
//! MatchesUpstream --(local delete)-> LocallyDeleted
//! LocallyCreated  --(local edit)---> LocallyCreated
//! LocallyUpdated  --(local delete)-> LocallyDeletedAndLocallyUpdated
//! LocallyDeleted  --(undelete)-----> LocallyUpdated | MatchesUpstream
//! ```
//!
//! ### Schemas
//!
//! An [`ObjectSchema`] lists required fields and constraints, and defines
//! value equality per [`FieldType`] for no-op update detection.
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{contact, LocalStatus};
//! use serde_json::json;
//!
//! let payload = json!({
//!     "Id": "local_1",
//!     "attributes": {"type": "Contact"},
//!     "LastName": "Smith",
//!     "__locally_created__": true,
//! });
//!
//! let record = contact::schema().coerce(&payload).unwrap();
//! assert_eq!(record.local_status(), LocalStatus::LocallyCreated);
//! assert!(record.is_local());
//! ```

pub mod coerce;
pub mod contact;
pub mod error;
pub mod local_id;
pub mod record;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use contact::Contact;
pub use error::CoerceError;
pub use local_id::{is_local_id, LocalId, LOCAL_ID_PREFIX};
pub use record::{is_reserved_key, DeleteTransition, LocalStatus, Record, SyncFlags};
pub use schema::{FieldDef, FieldType, ObjectSchema};
pub use snapshot::RecordSnapshot;

/// Type aliases for clarity
pub type RecordId = String;
pub type ObjectType = String;
