//! Identifiers for records created on this device before the remote has
//! assigned them a permanent id.

use crate::RecordId;

/// Prefix of every locally minted id.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Mints local ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalId;

impl LocalId {
    /// A fresh, globally unique local id.
    pub fn generate() -> RecordId {
        format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4().simple())
    }
}

/// Whether an id was minted locally.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}
