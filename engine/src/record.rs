//! Record types and the local sync status state machine.

use crate::{ObjectType, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding the record identifier.
pub const ID: &str = "Id";
/// Key holding the `{"type": ...}` attributes object.
pub const ATTRIBUTES: &str = "attributes";
/// Key inside [`ATTRIBUTES`] naming the object type.
pub const TYPE: &str = "type";
/// Derived flag: true iff any of the three local flags is set.
pub const LOCAL: &str = "__local__";
pub const LOCALLY_CREATED: &str = "__locally_created__";
pub const LOCALLY_UPDATED: &str = "__locally_updated__";
pub const LOCALLY_DELETED: &str = "__locally_deleted__";
/// The id a record was created under before the remote assigned one.
pub const LOCAL_ID: &str = "__local_id__";
/// Added by the backing store on every read.
pub const SOUP_ENTRY_ID: &str = "_soupEntryId";
/// Added by the backing store on every read.
pub const SOUP_LAST_MODIFIED: &str = "_soupLastModifiedDate";

const RESERVED_KEYS: [&str; 9] = [
    ID,
    ATTRIBUTES,
    LOCAL,
    LOCALLY_CREATED,
    LOCALLY_UPDATED,
    LOCALLY_DELETED,
    LOCAL_ID,
    SOUP_ENTRY_ID,
    SOUP_LAST_MODIFIED,
];

/// Whether a payload key belongs to the sync bookkeeping rather than the object.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Read a boolean flag leniently: `true`, non-zero numbers and `"true"` count.
pub fn read_flag(payload: &Map<String, Value>, key: &str) -> bool {
    match payload.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// The sync status of a record, derived from its [`SyncFlags`].
///
/// Exactly one status applies at any time. It is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LocalStatus {
    LocallyCreated,
    LocallyUpdated,
    LocallyDeleted,
    LocallyDeletedAndLocallyUpdated,
    MatchesUpstream,
}

impl LocalStatus {
    /// Derive the status. Deletion takes precedence over creation, which
    /// takes precedence over update.
    pub fn from_flags(flags: SyncFlags) -> Self {
        match (
            flags.locally_deleted,
            flags.locally_created,
            flags.locally_updated,
        ) {
            (true, _, true) => LocalStatus::LocallyDeletedAndLocallyUpdated,
            (true, _, false) => LocalStatus::LocallyDeleted,
            (false, true, _) => LocalStatus::LocallyCreated,
            (false, false, true) => LocalStatus::LocallyUpdated,
            (false, false, false) => LocalStatus::MatchesUpstream,
        }
    }

    pub fn is_locally_created(self) -> bool {
        matches!(self, LocalStatus::LocallyCreated)
    }

    pub fn is_locally_updated(self) -> bool {
        matches!(
            self,
            LocalStatus::LocallyUpdated | LocalStatus::LocallyDeletedAndLocallyUpdated
        )
    }

    pub fn is_locally_deleted(self) -> bool {
        matches!(
            self,
            LocalStatus::LocallyDeleted | LocalStatus::LocallyDeletedAndLocallyUpdated
        )
    }
}

impl std::fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LocalStatus::LocallyCreated => "LocallyCreated",
            LocalStatus::LocallyUpdated => "LocallyUpdated",
            LocalStatus::LocallyDeleted => "LocallyDeleted",
            LocalStatus::LocallyDeletedAndLocallyUpdated => "LocallyDeletedAndLocallyUpdated",
            LocalStatus::MatchesUpstream => "MatchesUpstream",
        };
        f.write_str(name)
    }
}

/// What a local delete does to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTransition {
    /// Never synced: remove it from the store entirely.
    Purge,
    /// Already marked deleted.
    Unchanged,
    /// Keep the record, marked for deletion on the next sync up.
    Mark(SyncFlags),
}

/// The three independent local-change flags of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFlags {
    pub locally_created: bool,
    pub locally_updated: bool,
    pub locally_deleted: bool,
}

impl SyncFlags {
    /// Flags of a freshly created, never synced record.
    pub fn created() -> Self {
        Self {
            locally_created: true,
            ..Self::default()
        }
    }

    /// Flags of a record matching the remote.
    pub fn clean() -> Self {
        Self::default()
    }

    /// True iff any local change is pending.
    pub fn local(self) -> bool {
        self.locally_created || self.locally_updated || self.locally_deleted
    }

    pub fn status(self) -> LocalStatus {
        LocalStatus::from_flags(self)
    }

    pub fn after_local_update(self) -> Self {
        Self {
            locally_updated: true,
            ..self
        }
    }

    pub fn on_local_delete(self) -> DeleteTransition {
        let status = self.status();
        if status.is_locally_created() {
            DeleteTransition::Purge
        } else if status.is_locally_deleted() {
            DeleteTransition::Unchanged
        } else {
            DeleteTransition::Mark(Self {
                locally_deleted: true,
                ..self
            })
        }
    }

    /// `None` when the record is not locally deleted.
    pub fn after_local_undelete(self) -> Option<Self> {
        self.locally_deleted.then_some(Self {
            locally_deleted: false,
            ..self
        })
    }

    /// Read the flags from a payload.
    pub fn read(payload: &Map<String, Value>) -> Self {
        Self {
            locally_created: read_flag(payload, LOCALLY_CREATED),
            locally_updated: read_flag(payload, LOCALLY_UPDATED),
            locally_deleted: read_flag(payload, LOCALLY_DELETED),
        }
    }

    /// Write all four flags, `__local__` included, into a payload.
    pub fn write(self, payload: &mut Map<String, Value>) {
        payload.insert(LOCALLY_CREATED.into(), Value::Bool(self.locally_created));
        payload.insert(LOCALLY_UPDATED.into(), Value::Bool(self.locally_updated));
        payload.insert(LOCALLY_DELETED.into(), Value::Bool(self.locally_deleted));
        payload.insert(LOCAL.into(), Value::Bool(self.local()));
    }
}

/// A record of a single object type, as seen by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Current identifier (local or remote)
    pub id: RecordId,
    /// Object type tag, e.g. `Contact`
    pub object_type: ObjectType,
    /// Object fields, without any reserved keys
    pub fields: Map<String, Value>,
    /// Local change flags
    pub flags: SyncFlags,
    /// Id assigned at local creation, if the record was created on this device
    pub local_id: Option<RecordId>,
}

impl Record {
    pub fn local_status(&self) -> LocalStatus {
        self.flags.status()
    }

    pub fn is_local(&self) -> bool {
        self.flags.local()
    }

    pub fn locally_created(&self) -> bool {
        self.flags.locally_created
    }

    pub fn locally_updated(&self) -> bool {
        self.flags.locally_updated
    }

    pub fn locally_deleted(&self) -> bool {
        self.flags.locally_deleted
    }

    /// Field value, treating `null` as absent.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Serialize back into a store payload.
    pub fn to_payload(&self) -> Value {
        let mut payload = self.fields.clone();
        payload.insert(ID.into(), Value::String(self.id.clone()));
        let mut attributes = Map::new();
        attributes.insert(TYPE.into(), Value::String(self.object_type.clone()));
        payload.insert(ATTRIBUTES.into(), Value::Object(attributes));
        if let Some(local_id) = &self.local_id {
            payload.insert(LOCAL_ID.into(), Value::String(local_id.clone()));
        }
        self.flags.write(&mut payload);
        Value::Object(payload)
    }
}
