//! Queries against the soup_entries table.
//!
//! Every function takes any SQLite executor, so the same statements serve
//! plain pool reads and writes inside a [`StoreTxn`](super::StoreTxn).

use super::StoreError;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor};
use tether_engine::record::{ID, LOCAL_ID, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED};
use tether_engine::{RecordId, SyncFlags};

const ENTRY_COLUMNS: &str = r#"
    entry_id, soup, record_id, local_id, payload,
    local, locally_created, locally_updated, locally_deleted, last_modified
"#;

/// A stored soup entry row from the database.
#[derive(Debug, Clone)]
pub struct SoupEntry {
    pub entry_id: i64,
    pub soup: String,
    pub record_id: String,
    pub local_id: Option<String>,
    pub payload: String,
    pub local: bool,
    pub flags: SyncFlags,
    pub last_modified: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for SoupEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(SoupEntry {
            entry_id: row.try_get("entry_id")?,
            soup: row.try_get("soup")?,
            record_id: row.try_get("record_id")?,
            local_id: row.try_get("local_id")?,
            payload: row.try_get("payload")?,
            local: row.try_get("local")?,
            flags: SyncFlags {
                locally_created: row.try_get("locally_created")?,
                locally_updated: row.try_get("locally_updated")?,
                locally_deleted: row.try_get("locally_deleted")?,
            },
            last_modified: row.try_get("last_modified")?,
        })
    }
}

impl SoupEntry {
    /// The stored payload, with the entry id and modification time added.
    pub fn to_payload(&self) -> Result<Value, StoreError> {
        let mut payload = match serde_json::from_str::<Value>(&self.payload)? {
            Value::Object(map) => map,
            _ => return Err(StoreError::NotAnObject),
        };
        payload.insert(SOUP_ENTRY_ID.into(), Value::from(self.entry_id));
        payload.insert(SOUP_LAST_MODIFIED.into(), Value::from(self.last_modified));
        Ok(Value::Object(payload))
    }
}

/// The indexed columns of a payload about to be written.
#[derive(Debug)]
pub(crate) struct EntryColumns {
    pub record_id: RecordId,
    pub local_id: Option<RecordId>,
    pub flags: SyncFlags,
    pub entry_id: Option<i64>,
    pub payload: String,
}

impl EntryColumns {
    /// Split a payload into indexed columns and the stored JSON text.
    ///
    /// Store-managed keys are stripped and `__local__` is rewritten from the
    /// three change flags.
    pub fn from_payload(payload: &Value) -> Result<Self, StoreError> {
        let mut obj: Map<String, Value> = payload
            .as_object()
            .cloned()
            .ok_or(StoreError::NotAnObject)?;

        let record_id = obj
            .get(ID)
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .ok_or(StoreError::MissingRecordId)?;
        let local_id = obj
            .get(LOCAL_ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let entry_id = obj.remove(SOUP_ENTRY_ID).and_then(|v| v.as_i64());
        obj.remove(SOUP_LAST_MODIFIED);

        let flags = SyncFlags::read(&obj);
        flags.write(&mut obj);

        Ok(Self {
            record_id,
            local_id,
            flags,
            entry_id,
            payload: serde_json::to_string(&obj)?,
        })
    }
}

/// Insert an entry, replacing any entry with the same record id.
pub(crate) async fn upsert_entry<'e, E>(
    executor: E,
    soup: &str,
    columns: &EntryColumns,
    now: i64,
) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO soup_entries (
            soup, record_id, local_id, payload,
            local, locally_created, locally_updated, locally_deleted, last_modified
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (soup, record_id) DO UPDATE SET
            local_id = excluded.local_id,
            payload = excluded.payload,
            local = excluded.local,
            locally_created = excluded.locally_created,
            locally_updated = excluded.locally_updated,
            locally_deleted = excluded.locally_deleted,
            last_modified = excluded.last_modified
        RETURNING entry_id
        "#,
    )
    .bind(soup)
    .bind(&columns.record_id)
    .bind(&columns.local_id)
    .bind(&columns.payload)
    .bind(columns.flags.local())
    .bind(columns.flags.locally_created)
    .bind(columns.flags.locally_updated)
    .bind(columns.flags.locally_deleted)
    .bind(now)
    .fetch_one(executor)
    .await?;

    row.try_get("entry_id")
}

/// Overwrite an existing entry in place. Returns the number of rows touched.
pub(crate) async fn update_entry<'e, E>(
    executor: E,
    soup: &str,
    entry_id: i64,
    columns: &EntryColumns,
    now: i64,
) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE soup_entries SET
            record_id = ?3,
            local_id = ?4,
            payload = ?5,
            local = ?6,
            locally_created = ?7,
            locally_updated = ?8,
            locally_deleted = ?9,
            last_modified = ?10
        WHERE soup = ?1 AND entry_id = ?2
        "#,
    )
    .bind(soup)
    .bind(entry_id)
    .bind(&columns.record_id)
    .bind(&columns.local_id)
    .bind(&columns.payload)
    .bind(columns.flags.local())
    .bind(columns.flags.locally_created)
    .bind(columns.flags.locally_updated)
    .bind(columns.flags.locally_deleted)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Delete an entry. Returns the number of rows removed.
pub(crate) async fn delete_entry<'e, E>(
    executor: E,
    soup: &str,
    entry_id: i64,
) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM soup_entries WHERE soup = ?1 AND entry_id = ?2")
        .bind(soup)
        .bind(entry_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Get an entry by record id.
pub(crate) async fn fetch_by_record_id<'e, E>(
    executor: E,
    soup: &str,
    record_id: &str,
) -> Result<Option<SoupEntry>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM soup_entries WHERE soup = ?1 AND record_id = ?2");
    sqlx::query_as::<_, SoupEntry>(&sql)
        .bind(soup)
        .bind(record_id)
        .fetch_optional(executor)
        .await
}

/// Get every entry created under a local id.
pub(crate) async fn fetch_by_local_id<'e, E>(
    executor: E,
    soup: &str,
    local_id: &str,
) -> Result<Vec<SoupEntry>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM soup_entries WHERE soup = ?1 AND local_id = ?2");
    sqlx::query_as::<_, SoupEntry>(&sql)
        .bind(soup)
        .bind(local_id)
        .fetch_all(executor)
        .await
}

/// Get one page of a soup, in insertion order.
pub(crate) async fn fetch_page<'e, E>(
    executor: E,
    soup: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<SoupEntry>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM soup_entries WHERE soup = ?1 ORDER BY entry_id LIMIT ?2 OFFSET ?3"
    );
    sqlx::query_as::<_, SoupEntry>(&sql)
        .bind(soup)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
}

/// Get every entry whose `local` flag matches.
pub(crate) async fn fetch_by_local_flag<'e, E>(
    executor: E,
    soup: &str,
    local: bool,
) -> Result<Vec<SoupEntry>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM soup_entries WHERE soup = ?1 AND local = ?2 ORDER BY entry_id"
    );
    sqlx::query_as::<_, SoupEntry>(&sql)
        .bind(soup)
        .bind(local)
        .fetch_all(executor)
        .await
}

/// Get every record id in a soup.
pub(crate) async fn fetch_record_ids<'e, E>(
    executor: E,
    soup: &str,
) -> Result<Vec<RecordId>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_scalar::<_, String>(
        "SELECT record_id FROM soup_entries WHERE soup = ?1 ORDER BY entry_id",
    )
    .bind(soup)
    .fetch_all(executor)
    .await
}

/// Count the entries in a soup.
pub(crate) async fn count_entries<'e, E>(executor: E, soup: &str) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM soup_entries WHERE soup = ?1")
        .bind(soup)
        .fetch_one(executor)
        .await
}
