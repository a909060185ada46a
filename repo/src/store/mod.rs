//! Local record store backed by SQLite.
//!
//! Records live in named soups as schema-less JSON payloads, with a few
//! indexed columns (record id, local id, change flags, modification time).
//! Writes go through [`StoreTxn`], which holds the store-wide write lock for
//! its whole lifetime.

mod entries;
mod pool;

pub use entries::SoupEntry;
pub use pool::{create_memory_pool, create_pool, run_migrations, Pool};

use crate::config::{Account, StoreConfig};
use entries::EntryColumns;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use std::sync::Arc;
use tether_engine::RecordId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload has no usable Id")]
    MissingRecordId,

    #[error("Soup entry {0} not found")]
    EntryNotFound(i64),

    #[error("Id {id} matches {count} entries in soup {soup}")]
    AmbiguousId {
        soup: String,
        id: String,
        count: usize,
    },

    #[error("Payload is not a JSON object")]
    NotAnObject,
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Proof that the store-wide write lock is held. Released on drop.
#[derive(Debug)]
pub struct WriteGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Handle to the backing store of one account.
///
/// Cloning is cheap; every clone shares the pool and the write lock.
#[derive(Debug, Clone)]
pub struct Store {
    pool: Pool,
    write_lock: Arc<Mutex<()>>,
    account: Arc<Account>,
}

impl Store {
    /// Wrap an already migrated pool.
    pub fn new(pool: Pool, account: Account) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            account: Arc::new(account),
        }
    }

    /// Open the configured database and bring its schema up to date.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = create_pool(&config.database_url, config.max_connections).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool, config.account.clone()))
    }

    /// Open a private in-memory store.
    pub async fn open_in_memory(account: Account) -> Result<Self> {
        let pool = create_memory_pool().await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool, account))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Acquire the write lock without opening a transaction.
    pub async fn lock(&self) -> WriteGuard {
        WriteGuard {
            _guard: Arc::clone(&self.write_lock).lock_owned().await,
        }
    }

    /// Acquire the write lock and open a transaction.
    pub async fn begin(&self) -> Result<StoreTxn> {
        let guard = self.lock().await;
        let tx = self.pool.begin().await?;
        Ok(StoreTxn { tx, guard })
    }

    /// Read one page of a soup, in insertion order.
    pub async fn query_all(
        &self,
        soup: &str,
        page_size: usize,
        page_index: usize,
    ) -> Result<Vec<Value>> {
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let offset = i64::try_from(page_size.saturating_mul(page_index)).unwrap_or(i64::MAX);
        entries::fetch_page(&self.pool, soup, limit, offset)
            .await?
            .iter()
            .map(SoupEntry::to_payload)
            .collect()
    }

    /// Read every entry with pending local changes.
    pub async fn query_locally_changed(&self, soup: &str) -> Result<Vec<Value>> {
        entries::fetch_by_local_flag(&self.pool, soup, true)
            .await?
            .iter()
            .map(SoupEntry::to_payload)
            .collect()
    }

    /// Every record id in a soup.
    pub async fn record_ids(&self, soup: &str) -> Result<Vec<RecordId>> {
        Ok(entries::fetch_record_ids(&self.pool, soup).await?)
    }

    pub async fn count(&self, soup: &str) -> Result<usize> {
        let count = entries::count_entries(&self.pool, soup).await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub async fn find_by_record_id(&self, soup: &str, record_id: &str) -> Result<Option<Value>> {
        entries::fetch_by_record_id(&self.pool, soup, record_id)
            .await?
            .map(|entry| entry.to_payload())
            .transpose()
    }
}

/// A write transaction on the store.
///
/// Dropping it without [`commit`](Self::commit) rolls back.
pub struct StoreTxn {
    tx: Transaction<'static, Sqlite>,
    guard: WriteGuard,
}

impl StoreTxn {
    /// Insert or replace a payload, returning it as stored.
    ///
    /// A payload carrying `_soupEntryId` overwrites that entry, which lets a
    /// record change its id. Otherwise the entry is matched by record id.
    pub async fn upsert(&mut self, soup: &str, payload: &Value) -> Result<Value> {
        let columns = EntryColumns::from_payload(payload)?;
        let now = chrono::Utc::now().timestamp_millis();

        let entry_id = match columns.entry_id {
            Some(entry_id) => {
                let touched =
                    entries::update_entry(&mut *self.tx, soup, entry_id, &columns, now).await?;
                if touched == 0 {
                    return Err(StoreError::EntryNotFound(entry_id));
                }
                entry_id
            }
            None => entries::upsert_entry(&mut *self.tx, soup, &columns, now).await?,
        };

        self.stored(soup, &columns.record_id, entry_id).await
    }

    /// Overwrite a specific entry.
    pub async fn update(&mut self, soup: &str, entry_id: i64, payload: &Value) -> Result<Value> {
        let columns = EntryColumns::from_payload(payload)?;
        let now = chrono::Utc::now().timestamp_millis();
        let touched = entries::update_entry(&mut *self.tx, soup, entry_id, &columns, now).await?;
        if touched == 0 {
            return Err(StoreError::EntryNotFound(entry_id));
        }
        self.stored(soup, &columns.record_id, entry_id).await
    }

    pub async fn delete(&mut self, soup: &str, entry_id: i64) -> Result<()> {
        let removed = entries::delete_entry(&mut *self.tx, soup, entry_id).await?;
        if removed == 0 {
            return Err(StoreError::EntryNotFound(entry_id));
        }
        Ok(())
    }

    pub async fn find_by_record_id(&mut self, soup: &str, record_id: &str) -> Result<Option<Value>> {
        entries::fetch_by_record_id(&mut *self.tx, soup, record_id)
            .await?
            .map(|entry| entry.to_payload())
            .transpose()
    }

    /// Find the entry a record was created under, before the remote
    /// assigned it a permanent id.
    pub async fn find_by_local_id(&mut self, soup: &str, local_id: &str) -> Result<Option<Value>> {
        let mut found = entries::fetch_by_local_id(&mut *self.tx, soup, local_id).await?;
        match found.len() {
            0 => Ok(None),
            1 => found.pop().map(|entry| entry.to_payload()).transpose(),
            count => Err(StoreError::AmbiguousId {
                soup: soup.to_string(),
                id: local_id.to_string(),
                count,
            }),
        }
    }

    /// Find by record id first, then by local id.
    pub async fn find(&mut self, soup: &str, id: &str) -> Result<Option<Value>> {
        match self.find_by_record_id(soup, id).await? {
            Some(payload) => Ok(Some(payload)),
            None => self.find_by_local_id(soup, id).await,
        }
    }

    /// Every entry with pending local changes.
    pub async fn locally_changed(&mut self, soup: &str) -> Result<Vec<Value>> {
        entries::fetch_by_local_flag(&mut *self.tx, soup, true)
            .await?
            .iter()
            .map(SoupEntry::to_payload)
            .collect()
    }

    /// Entry and record ids of every entry without pending local changes.
    pub async fn synced_entries(&mut self, soup: &str) -> Result<Vec<(i64, RecordId)>> {
        Ok(entries::fetch_by_local_flag(&mut *self.tx, soup, false)
            .await?
            .into_iter()
            .map(|entry| (entry.entry_id, entry.record_id))
            .collect())
    }

    /// Commit the transaction. The write lock stays held until the returned
    /// guard is dropped.
    pub async fn commit(self) -> Result<WriteGuard> {
        self.tx.commit().await?;
        Ok(self.guard)
    }

    async fn stored(&mut self, soup: &str, record_id: &str, entry_id: i64) -> Result<Value> {
        entries::fetch_by_record_id(&mut *self.tx, soup, record_id)
            .await?
            .ok_or(StoreError::EntryNotFound(entry_id))?
            .to_payload()
    }
}

/// Entry id of a stored payload.
pub fn entry_id(payload: &Value) -> Option<i64> {
    payload
        .get(tether_engine::record::SOUP_ENTRY_ID)
        .and_then(Value::as_i64)
}
