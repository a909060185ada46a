//! The syncable repository.
//!
//! A [`SyncableRepo`] presents one object type of one soup as an observable
//! snapshot of records, applies local mutations to the store, and drives
//! sync through a [`SyncBridge`].
//!
//! Every write follows the same protocol: the change is committed under the
//! store write lock, the stored payload is coerced back into a [`Record`],
//! and the snapshot is patched before the lock is released. A record that
//! fails coercion is dropped from the snapshot instead.
//!
//! Every public operation runs on its own spawned task, so a caller that
//! stops waiting does not stop the work half way.

use crate::config::RepoSettings;
use crate::error::{RepoOperationError, Result, SyncDownError, SyncUpError};
use crate::store::{self, Store, StoreTxn, WriteGuard};
use crate::sync::{SyncBridge, SyncState};
use futures::Stream;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tether_engine::record::ID;
use tether_engine::{
    DeleteTransition, LocalId, ObjectSchema, Record, RecordSnapshot, SyncFlags,
};
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;

/// Outcome of a full refresh from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Records now in the snapshot
    pub loaded: usize,
    /// Stored entries that failed to coerce and were left out
    pub excluded: usize,
    /// Whether the snapshot changed
    pub changed: bool,
}

/// Local-first repository for one object type.
///
/// Cloning is cheap; clones share the snapshot and the sync lock.
#[derive(Clone)]
pub struct SyncableRepo {
    inner: Arc<RepoInner>,
}

struct RepoInner {
    store: Store,
    bridge: Arc<SyncBridge>,
    settings: RepoSettings,
    schema: ObjectSchema,
    snapshot: watch::Sender<Arc<RecordSnapshot>>,
    sync_lock: Mutex<()>,
}

impl SyncableRepo {
    /// Create a repository with an empty snapshot.
    pub fn new(
        store: Store,
        bridge: Arc<SyncBridge>,
        settings: RepoSettings,
        schema: ObjectSchema,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(RecordSnapshot::new()));
        Self {
            inner: Arc::new(RepoInner {
                store,
                bridge,
                settings,
                schema,
                snapshot,
                sync_lock: Mutex::new(()),
            }),
        }
    }

    /// Create a repository and load its snapshot from the store.
    pub async fn open(
        store: Store,
        bridge: Arc<SyncBridge>,
        settings: RepoSettings,
        schema: ObjectSchema,
    ) -> Result<Self> {
        let repo = Self::new(store, bridge, settings, schema);
        repo.refresh_records_list_from_store().await?;
        Ok(repo)
    }

    pub fn settings(&self) -> &RepoSettings {
        &self.inner.settings
    }

    pub fn schema(&self) -> &ObjectSchema {
        &self.inner.schema
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Subscribe to snapshots. The receiver starts at the current snapshot.
    pub fn observe_records(&self) -> watch::Receiver<Arc<RecordSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    /// Stream of snapshots: the current one first, then every change.
    pub fn records_stream(&self) -> impl Stream<Item = Arc<RecordSnapshot>> + Send + 'static {
        WatchStream::new(self.inner.snapshot.subscribe())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RecordSnapshot> {
        Arc::clone(&self.inner.snapshot.borrow())
    }

    /// A record from the current snapshot.
    pub fn record(&self, id: &str) -> Option<Record> {
        self.inner.snapshot.borrow().get(id).cloned()
    }

    /// Records whose string fields contain `term`, ignoring case.
    pub fn search(&self, term: &str) -> Vec<Record> {
        self.inner
            .snapshot
            .borrow()
            .search(term)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Pull remote changes, drop ghosts, then reload the snapshot.
    pub async fn sync_down(&self) -> Result<RefreshSummary> {
        self.shielded(|inner| async move {
            let _sync = inner.sync_lock.lock().await;
            inner.run_sync_down().await
        })
        .await
    }

    /// Push local changes. The snapshot is not reloaded.
    pub async fn sync_up(&self) -> Result<SyncState> {
        self.shielded(|inner| async move {
            let _sync = inner.sync_lock.lock().await;
            inner.run_sync_up().await
        })
        .await
    }

    /// Push local changes, then pull remote ones, as one sync cycle.
    pub async fn sync_up_and_down(&self) -> Result<RefreshSummary> {
        self.shielded(|inner| async move {
            let _sync = inner.sync_lock.lock().await;
            inner.run_sync_up().await?;
            inner.run_sync_down().await
        })
        .await
    }

    /// Create a record under a fresh local id.
    pub async fn locally_create(&self, fields: Map<String, Value>) -> Result<Record> {
        self.shielded(|inner| async move { inner.create(fields).await })
            .await
    }

    /// Merge fields into a record, found by remote or local id.
    pub async fn locally_update(&self, id: &str, fields: Map<String, Value>) -> Result<Record> {
        let id = id.to_string();
        self.shielded(|inner| async move { inner.update(&id, fields).await })
            .await
    }

    /// Mark a record deleted. A record that was never synced is removed
    /// outright and `None` is returned.
    pub async fn locally_delete(&self, id: &str) -> Result<Option<Record>> {
        let id = id.to_string();
        self.shielded(|inner| async move { inner.delete(&id).await })
            .await
    }

    /// Clear a pending local delete.
    pub async fn locally_undelete(&self, id: &str) -> Result<Record> {
        let id = id.to_string();
        self.shielded(|inner| async move { inner.undelete(&id).await })
            .await
    }

    /// Create when `id` is `None`, update otherwise.
    pub async fn upsert(&self, id: Option<&str>, fields: Map<String, Value>) -> Result<Record> {
        match id {
            Some(id) => self.locally_update(id, fields).await,
            None => self.locally_create(fields).await,
        }
    }

    /// Replace the snapshot with the first page of the soup.
    pub async fn refresh_records_list_from_store(&self) -> Result<RefreshSummary> {
        self.shielded(|inner| async move { inner.refresh().await })
            .await
    }

    async fn shielded<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<RepoInner>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(op(Arc::clone(&self.inner))).await?
    }
}

impl RepoInner {
    fn soup(&self) -> &str {
        &self.settings.soup_name
    }

    async fn run_sync_down(&self) -> Result<RefreshSummary> {
        let name = self.settings.sync_down_name.as_str();
        tracing::info!(sync = %name, soup = %self.soup(), "Sync down starting");

        let state = self.bridge.re_sync(name).await.map_err(|source| {
            tracing::warn!(sync = %name, error = %source, "Sync down failed");
            SyncDownError::from_bridge(name, source)
        })?;

        // The pulled records stay even when cleanup fails, so the snapshot
        // is reloaded either way.
        let cleanup = self.bridge.clean_resync_ghosts(name).await;
        let summary = self.refresh().await?;

        match cleanup {
            Ok(removed) => {
                tracing::info!(
                    sync = %name,
                    synced = state.total_size,
                    ghosts = removed,
                    records = summary.loaded,
                    "Sync down finished"
                );
                Ok(summary)
            }
            Err(source) => {
                tracing::warn!(sync = %name, error = %source, "Ghost cleanup failed");
                Err(SyncDownError::CleaningUpstreamRecordsFailed {
                    name: name.to_string(),
                    source,
                }
                .into())
            }
        }
    }

    async fn run_sync_up(&self) -> Result<SyncState> {
        let name = self.settings.sync_up_name.as_str();
        tracing::info!(sync = %name, soup = %self.soup(), "Sync up starting");

        let state = self.bridge.re_sync(name).await.map_err(|source| {
            tracing::warn!(sync = %name, error = %source, "Sync up failed");
            SyncUpError::from_bridge(name, source)
        })?;

        tracing::info!(sync = %name, pushed = state.total_size, "Sync up finished");
        Ok(state)
    }

    async fn refresh(&self) -> Result<RefreshSummary> {
        let _held = self.store.lock().await;
        let page_size = self.settings.page_size;
        let payloads = self
            .store
            .query_all(self.soup(), page_size, 0)
            .await
            .map_err(RepoOperationError::store("query soup"))?;
        if payloads.len() >= page_size {
            tracing::warn!(soup = %self.soup(), page_size, "Soup fills the refresh page, later records are not loaded");
        }

        let mut records = Vec::with_capacity(payloads.len());
        let mut excluded = 0;
        for payload in &payloads {
            match self.schema.coerce(payload) {
                Ok(record) => records.push(record),
                Err(err) => {
                    excluded += 1;
                    tracing::warn!(soup = %self.soup(), error = %err, "Excluding record that failed to deserialize");
                }
            }
        }

        let loaded = records.len();
        let next = RecordSnapshot::from_records(records);
        let changed = self.snapshot.send_if_modified(move |snapshot| {
            if **snapshot == next {
                return false;
            }
            *snapshot = Arc::new(next);
            true
        });

        tracing::debug!(soup = %self.soup(), loaded, excluded, changed, "Snapshot refreshed");
        Ok(RefreshSummary {
            loaded,
            excluded,
            changed,
        })
    }

    async fn create(&self, fields: Map<String, Value>) -> Result<Record> {
        let mut fields = self.schema.sanitize(&fields);
        self.schema.apply_display_name(&mut fields);

        let id = LocalId::generate();
        let record = Record {
            id: id.clone(),
            object_type: self.schema.object_type.clone(),
            fields,
            flags: SyncFlags::created(),
            local_id: Some(id),
        };
        let payload = record.to_payload();
        self.schema.coerce(&payload)?;

        let txn = self.begin().await?;
        let created = self.write(txn, &record.id, &payload).await?;
        tracing::info!(soup = %self.soup(), id = %created.id, "Record created locally");
        Ok(created)
    }

    async fn update(&self, id: &str, fields: Map<String, Value>) -> Result<Record> {
        let mut txn = self.begin().await?;
        let (_, existing) = self.load(&mut txn, id).await?;

        let incoming = self.schema.sanitize(&fields);
        let Some(fields) = self.schema.merge_update(&existing, &incoming) else {
            tracing::debug!(soup = %self.soup(), id = %existing.id, "Update changes nothing");
            return Ok(existing);
        };

        let updated = Record {
            fields,
            flags: existing.flags.after_local_update(),
            ..existing
        };
        let payload = updated.to_payload();
        self.schema.coerce(&payload)?;

        let record = self.write(txn, &updated.id, &payload).await?;
        tracing::info!(soup = %self.soup(), id = %record.id, status = %record.local_status(), "Record updated locally");
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<Option<Record>> {
        let mut txn = self.begin().await?;
        let (stored, existing) = self.load(&mut txn, id).await?;

        match existing.flags.on_local_delete() {
            DeleteTransition::Purge => {
                let entry_id = store::entry_id(&stored).unwrap_or_default();
                txn.delete(self.soup(), entry_id)
                    .await
                    .map_err(RepoOperationError::store("delete record"))?;
                let _held = self.commit(txn).await?;

                let mut ids = vec![existing.id.as_str()];
                ids.extend(existing.local_id.as_deref());
                self.forget(&ids);
                tracing::info!(soup = %self.soup(), id = %existing.id, "Unsynced record removed");
                Ok(None)
            }
            DeleteTransition::Unchanged => Ok(Some(existing)),
            DeleteTransition::Mark(flags) => {
                let deleted = Record { flags, ..existing };
                let record = self.write(txn, &deleted.id, &deleted.to_payload()).await?;
                tracing::info!(soup = %self.soup(), id = %record.id, status = %record.local_status(), "Record deleted locally");
                Ok(Some(record))
            }
        }
    }

    async fn undelete(&self, id: &str) -> Result<Record> {
        let mut txn = self.begin().await?;
        let (_, existing) = self.load(&mut txn, id).await?;

        let Some(flags) = existing.flags.after_local_undelete() else {
            return Ok(existing);
        };
        let restored = Record { flags, ..existing };
        let record = self.write(txn, &restored.id, &restored.to_payload()).await?;
        tracing::info!(soup = %self.soup(), id = %record.id, status = %record.local_status(), "Record undeleted locally");
        Ok(record)
    }

    async fn begin(&self) -> std::result::Result<StoreTxn, RepoOperationError> {
        self.store
            .begin()
            .await
            .map_err(RepoOperationError::store("begin transaction"))
    }

    async fn commit(&self, txn: StoreTxn) -> std::result::Result<WriteGuard, RepoOperationError> {
        txn.commit()
            .await
            .map_err(RepoOperationError::store("commit transaction"))
    }

    /// Find a record by remote id, then by local id.
    async fn load(&self, txn: &mut StoreTxn, id: &str) -> Result<(Value, Record)> {
        let stored = txn
            .find(self.soup(), id)
            .await
            .map_err(RepoOperationError::store("find record"))?
            .ok_or_else(|| RepoOperationError::RecordNotFound {
                id: id.to_string(),
                soup: self.soup().to_string(),
            })?;

        match self.schema.coerce(&stored) {
            Ok(record) => Ok((stored, record)),
            Err(source) => {
                let mut ids = vec![id];
                ids.extend(stored.get(ID).and_then(Value::as_str));
                self.forget(&ids);
                tracing::warn!(soup = %self.soup(), id = %id, error = %source, "Stored record is unreadable");
                Err(RepoOperationError::InvalidResultObject { source }.into())
            }
        }
    }

    /// Write a payload, commit, and patch the snapshot with the result.
    async fn write(&self, mut txn: StoreTxn, id: &str, payload: &Value) -> Result<Record> {
        let stored = txn
            .upsert(self.soup(), payload)
            .await
            .map_err(RepoOperationError::store("write record"))?;
        let held = self.commit(txn).await?;
        Ok(self.publish(id, &stored, held)?)
    }

    /// Patch the snapshot with a committed payload. The write lock is held
    /// until the patch is visible.
    fn publish(
        &self,
        id: &str,
        stored: &Value,
        _held: WriteGuard,
    ) -> std::result::Result<Record, RepoOperationError> {
        match self.schema.coerce(stored) {
            Ok(record) => {
                let patch = record.clone();
                self.snapshot
                    .send_if_modified(move |snapshot| Arc::make_mut(snapshot).upsert(patch));
                Ok(record)
            }
            Err(source) => {
                self.forget(&[id]);
                tracing::warn!(soup = %self.soup(), id = %id, error = %source, "Written record is unreadable");
                Err(RepoOperationError::InvalidResultObject { source })
            }
        }
    }

    fn forget(&self, ids: &[&str]) {
        self.snapshot.send_if_modified(|snapshot| {
            if !ids.iter().any(|id| snapshot.contains(id)) {
                return false;
            }
            Arc::make_mut(snapshot).remove_all(ids)
        });
    }
}
