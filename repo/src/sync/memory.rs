//! An in-process sync engine.
//!
//! `MemoryRemote` keeps a map of remote records and syncs them with soups in
//! a [`Store`]. It behaves like a real engine at the boundary: calls return
//! once a sync has been started, work happens on a spawned task, and the
//! outcome arrives through the callback. It also records how often it was
//! invoked and how many syncs overlapped, and can be told to fail.

use super::engine::{
    EngineError, GhostCallback, MergeMode, SyncCallback, SyncDirection, SyncDownTarget,
    SyncEngine, SyncOptions, SyncState, SyncStatus, SyncUpTarget,
};
use crate::store::{self, Store};
use dashmap::{DashMap, DashSet};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_engine::record::{ATTRIBUTES, ID, LOCAL_ID, TYPE};
use tether_engine::{is_reserved_key, RecordId, SyncFlags};

/// Prefix of ids minted for records created through a sync up.
pub const REMOTE_ID_PREFIX: &str = "003";

/// A failure to inject into the next matching operation of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Refuse to start
    Start,
    /// Run, then report `Failed`
    Finish,
    /// Run, then report `Stopped`
    Stop,
    /// Run, then drop the callback without a terminal state
    Abandon,
    /// Fail the next ghost cleanup
    Ghosts,
}

#[derive(Debug, Clone)]
enum SyncDefinition {
    Down {
        target: SyncDownTarget,
        options: SyncOptions,
    },
    Up {
        target: SyncUpTarget,
    },
}

#[derive(Debug, Clone)]
struct SyncConfig {
    id: u64,
    name: String,
    soup: String,
    definition: SyncDefinition,
}

impl SyncConfig {
    fn direction(&self) -> SyncDirection {
        match self.definition {
            SyncDefinition::Down { .. } => SyncDirection::Down,
            SyncDefinition::Up { .. } => SyncDirection::Up,
        }
    }
}

struct RemoteInner {
    store: Store,
    records: DashMap<RecordId, Map<String, Value>>,
    syncs: DashMap<String, SyncConfig>,
    running: DashSet<String>,
    failures: DashMap<String, Failure>,
    next_sync_id: AtomicU64,
    next_remote_id: AtomicU64,
    latency_ms: AtomicU64,
    invocations: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// In-process remote and sync engine.
#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<RemoteInner>,
}

impl MemoryRemote {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                store,
                records: DashMap::new(),
                syncs: DashMap::new(),
                running: DashSet::new(),
                failures: DashMap::new(),
                next_sync_id: AtomicU64::new(1),
                next_remote_id: AtomicU64::new(1),
                latency_ms: AtomicU64::new(0),
                invocations: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Delay every sync run by `latency` before it touches the store.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Make the next matching operation of sync `name` fail.
    pub fn inject_failure(&self, name: &str, failure: Failure) {
        self.inner.failures.insert(name.to_string(), failure);
    }

    /// Add a remote record, minting its id.
    pub fn insert(&self, object_type: &str, fields: Value) -> RecordId {
        let id = self.mint_id();
        self.put(&id, object_type, fields);
        id
    }

    /// Add or replace a remote record under a given id.
    pub fn put(&self, id: &str, object_type: &str, fields: Value) {
        let mut record: Map<String, Value> = fields
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| !is_reserved_key(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        record.insert(ID.into(), Value::String(id.to_string()));
        record.insert(ATTRIBUTES.into(), attributes(object_type));
        self.inner.records.insert(id.to_string(), record);
    }

    /// Merge fields into a remote record. Returns false if it does not exist.
    pub fn update(&self, id: &str, fields: Value) -> bool {
        let Some(mut record) = self.inner.records.get_mut(id) else {
            return false;
        };
        if let Some(obj) = fields.as_object() {
            for (key, value) in obj.iter().filter(|(k, _)| !is_reserved_key(k)) {
                record.insert(key.clone(), value.clone());
            }
        }
        true
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.records.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.inner
            .records
            .get(id)
            .map(|record| Value::Object(record.value().clone()))
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Number of sync runs started.
    pub fn invocations(&self) -> usize {
        self.inner.invocations.load(Ordering::SeqCst)
    }

    /// Largest number of sync runs that were in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.inner.running.contains(name)
    }

    fn mint_id(&self) -> RecordId {
        let n = self.inner.next_remote_id.fetch_add(1, Ordering::SeqCst);
        format!("{REMOTE_ID_PREFIX}{n:015}")
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.inner.latency_ms.load(Ordering::SeqCst))
    }

    fn take_failure(&self, name: &str, matches: impl Fn(Failure) -> bool) -> Option<Failure> {
        self.inner
            .failures
            .remove_if(name, |_, failure| matches(*failure))
            .map(|(_, failure)| failure)
    }

    fn define(&self, name: &str, soup: &str, definition: SyncDefinition) -> SyncConfig {
        let id = self
            .inner
            .syncs
            .get(name)
            .map(|existing| existing.id)
            .unwrap_or_else(|| self.inner.next_sync_id.fetch_add(1, Ordering::SeqCst));
        let config = SyncConfig {
            id,
            name: name.to_string(),
            soup: soup.to_string(),
            definition,
        };
        self.inner.syncs.insert(name.to_string(), config.clone());
        config
    }

    fn lookup(&self, name: &str) -> Result<SyncConfig, EngineError> {
        self.inner
            .syncs
            .get(name)
            .map(|config| config.value().clone())
            .ok_or_else(|| EngineError::UnknownSync(name.to_string()))
    }

    fn start(&self, config: SyncConfig, mut callback: SyncCallback) -> Result<SyncState, EngineError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        if self
            .take_failure(&config.name, |f| f == Failure::Start)
            .is_some()
        {
            return Err(EngineError::Unavailable(format!(
                "injected start failure for '{}'",
                config.name
            )));
        }
        if !self.inner.running.insert(config.name.clone()) {
            return Err(EngineError::AlreadyRunning(config.name));
        }

        self.inner.invocations.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .peak_in_flight
            .fetch_max(now_in_flight, Ordering::SeqCst);

        let state = SyncState::new(config.id, &config.name, &config.soup, config.direction());
        let remote = self.clone();
        let initial = state.clone();

        handle.spawn(async move {
            let running = state.with_status(SyncStatus::Running);
            callback(running.clone());

            let latency = remote.latency();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let injected = remote.take_failure(&config.name, |f| {
                matches!(f, Failure::Finish | Failure::Stop | Failure::Abandon)
            });
            let finished = match injected {
                Some(Failure::Abandon) => None,
                Some(Failure::Stop) => Some(running.with_status(SyncStatus::Stopped)),
                Some(_) => Some(failed(&running, "injected failure")),
                None => Some(match remote.run(&config).await {
                    Ok(total_size) => SyncState {
                        status: SyncStatus::Done,
                        progress: 100,
                        total_size,
                        ..running
                    },
                    Err(err) => {
                        tracing::warn!(sync = %config.name, error = %err, "Sync run failed");
                        failed(&running, &err.to_string())
                    }
                }),
            };

            remote.inner.running.remove(&config.name);
            remote.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

            match finished {
                Some(state) => callback(state),
                None => drop(callback),
            }
        });

        Ok(initial)
    }

    async fn run(&self, config: &SyncConfig) -> Result<usize, EngineError> {
        match &config.definition {
            SyncDefinition::Down { target, options } => {
                self.run_sync_down(&config.soup, target, *options).await
            }
            SyncDefinition::Up { target } => self.run_sync_up(&config.soup, target).await,
        }
    }

    /// Copy every remote record of the target type into the soup.
    async fn run_sync_down(
        &self,
        soup: &str,
        target: &SyncDownTarget,
        options: SyncOptions,
    ) -> Result<usize, EngineError> {
        let fetched: Vec<Map<String, Value>> = self
            .inner
            .records
            .iter()
            .filter(|record| object_type(record.value()) == Some(target.object_type.as_str()))
            .map(|record| project(record.value(), &target.fields))
            .collect();

        let mut txn = self.inner.store.begin().await?;
        let mut written = 0;
        for mut payload in fetched {
            let Some(id) = payload.get(ID).and_then(Value::as_str).map(str::to_string) else {
                continue;
            };

            if let Some(existing) = txn.find_by_record_id(soup, &id).await? {
                let existing = existing.as_object().cloned().unwrap_or_default();
                if options.merge_mode == MergeMode::LeaveIfChanged
                    && SyncFlags::read(&existing).local()
                {
                    tracing::debug!(soup = %soup, id = %id, "Keeping locally changed record");
                    continue;
                }
                if let Some(local_id) = existing.get(LOCAL_ID) {
                    payload.insert(LOCAL_ID.into(), local_id.clone());
                }
            }

            SyncFlags::clean().write(&mut payload);
            txn.upsert(soup, &Value::Object(payload)).await?;
            written += 1;
        }
        txn.commit().await?;

        Ok(written)
    }

    /// Push every locally changed entry of the soup to the remote.
    async fn run_sync_up(&self, soup: &str, target: &SyncUpTarget) -> Result<usize, EngineError> {
        let mut txn = self.inner.store.begin().await?;
        let mut pushed = 0;

        for payload in txn.locally_changed(soup).await? {
            let (Some(obj), Some(entry_id)) = (payload.as_object(), store::entry_id(&payload))
            else {
                continue;
            };
            let Some(id) = obj.get(ID).and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let flags = SyncFlags::read(obj);

            if flags.locally_deleted {
                if !flags.locally_created {
                    self.inner.records.remove(&id);
                }
                txn.delete(soup, entry_id).await?;
                pushed += 1;
                continue;
            }

            let remote_id = if flags.locally_created {
                let Some(object_type) = object_type(obj).map(str::to_string) else {
                    continue;
                };
                let remote_id = self.mint_id();
                let fields = Value::Object(project(obj, &target.create_fields));
                self.put(&remote_id, &object_type, fields);
                remote_id
            } else {
                let fields = Value::Object(project(obj, &target.update_fields));
                if !self.update(&id, fields) {
                    tracing::warn!(soup = %soup, id = %id, "Remote record is gone, keeping local changes");
                    continue;
                }
                id.clone()
            };

            let mut synced = obj.clone();
            if flags.locally_created {
                synced.insert(LOCAL_ID.into(), Value::String(id));
            }
            synced.insert(ID.into(), Value::String(remote_id));
            SyncFlags::clean().write(&mut synced);
            txn.upsert(soup, &Value::Object(synced)).await?;
            pushed += 1;
        }

        txn.commit().await?;
        Ok(pushed)
    }

    /// Delete synced entries whose remote record no longer exists.
    async fn remove_ghosts(&self, soup: &str, target: &SyncDownTarget) -> Result<usize, EngineError> {
        let remote_ids: HashSet<RecordId> = self
            .inner
            .records
            .iter()
            .filter(|record| object_type(record.value()) == Some(target.object_type.as_str()))
            .map(|record| record.key().clone())
            .collect();

        let mut txn = self.inner.store.begin().await?;
        let mut removed = 0;
        for (entry_id, record_id) in txn.synced_entries(soup).await? {
            if !remote_ids.contains(&record_id) {
                txn.delete(soup, entry_id).await?;
                removed += 1;
            }
        }
        txn.commit().await?;

        Ok(removed)
    }
}

impl SyncEngine for MemoryRemote {
    fn sync_down(
        &self,
        target: SyncDownTarget,
        options: SyncOptions,
        soup: &str,
        name: &str,
        callback: SyncCallback,
    ) -> Result<SyncState, EngineError> {
        let config = self.define(name, soup, SyncDefinition::Down { target, options });
        self.start(config, callback)
    }

    fn sync_up(
        &self,
        target: SyncUpTarget,
        _options: SyncOptions,
        soup: &str,
        name: &str,
        callback: SyncCallback,
    ) -> Result<SyncState, EngineError> {
        // Every locally changed entry is pushed, whatever the merge mode.
        let config = self.define(name, soup, SyncDefinition::Up { target });
        self.start(config, callback)
    }

    fn re_sync(&self, name: &str, callback: SyncCallback) -> Result<SyncState, EngineError> {
        let config = self.lookup(name)?;
        self.start(config, callback)
    }

    fn clean_resync_ghosts(&self, name: &str, callback: GhostCallback) -> Result<(), EngineError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        let SyncConfig {
            soup, definition, ..
        } = self.lookup(name)?;
        let SyncDefinition::Down { target, .. } = definition else {
            return Err(EngineError::NotSyncDown(name.to_string()));
        };
        let injected = self.take_failure(name, |f| f == Failure::Ghosts).is_some();

        let remote = self.clone();
        handle.spawn(async move {
            let outcome = if injected {
                Err(EngineError::Remote("injected ghost cleanup failure".into()))
            } else {
                remote.remove_ghosts(&soup, &target).await
            };
            callback(outcome);
        });

        Ok(())
    }
}

fn attributes(object_type: &str) -> Value {
    let mut attributes = Map::new();
    attributes.insert(TYPE.into(), Value::String(object_type.to_string()));
    Value::Object(attributes)
}

fn object_type(record: &Map<String, Value>) -> Option<&str> {
    record
        .get(ATTRIBUTES)
        .and_then(|attributes| attributes.get(TYPE))
        .and_then(Value::as_str)
}

/// Keep the id, the attributes and the listed fields. An empty list keeps
/// every non-reserved field.
fn project(record: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    record
        .iter()
        .filter(|(key, _)| {
            key.as_str() == ID
                || key.as_str() == ATTRIBUTES
                || (!is_reserved_key(key) && (fields.is_empty() || fields.contains(key)))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn failed(state: &SyncState, error: &str) -> SyncState {
    SyncState {
        status: SyncStatus::Failed,
        error: Some(error.to_string()),
        ..state.clone()
    }
}
