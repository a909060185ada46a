//! Turns the callback driven [`SyncEngine`] API into futures.
//!
//! Each in-flight request is an entry in a pending table keyed by sync name.
//! The engine callback resolves the entry when the sync reaches a terminal
//! state; progress states are ignored.

use super::engine::{
    EngineError, GhostCallback, SyncCallback, SyncDownTarget, SyncEngine, SyncOptions, SyncState,
    SyncStatus, SyncUpTarget,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Why a bridged request did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Request for '{name}' already pending")]
    AlreadyPending { name: String },

    #[error("Failed to start: {0}")]
    NotStarted(#[source] EngineError),

    #[error("Ended in {:?}: {}", .state.status, .state.error.as_deref().unwrap_or("no error reported"))]
    Unsuccessful { state: SyncState },

    #[error("Engine dropped the callback for '{name}' before completion")]
    Abandoned { name: String },

    #[error("Engine reported an error: {0}")]
    Failed(#[source] EngineError),
}

impl BridgeError {
    /// Whether the engine never began the operation.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::AlreadyPending { .. } | BridgeError::NotStarted(_)
        )
    }

    /// The terminal state, when the engine reported one.
    pub fn state(&self) -> Option<&SyncState> {
        match self {
            BridgeError::Unsuccessful { state } => Some(state),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Waiting requests, one per name.
struct PendingTable<T> {
    entries: DashMap<String, (u64, oneshot::Sender<T>)>,
    next_ticket: AtomicU64,
}

impl<T: Send + 'static> PendingTable<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            next_ticket: AtomicU64::new(1),
        })
    }

    /// Claim `name`. `None` when a request for it is already waiting.
    fn register(self: &Arc<Self>, name: &str) -> Option<(Completion<T>, oneshot::Receiver<T>)> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                vacant.insert((ticket, tx));
                let completion = Completion {
                    table: Arc::clone(self),
                    name: name.to_string(),
                    ticket,
                };
                Some((completion, rx))
            }
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The callback side of a pending entry.
///
/// Dropping it unresolved removes the entry, which wakes the waiter with a
/// closed channel. The ticket keeps a late drop from touching a newer
/// request for the same name.
struct Completion<T: Send + 'static> {
    table: Arc<PendingTable<T>>,
    name: String,
    ticket: u64,
}

impl<T: Send + 'static> Completion<T> {
    fn complete(&self, value: T) {
        if let Some((_, (_, tx))) = self
            .table
            .entries
            .remove_if(&self.name, |_, (ticket, _)| *ticket == self.ticket)
        {
            let _ = tx.send(value);
        }
    }
}

impl<T: Send + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        self.table
            .entries
            .remove_if(&self.name, |_, (ticket, _)| *ticket == self.ticket);
    }
}

/// Async front end to a [`SyncEngine`].
pub struct SyncBridge {
    engine: Arc<dyn SyncEngine>,
    pending_syncs: Arc<PendingTable<SyncState>>,
    pending_cleanups: Arc<PendingTable<std::result::Result<usize, EngineError>>>,
}

impl SyncBridge {
    pub fn new(engine: Arc<dyn SyncEngine>) -> Self {
        Self {
            engine,
            pending_syncs: PendingTable::new(),
            pending_cleanups: PendingTable::new(),
        }
    }

    /// Create a new bridge wrapped in an Arc for shared ownership.
    pub fn new_shared(engine: Arc<dyn SyncEngine>) -> Arc<Self> {
        Arc::new(Self::new(engine))
    }

    pub fn engine(&self) -> &Arc<dyn SyncEngine> {
        &self.engine
    }

    /// Whether a sync or cleanup for `name` is waiting on the engine.
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending_syncs.contains(name) || self.pending_cleanups.contains(name)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_syncs.len() + self.pending_cleanups.len()
    }

    /// Define and run a sync down, waiting for it to finish.
    pub async fn sync_down(
        &self,
        target: SyncDownTarget,
        options: SyncOptions,
        soup: &str,
        name: &str,
    ) -> Result<SyncState> {
        self.run_sync(name, |callback| {
            self.engine.sync_down(target, options, soup, name, callback)
        })
        .await
    }

    /// Define and run a sync up, waiting for it to finish.
    pub async fn sync_up(
        &self,
        target: SyncUpTarget,
        options: SyncOptions,
        soup: &str,
        name: &str,
    ) -> Result<SyncState> {
        self.run_sync(name, |callback| {
            self.engine.sync_up(target, options, soup, name, callback)
        })
        .await
    }

    /// Run a defined sync again, waiting for it to finish.
    pub async fn re_sync(&self, name: &str) -> Result<SyncState> {
        self.run_sync(name, |callback| self.engine.re_sync(name, callback))
            .await
    }

    /// Clean ghosts of a sync down, returning the number of records removed.
    pub async fn clean_resync_ghosts(&self, name: &str) -> Result<usize> {
        let (completion, rx) =
            self.pending_cleanups
                .register(name)
                .ok_or_else(|| BridgeError::AlreadyPending {
                    name: name.to_string(),
                })?;

        let callback: GhostCallback = Box::new(move |outcome| completion.complete(outcome));
        self.engine
            .clean_resync_ghosts(name, callback)
            .map_err(BridgeError::NotStarted)?;

        match rx.await {
            Ok(Ok(removed)) => Ok(removed),
            Ok(Err(err)) => Err(BridgeError::Failed(err)),
            Err(_) => Err(BridgeError::Abandoned {
                name: name.to_string(),
            }),
        }
    }

    async fn run_sync<F>(&self, name: &str, start: F) -> Result<SyncState>
    where
        F: FnOnce(SyncCallback) -> std::result::Result<SyncState, EngineError>,
    {
        let (completion, rx) =
            self.pending_syncs
                .register(name)
                .ok_or_else(|| BridgeError::AlreadyPending {
                    name: name.to_string(),
                })?;

        let callback: SyncCallback = Box::new(move |state: SyncState| {
            tracing::trace!(sync = %state.name, status = ?state.status, progress = state.progress, "Sync progress");
            if state.status.is_terminal() {
                completion.complete(state);
            }
        });

        // On a start failure the engine drops the callback, which clears
        // the pending entry.
        let started = start(callback).map_err(BridgeError::NotStarted)?;
        tracing::debug!(sync = %name, sync_id = started.id, "Sync started");

        match rx.await {
            Ok(state) if state.status == SyncStatus::Done => Ok(state),
            Ok(state) => Err(BridgeError::Unsuccessful { state }),
            Err(_) => Err(BridgeError::Abandoned {
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::engine::SyncDirection;
    use std::sync::Mutex;

    /// Engine that hands callbacks back to the test instead of running.
    #[derive(Default)]
    struct ManualEngine {
        callbacks: Mutex<Vec<SyncCallback>>,
        ghost_callbacks: Mutex<Vec<GhostCallback>>,
        refuse: bool,
    }

    impl ManualEngine {
        fn take_callback(&self) -> SyncCallback {
            self.callbacks.lock().unwrap().pop().unwrap()
        }
    }

    impl SyncEngine for ManualEngine {
        fn sync_down(
            &self,
            _target: SyncDownTarget,
            _options: SyncOptions,
            _soup: &str,
            name: &str,
            callback: SyncCallback,
        ) -> std::result::Result<SyncState, EngineError> {
            self.re_sync(name, callback)
        }

        fn sync_up(
            &self,
            _target: SyncUpTarget,
            _options: SyncOptions,
            _soup: &str,
            name: &str,
            callback: SyncCallback,
        ) -> std::result::Result<SyncState, EngineError> {
            self.re_sync(name, callback)
        }

        fn re_sync(
            &self,
            name: &str,
            callback: SyncCallback,
        ) -> std::result::Result<SyncState, EngineError> {
            if self.refuse {
                return Err(EngineError::AlreadyRunning(name.into()));
            }
            self.callbacks.lock().unwrap().push(callback);
            Ok(SyncState::new(1, name, "soup", SyncDirection::Down))
        }

        fn clean_resync_ghosts(
            &self,
            _name: &str,
            callback: GhostCallback,
        ) -> std::result::Result<(), EngineError> {
            self.ghost_callbacks.lock().unwrap().push(callback);
            Ok(())
        }
    }

    fn state(status: SyncStatus) -> SyncState {
        SyncState::new(1, "syncDown", "soup", SyncDirection::Down).with_status(status)
    }

    async fn wait_for_callback(engine: &ManualEngine) {
        while engine.callbacks.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn only_terminal_states_resolve() {
        let engine = Arc::new(ManualEngine::default());
        let bridge = Arc::new(SyncBridge::new(engine.clone()));

        let waiter = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.re_sync("syncDown").await }
        });
        wait_for_callback(&engine).await;
        assert!(bridge.is_pending("syncDown"));

        let mut callback = engine.take_callback();
        callback(state(SyncStatus::Running));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        callback(state(SyncStatus::Done));
        let done = waiter.await.unwrap().unwrap();
        assert_eq!(done.status, SyncStatus::Done);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn failed_state_is_unsuccessful() {
        let engine = Arc::new(ManualEngine::default());
        let bridge = Arc::new(SyncBridge::new(engine.clone()));

        let waiter = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.re_sync("syncDown").await }
        });
        wait_for_callback(&engine).await;
        engine.take_callback()(state(SyncStatus::Stopped));

        let err = waiter.await.unwrap().unwrap_err();
        assert!(!err.is_start_failure());
        assert_eq!(err.state().unwrap().status, SyncStatus::Stopped);
    }

    #[tokio::test]
    async fn second_request_for_pending_name_fails_to_start() {
        let engine = Arc::new(ManualEngine::default());
        let bridge = Arc::new(SyncBridge::new(engine.clone()));

        let first = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.re_sync("syncDown").await }
        });
        wait_for_callback(&engine).await;

        let err = bridge.re_sync("syncDown").await.unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyPending { .. }));

        engine.take_callback()(state(SyncStatus::Done));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn refused_start_clears_pending_entry() {
        let engine = Arc::new(ManualEngine {
            refuse: true,
            ..ManualEngine::default()
        });
        let bridge = SyncBridge::new(engine);

        let err = bridge.re_sync("syncDown").await.unwrap_err();
        assert!(err.is_start_failure());
        assert!(!bridge.is_pending("syncDown"));
    }

    #[tokio::test]
    async fn dropped_callback_is_abandoned() {
        let engine = Arc::new(ManualEngine::default());
        let bridge = Arc::new(SyncBridge::new(engine.clone()));

        let waiter = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.re_sync("syncDown").await }
        });
        wait_for_callback(&engine).await;
        drop(engine.take_callback());

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Abandoned { .. }));
        assert!(!bridge.is_pending("syncDown"));
    }

    #[tokio::test]
    async fn ghost_cleanup_reports_count() {
        let engine = Arc::new(ManualEngine::default());
        let bridge = Arc::new(SyncBridge::new(engine.clone()));

        let waiter = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.clean_resync_ghosts("syncDown").await }
        });
        while engine.ghost_callbacks.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let callback = engine.ghost_callbacks.lock().unwrap().pop().unwrap();
        callback(Ok(3));

        assert_eq!(waiter.await.unwrap().unwrap(), 3);
    }
}
