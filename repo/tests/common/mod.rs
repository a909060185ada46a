//! Shared setup for repository integration tests.

#![allow(dead_code)]

use serde_json::{Map, Value};
use std::sync::Arc;
use tether_engine::contact::{self, Contact};
use tether_repo::sync::{MemoryRemote, SyncBridge, SyncDownTarget, SyncOptions, SyncUpTarget};
use tether_repo::{Account, RepoSettings, Store, SyncableRepo};

pub const SOUP: &str = contact::SOUP_NAME;
pub const DOWN: &str = contact::SYNC_DOWN_NAME;
pub const UP: &str = contact::SYNC_UP_NAME;

pub struct Harness {
    pub store: Store,
    pub remote: MemoryRemote,
    pub bridge: Arc<SyncBridge>,
    pub repo: SyncableRepo,
}

/// A Contact repository over an in-memory store, with both syncs defined.
pub async fn harness() -> Harness {
    let store = Store::open_in_memory(Account::new("005000000000001", "00D000000000001"))
        .await
        .unwrap();
    let remote = MemoryRemote::new(store.clone());
    let bridge = SyncBridge::new_shared(Arc::new(remote.clone()));

    bridge
        .sync_down(
            SyncDownTarget::new(contact::OBJECT_TYPE, Vec::<String>::new()),
            SyncOptions::default(),
            SOUP,
            DOWN,
        )
        .await
        .unwrap();
    bridge
        .sync_up(SyncUpTarget::default(), SyncOptions::default(), SOUP, UP)
        .await
        .unwrap();

    let repo = SyncableRepo::open(
        store.clone(),
        Arc::clone(&bridge),
        RepoSettings::contacts(),
        contact::schema(),
    )
    .await
    .unwrap();

    Harness {
        store,
        remote,
        bridge,
        repo,
    }
}

pub fn contact(first: &str, last: &str) -> Map<String, Value> {
    Contact::new(last).with_first_name(first).to_fields()
}

pub fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// Write a payload straight into the soup, bypassing the repository.
pub async fn write_raw(store: &Store, payload: Value) {
    let mut txn = store.begin().await.unwrap();
    txn.upsert(SOUP, &payload).await.unwrap();
    drop(txn.commit().await.unwrap());
}

/// Make every write to the soup table fail while reads keep working.
pub async fn reject_writes(store: &Store) {
    for event in ["INSERT", "UPDATE", "DELETE"] {
        let sql = format!(
            "CREATE TRIGGER reject_{event} BEFORE {event} ON soup_entries \
             BEGIN SELECT RAISE(ABORT, 'soup is read only'); END"
        );
        sqlx::query(&sql).execute(store.pool()).await.unwrap();
    }
}

pub async fn accept_writes(store: &Store) {
    for event in ["INSERT", "UPDATE", "DELETE"] {
        let sql = format!("DROP TRIGGER reject_{event}");
        sqlx::query(&sql).execute(store.pool()).await.unwrap();
    }
}
