//! Tether Repo - inspect a local record store.
//!
//! Opens the configured store, brings its schema up to date, loads the
//! Contact soup through a repository and reports what it holds.

use std::sync::Arc;
use tether_engine::contact;
use tether_repo::sync::{MemoryRemote, SyncBridge};
use tether_repo::{RepoSettings, Store, StoreConfig, SyncableRepo};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_repo=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = StoreConfig::from_env()?;

    tracing::info!(
        database = %config.database_url,
        account = %config.account.label(),
        "Opening store"
    );

    // Open store and run migrations
    let store = Store::connect(&config).await?;

    // Nothing is synced from here, so the engine is the in-process one
    let remote = MemoryRemote::new(store.clone());
    let bridge = SyncBridge::new_shared(Arc::new(remote));
    let settings = RepoSettings::contacts().with_page_size(config.page_size);
    let repo = SyncableRepo::new(store.clone(), bridge, settings, contact::schema());

    let summary = repo.refresh_records_list_from_store().await?;
    let stored = store.count(&repo.settings().soup_name).await?;
    tracing::info!(
        soup = %repo.settings().soup_name,
        stored,
        loaded = summary.loaded,
        excluded = summary.excluded,
        "Soup loaded"
    );

    let snapshot = repo.snapshot();
    for (status, count) in snapshot.status_counts() {
        tracing::info!(status = %status, count, "Records by local status");
    }
    tracing::info!(pending = snapshot.pending_count(), "Records waiting for sync up");

    Ok(())
}
