//! Configuration for the store and the repositories built on it.

use serde::{Deserialize, Serialize};
use std::env;
use tether_engine::contact;

/// Number of records read by a full refresh.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// The signed-in user a store belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub user_id: Option<String>,
    pub org_id: Option<String>,
}

impl Account {
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            org_id: Some(org_id.into()),
        }
    }

    /// Label used in log lines.
    pub fn label(&self) -> String {
        match (&self.user_id, &self.org_id) {
            (Some(user), Some(org)) => format!("{user}@{org}"),
            (Some(user), None) => user.clone(),
            _ => "anonymous".to_string(),
        }
    }
}

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite connection URL
    pub database_url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
    /// Records read by a full refresh
    pub page_size: usize,
    /// Owner of the store
    pub account: Account,
}

impl StoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("TETHER_DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let max_connections = match env::var("TETHER_MAX_CONNECTIONS") {
            Ok(value) => value
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidMaxConnections(value))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        let page_size = match env::var("TETHER_PAGE_SIZE") {
            Ok(value) => value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidPageSize(value))?,
            Err(_) => DEFAULT_PAGE_SIZE,
        };

        let account = Account {
            user_id: env::var("TETHER_USER_ID").ok(),
            org_id: env::var("TETHER_ORG_ID").ok(),
        };

        Ok(Self {
            database_url,
            max_connections,
            page_size,
            account,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TETHER_DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid TETHER_MAX_CONNECTIONS value: {0}")]
    InvalidMaxConnections(String),

    #[error("Invalid TETHER_PAGE_SIZE value: {0}")]
    InvalidPageSize(String),
}

/// Names a repository uses to reach its soup and its syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSettings {
    pub soup_name: String,
    pub sync_down_name: String,
    pub sync_up_name: String,
    pub page_size: usize,
}

impl RepoSettings {
    pub fn new(
        soup_name: impl Into<String>,
        sync_down_name: impl Into<String>,
        sync_up_name: impl Into<String>,
    ) -> Self {
        Self {
            soup_name: soup_name.into(),
            sync_down_name: sync_down_name.into(),
            sync_up_name: sync_up_name.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Settings for the Contact repository.
    pub fn contacts() -> Self {
        Self::new(
            contact::SOUP_NAME,
            contact::SYNC_DOWN_NAME,
            contact::SYNC_UP_NAME,
        )
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}
