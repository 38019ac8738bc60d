//! Handle types for the SQLite state store.

use std::path::PathBuf;

use sqlx::SqlitePool;

/// A pooled connection to the server database plus where it lives.
#[derive(Debug, Clone)]
pub struct DbHandle {
    pub pool: SqlitePool,
    pub url: String,
    pub path: Option<PathBuf>,
    pub freshly_created: bool,
}

impl DbHandle {
    pub fn into_pool(self) -> SqlitePool {
        self.pool
    }
}

/// Resolved database location before a pool is opened.
#[derive(Debug, Clone)]
pub struct DbLocation {
    pub url: String,
    pub path: Option<PathBuf>,
    pub freshly_created: bool,
}
