//! Test utilities for fast, isolated SQLite databases.
//!
//! A migrated "template" DB is created once per factory and cloned for each
//! test, which keeps parallel test runs cheap and independent.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use sqlx::sqlite::SqlitePoolOptions;
use tg_types::DbHandle;
use tokio::sync::OnceCell;

use crate::{DbResult, migrate_server};

static CLONE_SEQ: AtomicU64 = AtomicU64::new(0);

fn unique_suffix() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let seq = CLONE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", std::process::id(), now, seq)
}

fn sqlite_url_from_path(path: &Path) -> DbResult<String> {
    let url = url::Url::from_file_path(path).map_err(|_| crate::DbError::InvalidPath(path.to_path_buf()))?;
    let mut url_string: String = url.into();
    url_string.replace_range(..4, "sqlite");
    Ok(url_string)
}

async fn connect_file_db(path: &Path, max_connections: u32) -> DbResult<DbHandle> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| crate::DbError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    let existed = tokio::fs::try_exists(path).await.unwrap_or(false);
    if !existed {
        tokio::fs::File::create(path).await.map_err(crate::DbError::Io)?;
    }

    let url = sqlite_url_from_path(path)?;
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await
        .map_err(|e| crate::DbError::ConnectionFailed {
            path: url.clone(),
            source: e,
        })?;

    // Tests prefer speed over durability.
    let _ = sqlx::query("PRAGMA journal_mode = MEMORY").execute(&pool).await;
    let _ = sqlx::query("PRAGMA synchronous = OFF").execute(&pool).await;

    Ok(DbHandle {
        pool,
        url,
        path: Some(path.to_path_buf()),
        freshly_created: true,
    })
}

/// Creates a migrated template DB file once and clones it per test.
#[derive(Debug)]
pub struct SqliteTestDbFactory {
    root: PathBuf,
    _tempdir: tempfile::TempDir,
    template: OnceCell<PathBuf>,
}

impl SqliteTestDbFactory {
    pub fn new() -> Self {
        let tempdir = tempfile::Builder::new()
            .prefix("termgate-testdb-")
            .tempdir()
            .expect("failed to create temporary directory for test DBs");
        Self {
            root: tempdir.path().to_path_buf(),
            _tempdir: tempdir,
            template: OnceCell::const_new(),
        }
    }

    async fn template_path(&self) -> DbResult<PathBuf> {
        let path = self
            .template
            .get_or_try_init(|| async {
                let template_path = self.root.join("template_server.db");
                let handle = connect_file_db(&template_path, 1).await?;
                migrate_server(&handle).await?;
                handle.pool.close().await;
                Ok::<_, crate::DbError>(template_path)
            })
            .await?;
        Ok(path.clone())
    }

    /// Create a migrated server DB for a single test case.
    pub async fn server_db(&self) -> DbResult<DbHandle> {
        let template = self.template_path().await?;
        let target = self.root.join(format!("server_{}.db", unique_suffix()));
        tokio::fs::copy(&template, &target).await.map_err(crate::DbError::Io)?;
        connect_file_db(&target, 1).await
    }
}

impl Default for SqliteTestDbFactory {
    fn default() -> Self {
        Self::new()
    }
}
