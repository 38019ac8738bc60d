//! Database initialization, migration, and connection management.

use std::{
    env,
    fs::OpenOptions,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions};
use tg_types::{DbHandle, DbLocation};
use tracing::warn;
use url::Url;

use crate::{DbError, DbResult};

static SERVER_MIGRATOR: Migrator = sqlx::migrate!("./migrations/server");

const SERVER_DB_ENV: &str = "TG_SERVER_DB_URL";

/// Return a human-friendly string describing where the server DB will live.
/// Prefers a filesystem path when available, otherwise returns the configured URL.
pub fn display_server_db_path() -> String {
    if let Ok(val) = env::var(SERVER_DB_ENV) {
        return val;
    }
    default_server_path().display().to_string()
}

/// Establish a pooled SQLite connection for broker state (sessions, command
/// log, directory). Location comes from `TG_SERVER_DB_URL` or a state-dir
/// default.
pub async fn server_db() -> DbResult<DbHandle> {
    let location = resolve_server_location().await?;
    init_pool(location).await
}

/// Open a pool at an explicit filesystem path. Used by tests and by
/// deployments that pin the DB location on the command line.
pub async fn server_db_from_path(path: &Path) -> DbResult<DbHandle> {
    let location = build_location_from_path(path.to_path_buf()).await?;
    init_pool(location).await
}

/// Apply the server migrations to the provided pool.
pub async fn migrate_server(handle: &DbHandle) -> DbResult<()> {
    SERVER_MIGRATOR.run(&handle.pool).await?;
    if handle.freshly_created {
        warn!(db = %display_path(handle), "initialized server database and applied migrations");
    }
    Ok(())
}

async fn resolve_server_location() -> DbResult<DbLocation> {
    if let Ok(value) = env::var(SERVER_DB_ENV) {
        return build_location_from_env(value).await;
    }

    build_location_from_path(default_server_path()).await
}

async fn build_location_from_env(value: String) -> DbResult<DbLocation> {
    if value.starts_with("sqlite:") {
        Ok(DbLocation {
            url: value,
            path: None,
            freshly_created: false,
        })
    } else {
        build_location_from_path(PathBuf::from(value)).await
    }
}

async fn build_location_from_path(path: PathBuf) -> DbResult<DbLocation> {
    let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DbError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    if !existed {
        let path_clone = path.clone();
        tokio::task::spawn_blocking(move || create_db_file(&path_clone))
            .await
            .map_err(|e| DbError::TaskPanicked(e.to_string()))??;
    }
    let url = sqlite_url_from_path(&path)?;
    Ok(DbLocation {
        url,
        path: Some(path),
        freshly_created: !existed,
    })
}

fn create_db_file(path: &Path) -> DbResult<()> {
    #[cfg(unix)]
    let result = {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new().create_new(true).write(true).mode(0o600).open(path)
    };
    #[cfg(not(unix))]
    let result = OpenOptions::new().create_new(true).write(true).open(path);

    match result {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(DbError::FileCreationFailed {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

fn sqlite_url_from_path(path: &Path) -> DbResult<String> {
    let url = Url::from_file_path(path).map_err(|_| DbError::InvalidPath(path.to_path_buf()))?;
    let mut url_string: String = url.into();
    url_string.replace_range(..4, "sqlite");
    Ok(url_string)
}

async fn init_pool(location: DbLocation) -> DbResult<DbHandle> {
    let max_connections = env::var("TG_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(20);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&location.url)
        .await
        .map_err(|e| DbError::ConnectionFailed {
            path: location.url.clone(),
            source: e,
        })?;

    Ok(DbHandle {
        pool,
        url: location.url,
        path: location.path,
        freshly_created: location.freshly_created,
    })
}

fn default_server_path() -> PathBuf {
    preferred_state_dir().join("termgate").join("server.db")
}

fn preferred_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| fallback_home().join(".local/state"))
}

fn fallback_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn display_path(handle: &DbHandle) -> String {
    handle
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| handle.url.clone())
}
