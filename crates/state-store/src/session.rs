//! Session record and command-log queries.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, prelude::FromRow};
use tg_types::{SessionCmd, SessionRecord, SessionStatus};

use crate::DbResult;

const SESSION_COLUMNS: &str = "id, session_type, session_id, uid, user_name, asset_id, asset_info, \
     account_id, account_info, gateway_id, gateway_info, client_ip, protocol, status, created_at, closed_at";

/// Insert a session record, or update `status` and `closed_at` when one with
/// the same `session_id` already exists. Everything else is immutable once
/// written.
pub async fn upsert_session(pool: &SqlitePool, record: &SessionRecord) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO sessions (session_type, session_id, uid, user_name, asset_id, asset_info, \
         account_id, account_info, gateway_id, gateway_info, client_ip, protocol, status, created_at, closed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(session_id) DO UPDATE SET status = excluded.status, closed_at = excluded.closed_at",
    )
    .bind(record.session_type)
    .bind(&record.session_id)
    .bind(record.uid)
    .bind(&record.user_name)
    .bind(record.asset_id)
    .bind(&record.asset_info)
    .bind(record.account_id)
    .bind(&record.account_info)
    .bind(record.gateway_id)
    .bind(&record.gateway_info)
    .bind(&record.client_ip)
    .bind(&record.protocol)
    .bind(record.status)
    .bind(record.created_at)
    .bind(record.closed_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a session that is still marked ONLINE.
pub async fn fetch_online_session(pool: &SqlitePool, session_id: &str) -> DbResult<Option<SessionRecord>> {
    let record = sqlx::query_as::<_, SessionRecord>(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ? AND status = ?"
    ))
    .bind(session_id)
    .bind(SessionStatus::Online)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

/// All ONLINE records; used to rehydrate the live registry at startup.
pub async fn list_online_sessions(pool: &SqlitePool) -> DbResult<Vec<SessionRecord>> {
    let records = sqlx::query_as::<_, SessionRecord>(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = ?"
    ))
    .bind(SessionStatus::Online)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Transition a record out of ONLINE, stamping `closed_at`. A no-op for
/// records already OFFLINE.
pub async fn mark_session_offline(pool: &SqlitePool, session_id: &str, closed_at: DateTime<Utc>) -> DbResult<()> {
    sqlx::query("UPDATE sessions SET status = ?, closed_at = ? WHERE session_id = ? AND status = ?")
        .bind(SessionStatus::Offline)
        .bind(closed_at)
        .bind(session_id)
        .bind(SessionStatus::Online)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_online_by_session_id(pool: &SqlitePool, session_id: &str) -> DbResult<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sessions WHERE session_id = ? AND status = ?")
        .bind(session_id)
        .bind(SessionStatus::Online)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Filters for the paginated session list.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub page_index: i64,
    pub page_size: i64,
    /// Matched (LIKE) against user_name, asset_info, gateway_info, account_info.
    pub search: Option<String>,
    pub status: Option<i64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub uid: Option<i64>,
    pub asset_id: Option<i64>,
    pub client_ip: Option<String>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &SessionFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        qb.push(" AND (user_name LIKE ").push_bind(pattern.clone());
        qb.push(" OR asset_info LIKE ").push_bind(pattern.clone());
        qb.push(" OR gateway_info LIKE ").push_bind(pattern.clone());
        qb.push(" OR account_info LIKE ").push_bind(pattern);
        qb.push(")");
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(start) = filter.start {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND created_at <= ").push_bind(end);
    }
    if let Some(uid) = filter.uid {
        qb.push(" AND uid = ").push_bind(uid);
    }
    if let Some(asset_id) = filter.asset_id {
        qb.push(" AND asset_id = ").push_bind(asset_id);
    }
    if let Some(client_ip) = &filter.client_ip {
        qb.push(" AND client_ip = ").push_bind(client_ip.clone());
    }
}

/// Paginated session list with `cmd_count` joined in and `duration` computed
/// against `now`. Returns the page plus the unpaginated total.
pub async fn list_sessions(
    pool: &SqlitePool,
    filter: &SessionFilter,
    now: DateTime<Utc>,
) -> DbResult<(Vec<SessionRecord>, i64)> {
    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM sessions");
    push_filters(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::new(format!(
        "SELECT {SESSION_COLUMNS}, \
         (SELECT COUNT(*) FROM session_cmds c WHERE c.session_id = sessions.session_id) AS cmd_count \
         FROM sessions"
    ));
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY created_at DESC");
    let page_size = filter.page_size.max(1);
    let offset = (filter.page_index.max(1) - 1) * page_size;
    qb.push(" LIMIT ").push_bind(page_size);
    qb.push(" OFFSET ").push_bind(offset);

    let mut records: Vec<SessionRecord> = qb.build_query_as().fetch_all(pool).await?;
    for record in &mut records {
        let closed = record.closed_at.unwrap_or(now);
        record.duration = (closed - record.created_at).num_seconds();
    }
    Ok((records, total))
}

pub async fn insert_session_cmd(pool: &SqlitePool, cmd: &SessionCmd) -> DbResult<()> {
    sqlx::query("INSERT INTO session_cmds (session_id, cmd, result, level, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&cmd.session_id)
        .bind(&cmd.cmd)
        .bind(&cmd.result)
        .bind(cmd.level)
        .bind(cmd.created_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Paginated command log for one session, optionally filtered by a search
/// term over `cmd` and `result`.
pub async fn list_session_cmds(
    pool: &SqlitePool,
    session_id: &str,
    search: Option<&str>,
    page_index: i64,
    page_size: i64,
) -> DbResult<(Vec<SessionCmd>, i64)> {
    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM session_cmds WHERE session_id = ");
    count_qb.push_bind(session_id);
    if let Some(search) = search {
        let pattern = format!("%{search}%");
        count_qb.push(" AND (cmd LIKE ").push_bind(pattern.clone());
        count_qb.push(" OR result LIKE ").push_bind(pattern);
        count_qb.push(")");
    }
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::new(
        "SELECT id, session_id, cmd, result, level, created_at FROM session_cmds WHERE session_id = ",
    );
    qb.push_bind(session_id);
    if let Some(search) = search {
        let pattern = format!("%{search}%");
        qb.push(" AND (cmd LIKE ").push_bind(pattern.clone());
        qb.push(" OR result LIKE ").push_bind(pattern);
        qb.push(")");
    }
    qb.push(" ORDER BY id");
    let page_size = page_size.max(1);
    let offset = (page_index.max(1) - 1) * page_size;
    qb.push(" LIMIT ").push_bind(page_size);
    qb.push(" OFFSET ").push_bind(offset);

    let cmds: Vec<SessionCmd> = qb.build_query_as().fetch_all(pool).await?;
    Ok((cmds, total))
}

/// Asset id/name pairs offered as list filter options.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct AssetOption {
    pub id: i64,
    pub name: String,
}

pub async fn list_asset_options(pool: &SqlitePool) -> DbResult<Vec<AssetOption>> {
    let options = sqlx::query_as::<_, AssetOption>("SELECT id, name FROM assets ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(options)
}

pub async fn list_client_ips(pool: &SqlitePool) -> DbResult<Vec<String>> {
    let rows = sqlx::query("SELECT DISTINCT client_ip FROM sessions ORDER BY client_ip")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| r.get::<String, _>("client_ip")).collect())
}
