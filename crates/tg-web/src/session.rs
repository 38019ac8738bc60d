//! Persisted-session endpoints: upsert, paginated listing, command log, and
//! list-filter options.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use broker_core::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_store::{AssetOption, SessionFilter};
use tracing::info;

use crate::{
    auth::CurrentUser,
    error::{ApiError, ApiFailure, HttpResponse},
    i18n::Lang,
    state::AppState,
};
use tg_types::{SessionCmd, SessionRecord, SessionStatus};

#[derive(Debug, Serialize)]
pub struct ListData<T: Serialize> {
    pub list: Vec<T>,
    pub count: i64,
}

fn default_page_index() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

/// POST `/session` — upsert a session record. The external SSH gateway uses
/// this to announce CLIENT sessions coming online and going offline.
pub async fn upsert_session(
    State(state): State<AppState>,
    lang: Lang,
    Json(record): Json<SessionRecord>,
) -> Result<Json<HttpResponse<()>>, ApiFailure> {
    state_store::upsert_session(&state.pool, &record)
        .await
        .map_err(|e| ApiError::internal(e).localized(&lang))?;

    match record.status {
        SessionStatus::Online => {
            info!(session_id = %record.session_id, "registering gateway session");
            let session = Session::new(record, None, None);
            if !state.registry.insert_if_absent(session).await {
                return Err(ApiError::Internal("session id already registered".into()).localized(&lang));
            }
        }
        SessionStatus::Offline => {
            // Only status and closed_at change; the live entry (if any) is
            // reaped lazily at lookup time.
        }
    }

    Ok(Json(HttpResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    #[serde(default = "default_page_index")]
    pub page_index: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub search: Option<String>,
    pub status: Option<i64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub uid: Option<i64>,
    pub asset_id: Option<i64>,
    pub client_ip: Option<String>,
}

/// GET `/session` — paginated session list. Non-admins only see their own.
pub async fn get_sessions(
    State(state): State<AppState>,
    user: CurrentUser,
    lang: Lang,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<HttpResponse<ListData<SessionRecord>>>, ApiFailure> {
    let mut filter = SessionFilter {
        page_index: query.page_index,
        page_size: query.page_size,
        search: query.search,
        status: query.status,
        start: query.start,
        end: query.end,
        uid: query.uid,
        asset_id: query.asset_id,
        client_ip: query.client_ip,
    };
    if !user.is_admin() {
        filter.uid = Some(user.uid);
    }

    let (list, count) = state_store::list_sessions(&state.pool, &filter, Utc::now())
        .await
        .map_err(|e| ApiError::internal(e).localized(&lang))?;
    Ok(Json(HttpResponse::with_data(ListData { list, count })))
}

/// POST `/session/cmd` — record one command entry.
pub async fn create_session_cmd(
    State(state): State<AppState>,
    lang: Lang,
    Json(cmd): Json<SessionCmd>,
) -> Result<Json<HttpResponse<()>>, ApiFailure> {
    state_store::insert_session_cmd(&state.pool, &cmd)
        .await
        .map_err(|e| ApiError::internal(e).localized(&lang))?;
    Ok(Json(HttpResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct CmdListQuery {
    #[serde(default = "default_page_index")]
    pub page_index: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub search: Option<String>,
}

/// GET `/session/:session_id/cmd` — list recorded commands.
pub async fn get_session_cmds(
    State(state): State<AppState>,
    lang: Lang,
    Path(session_id): Path<String>,
    Query(query): Query<CmdListQuery>,
) -> Result<Json<HttpResponse<ListData<SessionCmd>>>, ApiFailure> {
    let (list, count) = state_store::list_session_cmds(
        &state.pool,
        &session_id,
        query.search.as_deref(),
        query.page_index,
        query.page_size,
    )
    .await
    .map_err(|e| ApiError::internal(e).localized(&lang))?;
    Ok(Json(HttpResponse::with_data(ListData { list, count })))
}

/// GET `/session/option/asset` — asset id/name pairs for list filters.
pub async fn get_session_option_asset(
    State(state): State<AppState>,
    lang: Lang,
) -> Result<Json<HttpResponse<Vec<AssetOption>>>, ApiFailure> {
    let options = state_store::list_asset_options(&state.pool)
        .await
        .map_err(|e| ApiError::internal(e).localized(&lang))?;
    Ok(Json(HttpResponse::with_data(options)))
}

/// GET `/session/option/clientip` — distinct client IPs for list filters.
pub async fn get_session_option_client_ip(
    State(state): State<AppState>,
    lang: Lang,
) -> Result<Json<HttpResponse<Vec<String>>>, ApiFailure> {
    let ips = state_store::list_client_ips(&state.pool)
        .await
        .map_err(|e| ApiError::internal(e).localized(&lang))?;
    Ok(Json(HttpResponse::with_data(ips)))
}
