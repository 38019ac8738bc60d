//! Router assembly and the HTTP listener.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde_json::{Value, json};
use tracing::info;

use crate::{connect, error::HttpResponse, replay, session, state::AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/connect/{asset_id}/{account_id}/{protocol}", post(connect::connect_create))
        .route("/connect/{session_id}", get(connect::connect_session))
        .route("/connect/monitor/{session_id}", get(connect::connect_monitor))
        .route("/connect/close/{session_id}", post(connect::connect_close))
        .route("/session", post(session::upsert_session).get(session::get_sessions))
        .route("/session/cmd", post(session::create_session_cmd))
        .route("/session/{session_id}/cmd", get(session::get_session_cmds))
        .route("/session/option/asset", get(session::get_session_option_asset))
        .route("/session/option/clientip", get(session::get_session_option_client_ip))
        .route(
            "/session/replay/{session_id}",
            post(replay::create_session_replay).get(replay::get_session_replay),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HttpResponse<Value>> {
    let online = state.registry.snapshot().await;
    Json(HttpResponse::with_data(json!({
        "online_sessions": online.len(),
    })))
}

/// Bind and serve until the process is stopped.
pub async fn run_web_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "starting session broker");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
