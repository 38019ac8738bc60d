use std::sync::Arc;

use anyhow::Result;
use broker_core::SessionRegistry;
use clap::Parser;
use tg_cli::ServerArgs;
use tg_web::AppState;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, reload, util::SubscriberInitExt};

fn init_tracing(log_level: Option<&str>) {
    let rust_log_set = matches!(std::env::var("RUST_LOG"), Ok(s) if !s.trim().is_empty());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
    broker_core::logging::set_reload_handle(handle, LevelFilter::INFO);

    // Environment configuration wins over the flag.
    if !rust_log_set && let Some(level) = log_level {
        let level = match level.to_lowercase().as_str() {
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO,
        };
        broker_core::logging::set_level(level);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.log_level.as_deref());
    let config = args.into_config();

    let db = state_store::server_db().await?;
    state_store::migrate_server(&db).await?;
    let pool = db.into_pool();

    let registry = Arc::new(SessionRegistry::new());
    registry.rehydrate(&pool).await?;

    let state = AppState::new(registry, pool, config);
    tg_web::run_web_server(state).await
}
