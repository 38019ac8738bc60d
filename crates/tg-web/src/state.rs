//! Shared handler state.

use std::sync::Arc;

use broker_core::SessionRegistry;
use sqlx::SqlitePool;
use tg_types::BrokerConfig;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub pool: SqlitePool,
    pub config: Arc<BrokerConfig>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, pool: SqlitePool, config: BrokerConfig) -> Self {
        Self {
            registry,
            pool,
            config: Arc::new(config),
        }
    }
}
