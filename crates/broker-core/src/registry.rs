//! Process-local registry of live sessions.
//!
//! Injected into the HTTP surface as a service; `Create` inserts, teardown
//! deletes, everything else reads.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::session::Session;
use state_store::DbResult;
use tg_types::SessionType;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Atomic insert; returns false when the id is already taken. A duplicate
    /// id is an internal error the caller surfaces.
    pub async fn insert_if_absent(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session.session_id()) {
            return false;
        }
        sessions.insert(session.session_id().to_string(), session);
        true
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Snapshot of the live sessions; used only by health/monitor paths.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Rebuild the registry from persisted ONLINE records at startup.
    ///
    /// WEB records are stale after a restart (their live channels are gone)
    /// and are transitioned to OFFLINE. CLIENT records keep living in the
    /// external gateway, so they are re-inserted with a fresh monitors map
    /// and no channel bundle.
    pub async fn rehydrate(&self, pool: &SqlitePool) -> DbResult<()> {
        let records = state_store::list_online_sessions(pool).await?;
        for record in records {
            match record.session_type {
                SessionType::Web => {
                    info!(session_id = %record.session_id, "marking stale web session offline");
                    state_store::mark_session_offline(pool, &record.session_id, Utc::now()).await?;
                    self.teardown(&record.session_id, "", "").await;
                }
                SessionType::Client => {
                    let session = Session::new(record, None, None);
                    if !self.insert_if_absent(session).await {
                        warn!("duplicate client session id during rehydration");
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove a session and notify its participants: the multiplexer via the
    /// close channel (1 s guarded, skipped for an empty closer), monitors via
    /// a final localized notice. Returns false for ids not registered.
    pub async fn teardown(&self, session_id: &str, closer: &str, end_notice: &str) -> bool {
        let Some(session) = self.remove(session_id).await else {
            return false;
        };
        if !closer.is_empty()
            && let Some(chans) = &session.chans
            && !chans.send_close(closer.to_string()).await
        {
            warn!(session_id, closer, "close signal not received in time");
        }
        session.close_monitors(end_notice).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tg_types::{SessionRecord, SessionStatus};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{chans::make_chans, session::MonitorEvent};

    fn record(session_id: &str, session_type: SessionType) -> SessionRecord {
        SessionRecord {
            id: 0,
            session_type,
            session_id: session_id.to_string(),
            uid: 1,
            user_name: "alice".into(),
            asset_id: 0,
            asset_info: String::new(),
            account_id: 0,
            account_info: String::new(),
            gateway_id: 0,
            gateway_info: String::new(),
            client_ip: String::new(),
            protocol: "ssh".into(),
            status: SessionStatus::Online,
            created_at: Utc::now(),
            closed_at: None,
            cmd_count: 0,
            duration: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let registry = SessionRegistry::new();
        let first = Session::new(record("dup", SessionType::Web), None, None);
        let second = Session::new(record("dup", SessionType::Web), None, None);

        assert!(registry.insert_if_absent(first).await);
        assert!(!registry.insert_if_absent(second).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn teardown_removes_and_notifies_monitors() {
        let registry = SessionRegistry::new();
        let (chans, _driver, _mux, _rx) = make_chans();
        let session = Session::new(record("t", SessionType::Web), Some(Arc::new(chans)), None);
        let (sink, mut events) = mpsc::channel(4);
        session.add_monitor("9-t-1".into(), sink).await;
        registry.insert_if_absent(session).await;

        assert!(registry.teardown("t", "", "session t ended").await);
        assert!(registry.get("t").await.is_none());
        assert_eq!(events.recv().await, Some(MonitorEvent::Closed("session t ended".into())));

        // Idempotent for unknown ids.
        assert!(!registry.teardown("t", "admin", "").await);
    }

    #[tokio::test]
    async fn teardown_sends_closer_under_timeout() {
        let registry = SessionRegistry::new();
        let (chans, _driver, mut mux, _rx) = make_chans();
        let session = Session::new(record("c", SessionType::Web), Some(Arc::new(chans)), None);
        registry.insert_if_absent(session).await;

        assert!(registry.teardown("c", "admin", "").await);
        assert_eq!(mux.close_rx.recv().await.as_deref(), Some("admin"));
    }
}
