use broker_core::SessionRegistry;
use chrono::Utc;
use state_store::test_support::SqliteTestDbFactory;
use tg_types::{SessionRecord, SessionStatus, SessionType};

fn record(session_id: &str, session_type: SessionType) -> SessionRecord {
    SessionRecord {
        id: 0,
        session_type,
        session_id: session_id.to_string(),
        uid: 4,
        user_name: "carol".into(),
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
async fn rehydrate_keeps_client_sessions_and_retires_web_ones() {
    let factory = SqliteTestDbFactory::new();
    let db = factory.server_db().await.unwrap();

    state_store::upsert_session(&db.pool, &record("stale-web", SessionType::Web))
        .await
        .unwrap();
    state_store::upsert_session(&db.pool, &record("gw-client", SessionType::Client))
        .await
        .unwrap();

    let registry = SessionRegistry::new();
    registry.rehydrate(&db.pool).await.unwrap();

    // The broker cannot resume a web session's channels after a restart.
    assert!(registry.get("stale-web").await.is_none());
    assert!(
        state_store::fetch_online_session(&db.pool, "stale-web")
            .await
            .unwrap()
            .is_none()
    );

    // Client sessions live in the external gateway and stay online.
    let client = registry.get("gw-client").await.expect("client session rehydrated");
    assert_eq!(client.session_type(), SessionType::Client);
    assert!(client.chans.is_none());
    assert!(!client.has_monitors().await);
    assert!(
        state_store::fetch_online_session(&db.pool, "gw-client")
            .await
            .unwrap()
            .is_some()
    );
}
