use chrono::{Duration, Utc};
use state_store::{SessionFilter, test_support::SqliteTestDbFactory};
use tg_types::{SessionCmd, SessionRecord, SessionStatus, SessionType};

fn record(session_id: &str, status: SessionStatus) -> SessionRecord {
    SessionRecord {
        id: 0,
        session_type: SessionType::Web,
        session_id: session_id.to_string(),
        uid: 7,
        user_name: "alice".to_string(),
        asset_id: 1,
        asset_info: "web-1(10.0.0.5)".to_string(),
        account_id: 2,
        account_info: "root(root)".to_string(),
        gateway_id: 0,
        gateway_info: String::new(),
        client_ip: "192.168.1.9".to_string(),
        protocol: "ssh".to_string(),
        status,
        created_at: Utc::now(),
        closed_at: None,
        cmd_count: 0,
        duration: 0,
    }
}

#[tokio::test]
async fn upsert_then_fetch_online() {
    let factory = SqliteTestDbFactory::new();
    let db = factory.server_db().await.unwrap();

    state_store::upsert_session(&db.pool, &record("s-1", SessionStatus::Online))
        .await
        .unwrap();

    let fetched = state_store::fetch_online_session(&db.pool, "s-1").await.unwrap().unwrap();
    assert_eq!(fetched.user_name, "alice");
    assert_eq!(fetched.status, SessionStatus::Online);

    assert!(state_store::fetch_online_session(&db.pool, "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn offline_upsert_updates_only_status_and_closed_at() {
    let factory = SqliteTestDbFactory::new();
    let db = factory.server_db().await.unwrap();

    state_store::upsert_session(&db.pool, &record("s-2", SessionStatus::Online))
        .await
        .unwrap();

    // The gateway's offline notice carries a different user_name; only the
    // status transition may be applied.
    let mut offline = record("s-2", SessionStatus::Offline);
    offline.user_name = "mallory".to_string();
    offline.closed_at = Some(Utc::now());
    state_store::upsert_session(&db.pool, &offline).await.unwrap();

    assert!(state_store::fetch_online_session(&db.pool, "s-2").await.unwrap().is_none());
    let (page, total) = state_store::list_sessions(&db.pool, &session_filter(1, 10), Utc::now())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].user_name, "alice");
    assert_eq!(page[0].status, SessionStatus::Offline);
    assert!(page[0].closed_at.is_some());
}

#[tokio::test]
async fn mark_offline_stamps_closed_at() {
    let factory = SqliteTestDbFactory::new();
    let db = factory.server_db().await.unwrap();

    state_store::upsert_session(&db.pool, &record("s-3", SessionStatus::Online))
        .await
        .unwrap();
    let closed_at = Utc::now();
    state_store::mark_session_offline(&db.pool, "s-3", closed_at).await.unwrap();

    assert!(state_store::fetch_online_session(&db.pool, "s-3").await.unwrap().is_none());
    assert_eq!(state_store::count_online_by_session_id(&db.pool, "s-3").await.unwrap(), 0);
}

#[tokio::test]
async fn list_sessions_filters_and_computes() {
    let factory = SqliteTestDbFactory::new();
    let db = factory.server_db().await.unwrap();

    let mut first = record("s-4", SessionStatus::Online);
    first.created_at = Utc::now() - Duration::seconds(90);
    state_store::upsert_session(&db.pool, &first).await.unwrap();

    let mut other = record("s-5", SessionStatus::Online);
    other.uid = 8;
    other.user_name = "bob".to_string();
    state_store::upsert_session(&db.pool, &other).await.unwrap();

    for _ in 0..3 {
        state_store::insert_session_cmd(
            &db.pool,
            &SessionCmd {
                id: 0,
                session_id: "s-4".to_string(),
                cmd: "ls -la".to_string(),
                result: String::new(),
                level: 0,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    }

    let now = Utc::now();
    let mut filter = session_filter(1, 10);
    filter.uid = Some(7);
    let (page, total) = state_store::list_sessions(&db.pool, &filter, now).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].session_id, "s-4");
    assert_eq!(page[0].cmd_count, 3);
    assert!(page[0].duration >= 90);

    let mut filter = session_filter(1, 10);
    filter.search = Some("bob".to_string());
    let (page, total) = state_store::list_sessions(&db.pool, &filter, now).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].session_id, "s-5");
}

#[tokio::test]
async fn cmd_log_pagination_and_search() {
    let factory = SqliteTestDbFactory::new();
    let db = factory.server_db().await.unwrap();

    for i in 0..5 {
        state_store::insert_session_cmd(
            &db.pool,
            &SessionCmd {
                id: 0,
                session_id: "s-6".to_string(),
                cmd: format!("echo {i}"),
                result: String::new(),
                level: 0,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    }

    let (page, total) = state_store::list_session_cmds(&db.pool, "s-6", None, 2, 2).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].cmd, "echo 2");

    let (page, total) = state_store::list_session_cmds(&db.pool, "s-6", Some("echo 4"), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].cmd, "echo 4");
}

fn session_filter(page_index: i64, page_size: i64) -> SessionFilter {
    SessionFilter {
        page_index,
        page_size,
        ..Default::default()
    }
}
