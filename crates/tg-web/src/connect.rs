//! Session creation, client attachment, monitoring, and admin close.
//!
//! `connect_create` runs the rendezvous with a freshly spawned backend
//! driver and registers the session; `connect_session` upgrades the client
//! WebSocket and runs the multiplexer loop; `connect_monitor` attaches
//! admin spectators; `connect_close` tears a session down through the
//! upstream gateway.

use std::{sync::Arc, time::Duration};

use axum::{
    Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use broker_core::{
    MonitorEvent, Session,
    chans::make_chans,
    guacd::{DesktopParams, run_desktop_driver},
    shell::{ShellParams, run_shell_driver},
};
use chrono::{Timelike, Utc};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{io::AsyncWriteExt, sync::mpsc, time::interval};
use tracing::{debug, error, info, warn};

use crate::{
    auth::CurrentUser,
    error::{ApiError, ApiFailure, HttpResponse},
    i18n::{Lang, MessageKey},
    state::AppState,
};
use tg_types::{
    GatewayReq, ServerResp, SessionAction, SessionRecord, SessionStatus, SessionType,
};

const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const CLOSED_BY_ADMIN: &[u8] = b"\r\n \x1b[31m closed by admin";

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub w: u32,
    #[serde(default)]
    pub h: u32,
    #[serde(default)]
    pub dpi: u32,
}

/// POST `/connect/:asset_id/:account_id/:protocol` — create a session.
pub async fn connect_create(
    State(state): State<AppState>,
    user: CurrentUser,
    lang: Lang,
    Path((asset_id, account_id, protocol)): Path<(i64, i64, String)>,
    Query(dims): Query<ConnectQuery>,
) -> Result<Json<HttpResponse<SessionRecord>>, ApiFailure> {
    let (chans, driver_ends, mux_ends, handshake_rx) = make_chans();

    let family = protocol.split(':').next().unwrap_or_default();
    if family.starts_with("ssh") {
        let params = ShellParams {
            gateway: state.config.ssh_gateway.clone(),
            req: gateway_req(&user, SessionAction::New, asset_id, account_id, &protocol, ""),
            width: dims.w,
            height: dims.h,
        };
        tokio::spawn(run_shell_driver(params, driver_ends));
    } else if matches!(family, "vnc" | "rdp") {
        let params = DesktopParams {
            cfg: state.config.guacd.clone(),
            protocol: protocol.clone(),
            asset_id,
            account_id,
            width: dims.w,
            height: dims.h,
            dpi: dims.dpi,
            uid: user.uid,
            user_name: user.user_name.clone(),
            client_ip: user.client_ip.clone(),
        };
        tokio::spawn(run_desktop_driver(state.pool.clone(), params, driver_ends));
    } else {
        error!(protocol, "wrong protocol");
        return Err(ApiError::InvalidArgument(format!("wrong protocol {protocol}")).localized(&lang));
    }

    let resp = await_handshake(handshake_rx).await.map_err(|e| e.localized(&lang))?;

    let record = if family.starts_with("ssh") {
        // The desktop driver persists its own record; the shell gateway
        // leaves that to us.
        let record = shell_session_record(&user, &resp, asset_id, account_id, &protocol);
        state_store::upsert_session(&state.pool, &record)
            .await
            .map_err(|e| ApiError::internal(e).localized(&lang))?;
        record
    } else {
        state_store::fetch_online_session(&state.pool, &resp.session_id)
            .await
            .map_err(|e| ApiError::internal(e).localized(&lang))?
            .ok_or_else(|| ApiError::LoadSession("record missing after handshake".into()).localized(&lang))?
    };

    let session = Session::new(record.clone(), Some(Arc::new(chans)), Some(mux_ends));
    if !state.registry.insert_if_absent(session).await {
        return Err(ApiError::LoadSession("duplicate session id".into()).localized(&lang));
    }

    info!(session_id = %record.session_id, protocol = %record.protocol, "session created");
    Ok(Json(HttpResponse::with_data(record)))
}

/// Await the driver's handshake result, mapping every failure mode onto the
/// error taxonomy.
async fn await_handshake(handshake_rx: broker_core::HandshakeRx) -> Result<ServerResp, ApiError> {
    match handshake_rx.await {
        Err(_) => Err(ApiError::ConnectServer("driver exited before handshake".into())),
        Ok(Err(err)) => {
            error!(%err, "failed to connect");
            Err(ApiError::ConnectServer(err.to_string()))
        }
        Ok(Ok(resp)) if resp.code != 0 => {
            error!(code = resp.code, message = %resp.message, "failed to connect");
            Err(ApiError::ConnectServer(resp.message))
        }
        Ok(Ok(resp)) => Ok(resp),
    }
}

fn gateway_req(
    user: &CurrentUser,
    action: SessionAction,
    asset_id: i64,
    account_id: i64,
    protocol: &str,
    session_id: &str,
) -> GatewayReq {
    GatewayReq {
        uid: user.uid,
        user_name: user.user_name.clone(),
        cookie: user.cookie.clone(),
        accept_language: user.accept_language.clone(),
        client_ip: user.client_ip.clone(),
        asset_id,
        account_id,
        protocol: protocol.to_string(),
        action,
        session_id: session_id.to_string(),
    }
}

fn shell_session_record(
    user: &CurrentUser,
    resp: &ServerResp,
    asset_id: i64,
    account_id: i64,
    protocol: &str,
) -> SessionRecord {
    SessionRecord {
        id: 0,
        session_type: SessionType::Web,
        session_id: resp.session_id.clone(),
        uid: if resp.uid != 0 { resp.uid } else { user.uid },
        user_name: if resp.user_name.is_empty() {
            user.user_name.clone()
        } else {
            resp.user_name.clone()
        },
        asset_id,
        asset_info: String::new(),
        account_id,
        account_info: String::new(),
        gateway_id: 0,
        gateway_info: String::new(),
        client_ip: user.client_ip.clone(),
        protocol: protocol.to_string(),
        status: SessionStatus::Online,
        created_at: Utc::now(),
        closed_at: None,
        cmd_count: 0,
        duration: 0,
    }
}

/// GET `/connect/:session_id` — attach the client WebSocket.
pub async fn connect_session(
    State(state): State<AppState>,
    lang: Lang,
    Path(session_id): Path<String>,
    Query(dims): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_client_socket(state, socket, session_id, dims, lang))
}

/// Send a localized error as one text frame and close; the WebSocket
/// equivalent of an error body.
async fn reject(mut socket: WebSocket, lang: &Lang, err: ApiError) {
    debug!(message = %err.message(&Lang::default()), "rejecting websocket");
    let _ = socket.send(Message::Text(err.message(lang).into())).await;
    let _ = socket.close().await;
}

async fn handle_client_socket(state: AppState, socket: WebSocket, session_id: String, dims: ConnectQuery, lang: Lang) {
    let Some(session) = state.registry.get(&session_id).await else {
        reject(socket, &lang, ApiError::InvalidSessionId { session_id }).await;
        return;
    };
    // The attach gate: one client per session, ever.
    if !session.mark_connected() {
        reject(socket, &lang, ApiError::InvalidSessionId { session_id }).await;
        return;
    }
    let (Some(chans), Some(mut mux)) = (session.chans.clone(), session.take_mux()) else {
        reject(socket, &lang, ApiError::LoadSession("session has no live channels".into())).await;
        return;
    };

    if session.is_shell() {
        let _ = chans
            .window_tx
            .send(format!("{},{},{}", dims.w, dims.h, dims.dpi))
            .await;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Reader coroutine: client frames stream into in_chan in arrival order.
    let in_tx = chans.in_tx.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    if in_tx.send(text.as_bytes().to_vec()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(err) => {
                    warn!(%err, "websocket read failed");
                    break;
                }
                _ => {}
            }
        }
    });

    let mut buf: Vec<u8> = Vec::new();
    let mut flush = interval(FLUSH_INTERVAL);
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            // Reader gone covers both client disconnect and request-context
            // cancellation; the upgrade future is dropped with the socket.
            _ = &mut reader => break,
            closer = mux.close_rx.recv() => {
                if let Some(closer) = closer {
                    if session.is_shell() {
                        let _ = ws_tx.send(Message::Text(String::from_utf8_lossy(CLOSED_BY_ADMIN).into_owned().into())).await;
                        session.fan_out(MonitorEvent::Output(CLOSED_BY_ADMIN.to_vec())).await;
                    }
                    warn!(closer, session_id = %session.session_id(), "close by admin");
                }
                break;
            }
            exit = mux.err_rx.recv() => {
                match exit {
                    Some(Some(err)) => error!(%err, "connection failed"),
                    Some(None) | None => debug!(session_id = %session.session_id(), "driver ended"),
                }
                break;
            }
            frame = mux.in_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if !dispatch_frame(&session, &mut mux.win, frame).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            out = mux.out_rx.recv() => {
                match out {
                    Some(out) => buf.extend_from_slice(&out),
                    None => break,
                }
            }
            _ = flush.tick() => {
                flush_output(Some(&mut ws_tx), &session, &mut buf).await;
            }
            _ = heartbeat.tick() => {
                let _ = ws_tx.send(Message::Text(String::new().into())).await;
                session.fan_out(MonitorEvent::Heartbeat).await;
            }
        }
    }

    // Final flush so the tail of the buffer reaches client and spectators.
    flush_output(Some(&mut ws_tx), &session, &mut buf).await;
    mux.leave();
    reader.abort();

    let notice = lang.localize(MessageKey::SessionEnd, &[("session_id", &session_id)]);
    state.registry.teardown(&session_id, "", &notice).await;
    if let Err(err) = state_store::mark_session_offline(&state.pool, &session_id, Utc::now()).await {
        warn!(%err, session_id, "failed to mark session offline");
    }
    let _ = ws_tx.close().await;
    info!(session_id, "session detached");
}

/// Apply one client frame. Shell frames carry a leading tag byte; desktop
/// frames are tunnel instructions forwarded verbatim. Returns false once the
/// driver side of the stdin pipe is gone.
async fn dispatch_frame(session: &Session, win: &mut tokio::io::DuplexStream, frame: Vec<u8>) -> bool {
    if !session.is_shell() {
        return win.write_all(&frame).await.is_ok();
    }
    let Some((&tag, payload)) = frame.split_first() else {
        return true;
    };
    match tag {
        b'1' => win.write_all(payload).await.is_ok(),
        b'9' => true,
        b'w' => {
            if let Some(chans) = &session.chans {
                let _ = chans
                    .window_tx
                    .send(String::from_utf8_lossy(payload).into_owned())
                    .await;
            }
            true
        }
        _ => true,
    }
}

/// Drain the accumulator: one text frame to the client (when present), a
/// copy to every monitor.
async fn flush_output(ws_tx: Option<&mut SplitSink<WebSocket, Message>>, session: &Session, buf: &mut Vec<u8>) {
    if buf.is_empty() {
        return;
    }
    let payload = std::mem::take(buf);
    if let Some(ws_tx) = ws_tx {
        let _ = ws_tx
            .send(Message::Text(String::from_utf8_lossy(&payload).into_owned().into()))
            .await;
    }
    session.fan_out(MonitorEvent::Output(payload)).await;
}

/// GET `/connect/monitor/:session_id` — attach an admin spectator.
pub async fn connect_monitor(
    State(state): State<AppState>,
    user: CurrentUser,
    lang: Lang,
    Path(session_id): Path<String>,
    Query(dims): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_monitor_socket(state, socket, user, session_id, dims, lang))
}

async fn handle_monitor_socket(
    state: AppState,
    socket: WebSocket,
    user: CurrentUser,
    session_id: String,
    dims: ConnectQuery,
    lang: Lang,
) {
    if !user.is_admin() {
        reject(socket, &lang, ApiError::NoPerm { perm: "monitor session" }).await;
        return;
    }

    match state_store::fetch_online_session(&state.pool, &session_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            // Store and registry diverged; drop the stale live entry.
            state.registry.remove(&session_id).await;
            reject(socket, &lang, ApiError::InvalidSessionId { session_id }).await;
            return;
        }
        Err(err) => {
            reject(socket, &lang, ApiError::internal(err)).await;
            return;
        }
    }
    let Some(session) = state.registry.get(&session_id).await else {
        reject(socket, &lang, ApiError::InvalidSessionId { session_id }).await;
        return;
    };

    // CLIENT sessions have no local driver; the first monitor opens a
    // spectator channel through the gateway.
    if session.session_type() == SessionType::Client
        && !session.has_monitors().await
        && let Err(err) = start_client_monitor_pump(&state, &session, &user, &dims).await
    {
        reject(socket, &lang, err).await;
        return;
    }

    let key = monitor_key(user.uid, &session_id, Utc::now().nanosecond());
    let (sink, events) = mpsc::channel::<MonitorEvent>(64);
    let (ws_tx, mut ws_rx) = socket.split();
    let writer = spawn_monitor_writer(ws_tx, events);

    session.add_monitor(key.clone(), sink).await;
    debug!(session_id = %session_id, key = %key, "monitor attached");

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Err(err) => {
                warn!(%err, "end monitor");
                break;
            }
            _ => {}
        }
    }

    session.remove_monitor(&key).await;
    writer.abort();
}

/// Attach key: uid, session and the nanosecond component of now, tolerant of
/// near-simultaneous attaches by the same admin.
fn monitor_key(uid: i64, session_id: &str, nanos: u32) -> String {
    format!("{uid}-{session_id}-{nanos}")
}

/// Forward monitor events to one spectator WebSocket until it dies or the
/// session closes.
fn spawn_monitor_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<MonitorEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let closing = matches!(event, MonitorEvent::Closed(_));
            let message = match event {
                MonitorEvent::Output(bytes) => {
                    Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())
                }
                MonitorEvent::Heartbeat => Message::Text(String::new().into()),
                MonitorEvent::Closed(notice) => Message::Text(notice.into()),
            };
            if ws_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = ws_tx.close().await;
    })
}

/// Run a MONITOR handshake through the gateway and pump its output to the
/// session's monitors on the flush cadence. The pump lives until the
/// gateway ends the spectator stream.
async fn start_client_monitor_pump(
    state: &AppState,
    session: &Arc<Session>,
    user: &CurrentUser,
    dims: &ConnectQuery,
) -> Result<(), ApiError> {
    let (chans, driver_ends, mut mux, handshake_rx) = make_chans();
    let params = ShellParams {
        gateway: state.config.ssh_gateway.clone(),
        req: gateway_req(user, SessionAction::Monitor, 0, 0, "", session.session_id()),
        width: dims.w,
        height: dims.h,
    };
    debug!(session_id = %session.session_id(), "connecting monitor channel to gateway");
    tokio::spawn(run_shell_driver(params, driver_ends));
    await_handshake(handshake_rx).await?;

    let session = session.clone();
    tokio::spawn(async move {
        // Keeps the bundle's sender ends alive for the driver's lifetime.
        let _chans = chans;
        let mut buf: Vec<u8> = Vec::new();
        let mut flush = interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                closer = mux.close_rx.recv() => {
                    if let Some(closer) = closer {
                        session.fan_out(MonitorEvent::Output(CLOSED_BY_ADMIN.to_vec())).await;
                        warn!(closer, session_id = %session.session_id(), "close by admin");
                    }
                    break;
                }
                exit = mux.err_rx.recv() => {
                    if let Some(Some(err)) = exit {
                        error!(%err, "monitor channel failed");
                    }
                    break;
                }
                out = mux.out_rx.recv() => {
                    match out {
                        Some(out) => buf.extend_from_slice(&out),
                        None => break,
                    }
                }
                _ = flush.tick() => {
                    flush_output(None, &session, &mut buf).await;
                }
            }
        }
        flush_output(None, &session, &mut buf).await;
        mux.leave();
    });
    Ok(())
}

/// POST `/connect/close/:session_id` — admin-initiated close. Idempotent:
/// closing an already-offline session succeeds.
pub async fn connect_close(
    State(state): State<AppState>,
    user: CurrentUser,
    lang: Lang,
    Path(session_id): Path<String>,
    Query(dims): Query<ConnectQuery>,
) -> Result<Json<HttpResponse<()>>, ApiFailure> {
    if !user.is_admin() {
        return Err(ApiError::NoPerm { perm: "close session" }.localized(&lang));
    }

    let record = match state_store::fetch_online_session(&state.pool, &session_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(Json(HttpResponse::ok())),
        Err(err) => return Err(ApiError::internal(err).localized(&lang)),
    };
    info!(session_id = %record.session_id, session_type = ?record.session_type, "closing...");

    // Instruct the upstream gateway first; local teardown runs regardless of
    // how the gateway answers.
    let (chans, driver_ends, mux, handshake_rx) = make_chans();
    let params = ShellParams {
        gateway: state.config.ssh_gateway.clone(),
        req: gateway_req(&user, SessionAction::Close, 0, 0, "", &record.session_id),
        width: dims.w,
        height: dims.h,
    };
    tokio::spawn(run_shell_driver(params, driver_ends));
    let gateway_result = match handshake_rx.await {
        Err(_) => Err(ApiError::ConnectServer("driver exited before handshake".into())),
        Ok(Err(err)) => Err(ApiError::ConnectServer(err.to_string())),
        Ok(Ok(resp)) if resp.code != 0 => Err(ApiError::BadRequest(resp.message)),
        Ok(Ok(_)) => Ok(()),
    };
    drop((chans, mux));

    let notice = lang.localize(MessageKey::SessionEnd, &[("session_id", &record.session_id)]);
    state.registry.teardown(&record.session_id, &user.user_name, &notice).await;
    if let Err(err) = state_store::mark_session_offline(&state.pool, &record.session_id, Utc::now()).await {
        warn!(%err, session_id = %record.session_id, "failed to mark session offline");
    }

    gateway_result.map(|_| Json(HttpResponse::ok())).map_err(|e| e.localized(&lang))
}

#[cfg(test)]
mod tests {
    use broker_core::chans::make_chans;
    use tg_types::SessionStatus;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn record(protocol: &str) -> SessionRecord {
        SessionRecord {
            id: 0,
            session_type: SessionType::Web,
            session_id: "s".into(),
            uid: 1,
            user_name: "alice".into(),
            asset_id: 0,
            asset_info: String::new(),
            account_id: 0,
            account_info: String::new(),
            gateway_id: 0,
            gateway_info: String::new(),
            client_ip: String::new(),
            protocol: protocol.into(),
            status: SessionStatus::Online,
            created_at: Utc::now(),
            closed_at: None,
            cmd_count: 0,
            duration: 0,
        }
    }

    #[tokio::test]
    async fn shell_frames_dispatch_by_tag() {
        let (chans, mut driver, mut mux, _rx) = make_chans();
        let session = Session::new(record("ssh"), Some(Arc::new(chans)), None);

        assert!(dispatch_frame(&session, &mut mux.win, b"1ls\r".to_vec()).await);
        let mut buf = [0u8; 8];
        let n = driver.rin.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ls\r");

        // Heartbeat-ish tag is ignored, resize lands on the window channel.
        assert!(dispatch_frame(&session, &mut mux.win, b"9".to_vec()).await);
        assert!(dispatch_frame(&session, &mut mux.win, b"w120,40,96".to_vec()).await);
        assert_eq!(driver.window_rx.recv().await.as_deref(), Some("120,40,96"));

        // Empty frames are tolerated.
        assert!(dispatch_frame(&session, &mut mux.win, Vec::new()).await);
    }

    #[tokio::test]
    async fn desktop_frames_pass_through_whole() {
        let (chans, mut driver, mut mux, _rx) = make_chans();
        let session = Session::new(record("vnc"), Some(Arc::new(chans)), None);

        assert!(dispatch_frame(&session, &mut mux.win, b"4.sync,8.12345678;".to_vec()).await);
        let mut buf = [0u8; 32];
        let n = driver.rin.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"4.sync,8.12345678;");
    }

    #[test]
    fn monitor_keys_embed_uid_session_and_nanos() {
        assert_eq!(monitor_key(9, "abc", 123456), "9-abc-123456");
    }
}
