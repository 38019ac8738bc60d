//! The live session: registry entry, attach gate, and monitor fan-out.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::chans::{MuxEnds, SessionChans};
use tg_types::{SessionRecord, SessionType};

/// What a spectator WebSocket receives, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// One flushed batch of backend output.
    Output(Vec<u8>),
    /// Zero-length keepalive frame.
    Heartbeat,
    /// The session ended; carries the localized notice. The sink closes
    /// after delivering it.
    Closed(String),
}

/// A live, ONLINE session. Rehydrated CLIENT sessions have no channel bundle
/// until a monitor lazily opens one through the gateway.
pub struct Session {
    pub record: SessionRecord,
    pub chans: Option<Arc<SessionChans>>,
    connected: AtomicBool,
    mux: Mutex<Option<MuxEnds>>,
    monitors: RwLock<HashMap<String, mpsc::Sender<MonitorEvent>>>,
}

impl Session {
    pub fn new(record: SessionRecord, chans: Option<Arc<SessionChans>>, mux: Option<MuxEnds>) -> Arc<Self> {
        Arc::new(Self {
            record,
            chans,
            connected: AtomicBool::new(false),
            mux: Mutex::new(mux),
            monitors: RwLock::new(HashMap::new()),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.record.session_id
    }

    pub fn session_type(&self) -> SessionType {
        self.record.session_type
    }

    pub fn is_shell(&self) -> bool {
        self.record.is_shell()
    }

    /// The attach gate: flips `connected` false→true exactly once.
    pub fn mark_connected(&self) -> bool {
        self.connected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Hand the multiplexer its receiver ends. Yields `Some` exactly once.
    pub fn take_mux(&self) -> Option<MuxEnds> {
        self.mux.lock().expect("mux lock poisoned").take()
    }

    pub async fn add_monitor(&self, key: String, sink: mpsc::Sender<MonitorEvent>) {
        self.monitors.write().await.insert(key, sink);
    }

    pub async fn remove_monitor(&self, key: &str) {
        self.monitors.write().await.remove(key);
    }

    pub async fn has_monitors(&self) -> bool {
        !self.monitors.read().await.is_empty()
    }

    /// Fan one event out to every attached monitor. Sinks whose reader task
    /// died are dropped silently; they unregister themselves on exit.
    pub async fn fan_out(&self, event: MonitorEvent) {
        let sinks: Vec<_> = self.monitors.read().await.values().cloned().collect();
        for sink in sinks {
            let _ = sink.send(event.clone()).await;
        }
    }

    /// Notify every monitor the session ended and forget them all.
    pub async fn close_monitors(&self, notice: &str) {
        let sinks: Vec<(String, mpsc::Sender<MonitorEvent>)> = self.monitors.write().await.drain().collect();
        for (key, sink) in sinks {
            debug!(session_id = %self.record.session_id, monitor = %key, "disconnecting monitor");
            let _ = sink.send(MonitorEvent::Closed(notice.to_string())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tg_types::SessionStatus;

    use super::*;
    use crate::chans::make_chans;

    fn web_record(session_id: &str) -> SessionRecord {
        SessionRecord {
            id: 0,
            session_type: SessionType::Web,
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
    async fn connected_transitions_at_most_once() {
        let (chans, _driver, mux, _rx) = make_chans();
        let session = Session::new(web_record("s"), Some(Arc::new(chans)), Some(mux));

        assert!(!session.connected());
        assert!(session.mark_connected());
        assert!(!session.mark_connected());
        assert!(session.connected());
    }

    #[tokio::test]
    async fn mux_ends_are_taken_once() {
        let (chans, _driver, mux, _rx) = make_chans();
        let session = Session::new(web_record("s"), Some(Arc::new(chans)), Some(mux));

        assert!(session.take_mux().is_some());
        assert!(session.take_mux().is_none());
    }

    #[tokio::test]
    async fn close_monitors_delivers_notice_and_clears() {
        let (chans, _driver, mux, _rx) = make_chans();
        let session = Session::new(web_record("s"), Some(Arc::new(chans)), Some(mux));

        let (sink, mut events) = mpsc::channel(4);
        session.add_monitor("1-s-42".into(), sink).await;
        session.fan_out(MonitorEvent::Output(b"$ ".to_vec())).await;
        session.close_monitors("session s ended").await;

        assert_eq!(events.recv().await, Some(MonitorEvent::Output(b"$ ".to_vec())));
        assert_eq!(events.recv().await, Some(MonitorEvent::Closed("session s ended".into())));
        assert!(!session.has_monitors().await);
    }
}
