//! Session records and the wire structs exchanged with the shell gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::access::AccessAuth;

/// Origin of a session. WEB sessions were created by this broker; CLIENT
/// sessions were originated by the external SSH gateway and only have a
/// persisted record here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i64)]
#[serde(try_from = "i64", into = "i64")]
pub enum SessionType {
    Web = 1,
    Client = 2,
}

impl TryFrom<i64> for SessionType {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SessionType::Web),
            2 => Ok(SessionType::Client),
            other => Err(format!("unknown session type {other}")),
        }
    }
}

impl From<SessionType> for i64 {
    fn from(value: SessionType) -> i64 {
        value as i64
    }
}

/// ONLINE sessions are registered in the live registry; OFFLINE is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i64)]
#[serde(try_from = "i64", into = "i64")]
pub enum SessionStatus {
    Online = 1,
    Offline = 2,
}

impl TryFrom<i64> for SessionStatus {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SessionStatus::Online),
            2 => Ok(SessionStatus::Offline),
            other => Err(format!("unknown session status {other}")),
        }
    }
}

impl From<SessionStatus> for i64 {
    fn from(value: SessionStatus) -> i64 {
        value as i64
    }
}

/// Action field of the in-band gateway handshake. The numeric values are part
/// of the protocol with the upstream gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum SessionAction {
    New = 0,
    Monitor = 1,
    Close = 2,
}

impl TryFrom<i64> for SessionAction {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SessionAction::New),
            1 => Ok(SessionAction::Monitor),
            2 => Ok(SessionAction::Close),
            other => Err(format!("unknown session action {other}")),
        }
    }
}

impl From<SessionAction> for i64 {
    fn from(value: SessionAction) -> i64 {
        value as i64
    }
}

/// Persisted session record. `cmd_count` and `duration` are computed at list
/// time and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    #[serde(default)]
    pub id: i64,
    pub session_type: SessionType,
    pub session_id: String,
    pub uid: i64,
    pub user_name: String,
    #[serde(default)]
    pub asset_id: i64,
    #[serde(default)]
    pub asset_info: String,
    #[serde(default)]
    pub account_id: i64,
    #[serde(default)]
    pub account_info: String,
    #[serde(default)]
    pub gateway_id: i64,
    #[serde(default)]
    pub gateway_info: String,
    #[serde(default)]
    pub client_ip: String,
    pub protocol: String,
    pub status: SessionStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[sqlx(default)]
    pub cmd_count: i64,
    #[serde(default)]
    #[sqlx(default)]
    pub duration: i64,
}

impl SessionRecord {
    /// The protocol prefix before `:` selects the backend driver.
    pub fn protocol_family(&self) -> &str {
        self.protocol.split(':').next().unwrap_or_default()
    }

    pub fn is_shell(&self) -> bool {
        self.protocol.starts_with("ssh")
    }
}

/// Handshake reply from a backend driver; carries the assigned session id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerResp {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub uid: i64,
    #[serde(default)]
    pub user_name: String,
}

/// Request object written to the shell gateway's stdin, JSON followed by `\r`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayReq {
    pub uid: i64,
    pub user_name: String,
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub accept_language: String,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub asset_id: i64,
    #[serde(default)]
    pub account_id: i64,
    #[serde(default)]
    pub protocol: String,
    pub action: SessionAction,
    #[serde(default)]
    pub session_id: String,
}

/// One recorded command entry for a session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionCmd {
    #[serde(default)]
    pub id: i64,
    pub session_id: String,
    pub cmd: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub level: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Directory entry for a connectable host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub gateway_id: i64,
    #[serde(default)]
    pub access_auth: Option<AccessAuth>,
}

/// Login account used on an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub account: String,
    #[serde(default)]
    pub password: String,
}

/// Intermediate jump gateway in front of an asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gateway {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_type_round_trip() {
        assert_eq!(SessionType::try_from(1).unwrap(), SessionType::Web);
        assert_eq!(SessionType::try_from(2).unwrap(), SessionType::Client);
        assert!(SessionType::try_from(3).is_err());
        assert_eq!(i64::from(SessionType::Client), 2);
    }

    #[test]
    fn gateway_req_serializes_action_as_integer() {
        let req = GatewayReq {
            uid: 7,
            user_name: "alice".into(),
            cookie: String::new(),
            accept_language: "en".into(),
            client_ip: "10.0.0.1".into(),
            asset_id: 1,
            account_id: 2,
            protocol: "ssh".into(),
            action: SessionAction::Monitor,
            session_id: "abc".into(),
        };
        let value: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["action"], 1);
        assert_eq!(value["user_name"], "alice");
    }

    #[test]
    fn protocol_family_splits_on_colon() {
        let mut rec = SessionRecord {
            id: 0,
            session_type: SessionType::Web,
            session_id: "x".into(),
            uid: 1,
            user_name: "u".into(),
            asset_id: 0,
            asset_info: String::new(),
            account_id: 0,
            account_info: String::new(),
            gateway_id: 0,
            gateway_info: String::new(),
            client_ip: String::new(),
            protocol: "vnc:5901".into(),
            status: SessionStatus::Online,
            created_at: Utc::now(),
            closed_at: None,
            cmd_count: 0,
            duration: 0,
        };
        assert_eq!(rec.protocol_family(), "vnc");
        assert!(!rec.is_shell());
        rec.protocol = "ssh".into();
        assert!(rec.is_shell());
    }
}
