//! Configuration structs for the broker process.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The internal shell gateway every ssh-family session is brokered through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshGatewayConfig {
    /// Hostname or IP of the gateway.
    pub host: String,
    /// SSH port (defaults to 2222).
    pub port: u16,
    /// Service account the broker logs in as.
    pub account: String,
    /// Password for the service account.
    pub password: String,
}

impl Default for SshGatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2222,
            account: "termgate".to_string(),
            password: String::new(),
        }
    }
}

/// The guacd tunnel daemon remote-desktop sessions are multiplexed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuacdConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GuacdConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4822,
        }
    }
}

/// Top-level runtime configuration for the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Address to bind the HTTP listener to.
    pub bind: String,
    /// TCP port to serve on.
    pub port: u16,
    pub ssh_gateway: SshGatewayConfig,
    pub guacd: GuacdConfig,
    /// Directory replay files are stored in, one `{session_id}.cast` each.
    pub replay_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            ssh_gateway: SshGatewayConfig::default(),
            guacd: GuacdConfig::default(),
            replay_dir: PathBuf::from("/replay"),
        }
    }
}
