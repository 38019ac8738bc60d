//! Shared plain types for the Termgate session broker.
//!
//! Everything here is serializable data with no I/O: persisted session
//! records, the wire structs exchanged with the shell gateway, the
//! access-window policy, and broker configuration.

pub mod access;
pub mod config;
pub mod session;
pub mod state;

pub use access::{AccessAuth, AccessRange};
pub use config::{BrokerConfig, GuacdConfig, SshGatewayConfig};
pub use session::{
    Account, Asset, Gateway, GatewayReq, ServerResp, SessionAction, SessionCmd, SessionRecord,
    SessionStatus, SessionType,
};
pub use state::{DbHandle, DbLocation};
