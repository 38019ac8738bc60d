//! The session-bridge engine.
//!
//! A session bridges one client WebSocket to one backend connection: an
//! interactive shell brokered through the SSH gateway, or a remote-desktop
//! instruction stream multiplexed through guacd. This crate owns the pieces
//! the HTTP surface plugs together: the per-session channel bundle, the live
//! session and its registry, and the two backend drivers.

pub mod chans;
pub mod error;
pub mod guacd;
pub mod logging;
pub mod registry;
pub mod session;
pub mod shell;
pub mod unicode;

pub use chans::{DriverEnds, HandshakeRx, MuxEnds, SessionChans, make_chans};
pub use error::{BrokerError, BrokerResult};
pub use registry::SessionRegistry;
pub use session::{MonitorEvent, Session};
