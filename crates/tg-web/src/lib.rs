//! HTTP + WebSocket surface of the session broker.
//!
//! Routes, the client multiplexer loop, monitor fan-out, and the error and
//! localization glue live here; everything stateful is delegated to
//! `broker-core` and `state-store`.

pub mod auth;
pub mod connect;
pub mod error;
pub mod i18n;
pub mod replay;
pub mod server;
pub mod session;
pub mod state;

pub use error::{ApiError, ApiFailure, HttpResponse};
pub use server::{router, run_web_server};
pub use state::AppState;
