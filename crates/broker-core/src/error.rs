use thiserror::Error;

/// Errors produced by the session-bridge engine.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// SSH transport error against the shell gateway
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// State store error
    #[error("database error: {0}")]
    Db(#[from] state_store::DbError),

    /// Backend connect or handshake failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Asset access window denies the current instant
    #[error("invalid access time")]
    InvalidAccessTime,

    /// Directory record missing
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Malformed guacd instruction stream
    #[error("tunnel protocol error: {0}")]
    Tunnel(String),
}

/// Result type alias for broker-core operations
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake(reason.into())
    }

    pub fn tunnel(reason: impl Into<String>) -> Self {
        Self::Tunnel(reason.into())
    }
}
