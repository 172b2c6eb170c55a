// Error types for connections and the collaboration store.

use fieldsync_common::change::ChangeError;
use fieldsync_common::path::PathError;
use fieldsync_common::protocol::{
    ProtocolError, CLOSE_CONNECTION_LOSS, CLOSE_NORMAL, CLOSE_PERMISSION_DENIED,
    CLOSE_SERVER_RESTARTING,
};
use serde::Serialize;
use thiserror::Error;

/// What the user is told about a failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    PermissionDenied,
    HandshakeFailed,
    ServerRestarting,
    ConnectionLost,
    Generic,
}

impl ErrorCategory {
    pub fn message(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission denied",
            Self::HandshakeFailed => "could not connect to the server",
            Self::ServerRestarting => "server is restarting",
            Self::ConnectionLost => "connection loss detected",
            Self::Generic => "connection error",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("server is restarting")]
    ServerRestarting,

    #[error("connection loss detected")]
    ConnectionLost,

    #[error("connection closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Error for a socket closed by the peer with `code`; `None` for a normal
    /// close.
    pub fn from_close_code(code: u16, reason: &str) -> Option<Self> {
        match code {
            CLOSE_NORMAL => None,
            CLOSE_PERMISSION_DENIED => Some(Self::PermissionDenied),
            CLOSE_SERVER_RESTARTING => Some(Self::ServerRestarting),
            CLOSE_CONNECTION_LOSS => Some(Self::ConnectionLost),
            _ => Some(Self::Closed { code, reason: reason.to_string() }),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PermissionDenied => ErrorCategory::PermissionDenied,
            Self::Handshake(_) => ErrorCategory::HandshakeFailed,
            Self::ServerRestarting => ErrorCategory::ServerRestarting,
            Self::ConnectionLost => ErrorCategory::ConnectionLost,
            Self::Closed { .. } | Self::Transport(_) | Self::Protocol(_) => ErrorCategory::Generic,
        }
    }

    /// Whether reconnecting could help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PermissionDenied)
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(error: ProtocolError) -> Self {
        Self::Protocol(error.to_string())
    }
}

impl From<reqwest::Error> for ConnectionError {
    fn from(error: reqwest::Error) -> Self {
        match error.status().map(|status| status.as_u16()) {
            Some(401 | 403) => Self::PermissionDenied,
            Some(503) => Self::ServerRestarting,
            _ if error.is_connect() || error.is_timeout() => Self::Handshake(error.to_string()),
            _ => Self::Transport(error.to_string()),
        }
    }
}

/// Why the store refused or failed an operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document is read-only")]
    ReadOnly,

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Change(#[from] ChangeError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("value at `{0}` is not text")]
    NotText(String),

    #[error("comment `{id}` rejected: {message}")]
    Comment { id: String, message: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("collaboration session has stopped")]
    Stopped,
}
