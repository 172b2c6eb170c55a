// Collaboration wire protocol: JSON events exchanged over the socket and the
// HTTP fallback endpoint.

mod comment;
mod event;
mod fallback;

use thiserror::Error;

use crate::path::PathError;

pub use comment::{Comment, CommentDelta, CommentStatus};
pub use event::{
    ClientInfo, CollabEvent, EventBody, EventType, Permissions, SortEntry, TextUpdate, UserInfo,
    WireEvent,
};
pub use fallback::{FallbackRequest, FallbackResponse};

// ── Socket close codes ─────────────────────────────────────────────

/// Normal disconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// The server is restarting; reconnecting later is expected to work.
pub const CLOSE_SERVER_RESTARTING: u16 = 1012;
/// The user may not access the document.
pub const CLOSE_PERMISSION_DENIED: u16 = 4443;
/// Chosen by the client when it stops hearing from the server.
pub const CLOSE_CONNECTION_LOSS: u16 = 4504;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown event type `{0}`")]
    UnknownEventType(String),

    #[error("{event_type} event is missing `{field}`")]
    MissingField { event_type: &'static str, field: &'static str },

    #[error("{event_type} event has an invalid path: {source}")]
    InvalidPath {
        event_type: &'static str,
        #[source]
        source: PathError,
    },

    #[error("{event_type} event has an invalid `{field}`: {message}")]
    InvalidPayload { event_type: &'static str, field: &'static str, message: String },

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
