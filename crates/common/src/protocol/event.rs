// Collaboration events.
//
// `WireEvent` is the lenient JSON shape every message shares. `CollabEvent`
// is the validated form: one variant per event kind with its required
// fields. Conversion happens once, at the boundary where messages enter
// the store.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::comment::{Comment, CommentDelta};
use super::ProtocolError;
use crate::change::{ChangeSet, Selection};
use crate::path::FieldPath;

// ── Event kinds ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Connect,
    Disconnect,
    Init,
    Create,
    UpdateKey,
    UpdateText,
    Delete,
    Sort,
    Awareness,
    Error,
    Ping,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        Self::Connect,
        Self::Disconnect,
        Self::Init,
        Self::Create,
        Self::UpdateKey,
        Self::UpdateText,
        Self::Delete,
        Self::Sort,
        Self::Awareness,
        Self::Error,
        Self::Ping,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "collab.connect",
            Self::Disconnect => "collab.disconnect",
            Self::Init => "collab.init",
            Self::Create => "collab.create",
            Self::UpdateKey => "collab.update_key",
            Self::UpdateText => "collab.update_text",
            Self::Delete => "collab.delete",
            Self::Sort => "collab.sort",
            Self::Awareness => "collab.awareness",
            Self::Error => "error",
            Self::Ping => "ping",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    /// Ephemeral events are never persisted and never sent over the polling
    /// fallback.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Awareness | Self::Ping)
    }
}

// ── Payload types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One connected client, as listed in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default)]
    pub client_color: String,
    #[serde(default)]
    pub user: UserInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortEntry {
    pub id: String,
    pub order: i64,
}

/// One text change plus the sender's selection after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUpdate {
    pub changes: ChangeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

// ── Wire shape ─────────────────────────────────────────────────────

/// Every collaboration message as it appears on the wire. Only `type` is
/// always present; which other fields matter depends on the kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// `Some(Value::Null)` when the message carries an explicit `null`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl WireEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }
}

// ── Validated event ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Connect {
        client: ClientInfo,
    },
    Disconnect,
    Init {
        path: Option<FieldPath>,
        value: Value,
        comments: Vec<Comment>,
        permissions: Option<Permissions>,
        clients: Vec<ClientInfo>,
    },
    Create {
        path: FieldPath,
        value: Value,
    },
    UpdateKey {
        path: FieldPath,
        value: Value,
        comments: Vec<CommentDelta>,
    },
    UpdateText {
        path: FieldPath,
        updates: Vec<TextUpdate>,
        comments: Vec<CommentDelta>,
    },
    Delete {
        path: FieldPath,
        comments: Vec<CommentDelta>,
    },
    Sort {
        path: FieldPath,
        sort: Vec<SortEntry>,
    },
    Awareness {
        path: Option<FieldPath>,
        selection: Option<Selection>,
    },
    Error {
        message: Option<String>,
    },
    Ping,
}

impl EventBody {
    pub fn kind(&self) -> EventType {
        match self {
            Self::Connect { .. } => EventType::Connect,
            Self::Disconnect => EventType::Disconnect,
            Self::Init { .. } => EventType::Init,
            Self::Create { .. } => EventType::Create,
            Self::UpdateKey { .. } => EventType::UpdateKey,
            Self::UpdateText { .. } => EventType::UpdateText,
            Self::Delete { .. } => EventType::Delete,
            Self::Sort { .. } => EventType::Sort,
            Self::Awareness { .. } => EventType::Awareness,
            Self::Error { .. } => EventType::Error,
            Self::Ping => EventType::Ping,
        }
    }

    pub fn path(&self) -> Option<&FieldPath> {
        match self {
            Self::Create { path, .. }
            | Self::UpdateKey { path, .. }
            | Self::UpdateText { path, .. }
            | Self::Delete { path, .. }
            | Self::Sort { path, .. } => Some(path),
            Self::Init { path, .. } | Self::Awareness { path, .. } => path.as_ref(),
            Self::Connect { .. } | Self::Disconnect | Self::Error { .. } | Self::Ping => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct CollabEvent {
    pub version: Option<u64>,
    pub client_id: Option<String>,
    pub body: EventBody,
}

impl CollabEvent {
    /// An outgoing event; version and client id are stamped when sent.
    pub fn new(body: EventBody) -> Self {
        Self { version: None, client_id: None, body }
    }

    pub fn kind(&self) -> EventType {
        self.body.kind()
    }

    pub fn path(&self) -> Option<&FieldPath> {
        self.body.path()
    }
}

impl TryFrom<WireEvent> for CollabEvent {
    type Error = ProtocolError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let kind = wire
            .kind()
            .ok_or_else(|| ProtocolError::UnknownEventType(wire.event_type.clone()))?;
        let tag = kind.as_str();
        let path = wire.path.as_deref();

        let body = match kind {
            EventType::Connect => EventBody::Connect { client: required(tag, "client", wire.client)? },
            EventType::Disconnect => EventBody::Disconnect,
            EventType::Init => {
                if wire.client_id.is_none() {
                    return Err(ProtocolError::MissingField { event_type: tag, field: "client_id" });
                }
                EventBody::Init {
                    path: optional_path(tag, path)?,
                    value: wire
                        .value
                        .ok_or(ProtocolError::MissingField { event_type: tag, field: "value" })?,
                    comments: optional(tag, "comments", wire.comments)?.unwrap_or_default(),
                    permissions: optional(tag, "permissions", wire.permissions)?,
                    clients: optional(tag, "clients", wire.clients)?.unwrap_or_default(),
                }
            }
            EventType::Create => EventBody::Create {
                path: required_path(tag, path)?,
                value: wire.value.unwrap_or(Value::Null),
            },
            EventType::UpdateKey => EventBody::UpdateKey {
                path: required_path(tag, path)?,
                value: wire
                    .value
                    .ok_or(ProtocolError::MissingField { event_type: tag, field: "value" })?,
                comments: optional(tag, "comments", wire.comments)?.unwrap_or_default(),
            },
            EventType::UpdateText => EventBody::UpdateText {
                path: required_path(tag, path)?,
                updates: required(tag, "updates", wire.updates)?,
                comments: optional(tag, "comments", wire.comments)?.unwrap_or_default(),
            },
            EventType::Delete => EventBody::Delete {
                path: required_path(tag, path)?,
                comments: optional(tag, "comments", wire.comments)?.unwrap_or_default(),
            },
            EventType::Sort => EventBody::Sort {
                path: required_path(tag, path)?,
                sort: required(tag, "sort", wire.sort)?,
            },
            EventType::Awareness => EventBody::Awareness {
                path: optional_path(tag, path)?,
                selection: optional(tag, "selection", wire.selection)?,
            },
            EventType::Error => EventBody::Error { message: wire.message },
            EventType::Ping => EventBody::Ping,
        };

        Ok(Self { version: wire.version, client_id: wire.client_id, body })
    }
}

fn required<T: DeserializeOwned>(
    event_type: &'static str,
    field: &'static str,
    value: Option<Value>,
) -> Result<T, ProtocolError> {
    optional(event_type, field, value)?.ok_or(ProtocolError::MissingField { event_type, field })
}

/// Absent and `null` both mean "not given".
fn optional<T: DeserializeOwned>(
    event_type: &'static str,
    field: &'static str,
    value: Option<Value>,
) -> Result<Option<T>, ProtocolError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(|err| {
            ProtocolError::InvalidPayload { event_type, field, message: err.to_string() }
        }),
    }
}

fn required_path(event_type: &'static str, raw: Option<&str>) -> Result<FieldPath, ProtocolError> {
    optional_path(event_type, raw)?.ok_or(ProtocolError::MissingField { event_type, field: "path" })
}

fn optional_path(
    event_type: &'static str,
    raw: Option<&str>,
) -> Result<Option<FieldPath>, ProtocolError> {
    raw.filter(|raw| !raw.is_empty())
        .map(FieldPath::parse)
        .transpose()
        .map_err(|source| ProtocolError::InvalidPath { event_type, source })
}

impl From<CollabEvent> for WireEvent {
    fn from(event: CollabEvent) -> Self {
        let mut wire = WireEvent {
            event_type: event.kind().as_str().to_string(),
            path: event.path().map(ToString::to_string),
            version: event.version,
            client_id: event.client_id,
            ..WireEvent::default()
        };
        match event.body {
            EventBody::Connect { client } => wire.client = encode(&client),
            EventBody::Init { value, comments, permissions, clients, .. } => {
                wire.value = Some(value);
                wire.comments = encode(&comments);
                wire.permissions = permissions.as_ref().and_then(encode);
                wire.clients = encode(&clients);
            }
            EventBody::Create { value, .. } => wire.value = Some(value),
            EventBody::UpdateKey { value, comments, .. } => {
                wire.value = Some(value);
                wire.comments = non_empty(&comments);
            }
            EventBody::UpdateText { updates, comments, .. } => {
                wire.updates = encode(&updates);
                wire.comments = non_empty(&comments);
            }
            EventBody::Delete { comments, .. } => wire.comments = non_empty(&comments),
            EventBody::Sort { sort, .. } => wire.sort = encode(&sort),
            EventBody::Awareness { selection, .. } => {
                wire.selection = selection.as_ref().and_then(encode);
            }
            EventBody::Error { message } => wire.message = message,
            EventBody::Disconnect | EventBody::Ping => {}
        }
        wire
    }
}

impl From<&CollabEvent> for WireEvent {
    fn from(event: &CollabEvent) -> Self {
        event.clone().into()
    }
}

fn encode<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

fn non_empty<T: Serialize>(items: &[T]) -> Option<Value> {
    if items.is_empty() {
        None
    } else {
        encode(&items)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> Result<CollabEvent, ProtocolError> {
        let wire: WireEvent = serde_json::from_value(value).unwrap();
        CollabEvent::try_from(wire)
    }

    // ── Kinds ─────────────────────────────────────────────────────

    #[test]
    fn event_type_tags_round_trip() {
        for kind in EventType::ALL {
            assert_eq!(EventType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventType::parse("collab.unknown"), None);
        assert!(EventType::Awareness.is_ephemeral());
        assert!(EventType::Ping.is_ephemeral());
        assert!(!EventType::UpdateText.is_ephemeral());
    }

    // ── Parsing ───────────────────────────────────────────────────

    #[test]
    fn parses_update_text() {
        let event = parse(json!({
            "type": "collab.update_text",
            "path": "notes.[0].text",
            "version": 7,
            "client_id": "c-1",
            "updates": [{"changes": [2, [0, "x"]], "selection": {"ranges": [{"anchor": 3, "head": 3}], "main": 0}}],
        }))
        .unwrap();
        assert_eq!(event.version, Some(7));
        assert_eq!(event.client_id.as_deref(), Some("c-1"));
        let EventBody::UpdateText { path, updates, comments } = event.body else {
            panic!("expected update_text");
        };
        assert_eq!(path.to_string(), "notes.[0].text");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].changes.apply("ab").unwrap(), "abx");
        assert!(updates[0].selection.is_some());
        assert!(comments.is_empty());
    }

    #[test]
    fn update_key_keeps_explicit_null() {
        let event = parse(json!({"type": "collab.update_key", "path": "a", "value": null})).unwrap();
        assert!(matches!(event.body, EventBody::UpdateKey { value: Value::Null, .. }));
        let missing = parse(json!({"type": "collab.update_key", "path": "a"}));
        assert!(matches!(missing, Err(ProtocolError::MissingField { field: "value", .. })));
    }

    #[test]
    fn init_requires_client_id_and_value() {
        let ok = parse(json!({
            "type": "collab.init",
            "version": 3,
            "client_id": "me",
            "value": {"title": "x"},
            "permissions": {"read": true, "write": false},
            "clients": [{"client_id": "me", "client_color": "#f00", "user": {"id": "u1"}}],
        }))
        .unwrap();
        let EventBody::Init { permissions, clients, .. } = ok.body else {
            panic!("expected init");
        };
        assert_eq!(permissions, Some(Permissions { read: true, write: false }));
        assert_eq!(clients[0].client_color, "#f00");

        let no_client = parse(json!({"type": "collab.init", "value": {}}));
        assert!(matches!(no_client, Err(ProtocolError::MissingField { field: "client_id", .. })));
    }

    #[test]
    fn rejects_unknown_type() {
        let err = parse(json!({"type": "collab.teleport", "path": "a"})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEventType(kind) if kind == "collab.teleport"));
    }

    #[test]
    fn rejects_bad_path_and_payload() {
        let bad_path = parse(json!({"type": "collab.delete", "path": "a..b"}));
        assert!(matches!(bad_path, Err(ProtocolError::InvalidPath { .. })));
        let no_path = parse(json!({"type": "collab.delete"}));
        assert!(matches!(no_path, Err(ProtocolError::MissingField { field: "path", .. })));
        let bad_sort = parse(json!({"type": "collab.sort", "path": "a", "sort": "x"}));
        assert!(matches!(bad_sort, Err(ProtocolError::InvalidPayload { field: "sort", .. })));
    }

    #[test]
    fn awareness_path_and_selection_are_optional() {
        let event = parse(json!({"type": "collab.awareness", "client_id": "o", "path": null})).unwrap();
        assert_eq!(event.body, EventBody::Awareness { path: None, selection: None });
    }

    // ── Encoding ──────────────────────────────────────────────────

    #[test]
    fn encodes_outgoing_update_key() {
        let mut event = CollabEvent::new(EventBody::UpdateKey {
            path: FieldPath::parse("title").unwrap(),
            value: json!("New"),
            comments: Vec::new(),
        });
        event.version = Some(4);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "collab.update_key", "path": "title", "version": 4, "value": "New"})
        );
    }

    #[test]
    fn serde_round_trips_through_wire_shape() {
        let event = CollabEvent {
            version: Some(2),
            client_id: Some("c".into()),
            body: EventBody::Sort {
                path: FieldPath::parse("findings").unwrap(),
                sort: vec![SortEntry { id: "f1".into(), order: 2 }],
            },
        };
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<CollabEvent>(&text).unwrap(), event);
    }
}
