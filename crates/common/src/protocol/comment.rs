// Comments anchored to a character range of a text field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::change::TextRange;
use crate::path::FieldPath;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStatus {
    #[default]
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    /// The text field the comment is anchored to; `None` once detached.
    #[serde(default)]
    pub path: Option<FieldPath>,
    /// Character offsets into the field's text; `None` while unanchored.
    #[serde(default)]
    pub text_range: Option<TextRange>,
    #[serde(default)]
    pub status: CommentStatus,
    /// Fields this client carries along without interpreting (text, author,
    /// answers, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Comment {
    pub fn new(id: impl Into<String>, path: FieldPath, text_range: TextRange) -> Self {
        Self {
            id: id.into(),
            path: Some(path),
            text_range: Some(text_range),
            status: CommentStatus::Open,
            extra: Map::new(),
        }
    }

    /// Open, attached and anchored.
    pub fn is_visible(&self) -> bool {
        self.status == CommentStatus::Open && self.path.is_some() && self.text_range.is_some()
    }

    /// Overlay the fields carried by `delta`. An explicit `null` clears an
    /// optional field.
    pub fn merge(&self, delta: &CommentDelta) -> Result<Comment, serde_json::Error> {
        let mut merged = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in &delta.fields {
            merged.insert(key.clone(), value.clone());
        }
        merged.insert("id".into(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(merged))
    }
}

/// A partial comment update: the id plus whichever fields changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDelta {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CommentDelta {
    pub fn text_range(id: impl Into<String>, range: Option<TextRange>) -> Self {
        let mut fields = Map::new();
        let value = range.map_or(Value::Null, |r| serde_json::json!({"from": r.from, "to": r.to}));
        fields.insert("text_range".into(), value);
        Self { id: id.into(), fields }
    }

    /// The `text_range` this delta sets, if it touches the anchor at all.
    /// `Some(None)` means the anchor is cleared.
    pub fn anchor(&self) -> Option<Option<TextRange>> {
        let value = self.fields.get("text_range")?;
        Some(serde_json::from_value(value.clone()).ok().flatten())
    }

    /// A delta for `comment` as a whole, used when a full comment arrives as
    /// a key update.
    pub fn from_comment(comment: &Comment) -> Self {
        let fields = match serde_json::to_value(comment) {
            Ok(Value::Object(mut map)) => {
                map.remove("id");
                map
            }
            _ => Map::new(),
        };
        Self { id: comment.id.clone(), fields }
    }
}
