// JSON form of a change set: `[retain | [deleteLen, ...insertedLines]]`.
//
// A plain number keeps that many characters. An array deletes its first
// element's worth of characters and inserts the remaining elements joined
// by newlines.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::{Builder, ChangeError, ChangeSet, Section};

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parts = Vec::<Value>::deserialize(deserializer)?;
        Self::from_json(&parts).map_err(serde::de::Error::custom)
    }
}

impl ChangeSet {
    pub fn to_json(&self) -> Value {
        let parts = self
            .sections
            .iter()
            .map(|section| match section {
                Section::Retain(n) => Value::from(*n),
                Section::Replace { delete, insert } => {
                    let mut part = vec![Value::from(*delete)];
                    if !insert.is_empty() {
                        part.extend(insert.split('\n').map(Value::from));
                    }
                    Value::Array(part)
                }
            })
            .collect();
        Value::Array(parts)
    }

    pub fn from_json(parts: &[Value]) -> Result<Self, ChangeError> {
        let mut builder = Builder::default();
        for part in parts {
            match part {
                Value::Number(_) => builder.retain(length(part)?),
                Value::Array(items) => {
                    let (first, lines) = items
                        .split_first()
                        .ok_or_else(|| ChangeError::Malformed("empty replacement".into()))?;
                    builder.delete(length(first)?);
                    let lines = lines
                        .iter()
                        .map(|line| {
                            line.as_str().ok_or_else(|| {
                                ChangeError::Malformed(format!("inserted line is not text: {line}"))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    builder.insert(&lines.join("\n"));
                }
                other => {
                    return Err(ChangeError::Malformed(format!("unexpected section {other}")));
                }
            }
        }
        Ok(builder.finish())
    }
}

fn length(value: &Value) -> Result<usize, ChangeError> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ChangeError::Malformed(format!("expected a length, got {value}")))
}
