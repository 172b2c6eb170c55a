// Comment position tracker.
//
// Comments are keyed by id and anchored to a character range of one text
// field. Anchors are kept in local text coordinates and move with every
// change applied to their field. An anchor that collapses or stops fitting
// the text becomes `None` (unanchored); the comment itself stays.

use std::collections::BTreeMap;

use fieldsync_common::change::ChangeSet;
use fieldsync_common::path::{FieldPath, ListShift, Reindexed};
use fieldsync_common::protocol::{Comment, CommentDelta};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CommentBook {
    comments: BTreeMap<String, Comment>,
}

impl CommentBook {
    pub fn replace_all(&mut self, comments: Vec<Comment>) {
        self.comments = comments.into_iter().map(|c| (c.id.clone(), c)).collect();
    }

    pub fn get(&self, id: &str) -> Option<&Comment> {
        self.comments.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Comment> {
        self.comments.values()
    }

    pub fn upsert(&mut self, comment: Comment) {
        self.comments.insert(comment.id.clone(), comment);
    }

    /// Merge server-sent deltas. Deltas for unknown ids are taken as new
    /// comments when they carry enough fields to be one. Returns the ids
    /// that changed.
    pub fn apply_deltas(&mut self, deltas: &[CommentDelta]) -> Vec<String> {
        let mut touched = Vec::with_capacity(deltas.len());
        for delta in deltas {
            let merged = match self.comments.get(&delta.id) {
                Some(existing) => existing.merge(delta),
                None => {
                    let mut fields = delta.fields.clone();
                    fields.insert("id".into(), Value::String(delta.id.clone()));
                    serde_json::from_value(Value::Object(fields))
                }
            };
            match merged {
                Ok(comment) => {
                    self.upsert(comment);
                    touched.push(delta.id.clone());
                }
                Err(error) => debug!(comment_id = %delta.id, %error, "ignoring comment delta"),
            }
        }
        touched
    }

    /// Write `value` at `field` inside comment `id`, or replace the whole
    /// comment when `field` is `None`.
    pub fn set_field(
        &mut self,
        id: &str,
        field: Option<&FieldPath>,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut raw = match field {
            None => value,
            Some(field) => {
                let mut raw = self.raw(id);
                field.set(&mut raw, value)?;
                raw
            }
        };
        self.store_raw(id, &mut raw)
    }

    /// Remove comment `id`, or just one of its fields.
    pub fn unset_field(&mut self, id: &str, field: Option<&FieldPath>) -> Result<(), StoreError> {
        let Some(field) = field else {
            self.comments.remove(id);
            return Ok(());
        };
        if !self.comments.contains_key(id) {
            return Ok(());
        }
        let mut raw = self.raw(id);
        field.unset(&mut raw);
        self.store_raw(id, &mut raw)
    }

    /// Map every anchor in the text at `path` through `changes`.
    pub fn map_through(&mut self, path: &FieldPath, changes: &ChangeSet) {
        for comment in self.anchored_at(path) {
            comment.text_range = comment.text_range.and_then(|range| range.map(changes));
        }
    }

    /// Map the anchors of the listed comments only.
    pub fn map_some(&mut self, ids: &[String], path: &FieldPath, changes: &ChangeSet) {
        for id in ids {
            let Some(comment) = self.comments.get_mut(id) else {
                continue;
            };
            if comment.path.as_ref().is_some_and(|own| own.same_as(path)) {
                comment.text_range = comment.text_range.and_then(|range| range.map(changes));
            }
        }
    }

    /// Unanchor comments at `path` whose range no longer fits `len`.
    pub fn validate_against(&mut self, path: &FieldPath, len: usize) {
        for comment in self.anchored_at(path) {
            if comment.text_range.is_some_and(|range| !range.fits(len)) {
                comment.text_range = None;
            }
        }
    }

    /// Detach comments anchored anywhere under `prefix`.
    pub fn detach_under(&mut self, prefix: &FieldPath) {
        for comment in self.comments.values_mut() {
            if comment.path.as_ref().is_some_and(|own| own.starts_with(prefix)) {
                comment.path = None;
                comment.text_range = None;
            }
        }
    }

    /// Re-express anchor paths after a list insert or removal.
    pub fn reindex(&mut self, list: &FieldPath, index: usize, shift: ListShift) {
        for comment in self.comments.values_mut() {
            let Some(path) = &comment.path else {
                continue;
            };
            match path.reindex(list, index, shift) {
                Reindexed::Unchanged => {}
                Reindexed::Moved(moved) => comment.path = Some(moved),
                Reindexed::Removed => {
                    comment.path = None;
                    comment.text_range = None;
                }
            }
        }
    }

    fn anchored_at<'a>(&'a mut self, path: &'a FieldPath) -> impl Iterator<Item = &'a mut Comment> {
        self.comments
            .values_mut()
            .filter(move |comment| comment.path.as_ref().is_some_and(|own| own.same_as(path)))
    }

    fn raw(&self, id: &str) -> Value {
        self.comments
            .get(id)
            .and_then(|comment| serde_json::to_value(comment).ok())
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    fn store_raw(&mut self, id: &str, raw: &mut Value) -> Result<(), StoreError> {
        let Value::Object(map) = raw else {
            return Err(StoreError::Comment { id: id.into(), message: "not an object".into() });
        };
        map.insert("id".into(), Value::String(id.to_string()));
        let comment: Comment = serde_json::from_value(Value::Object(std::mem::take(map)))
            .map_err(|error| StoreError::Comment { id: id.into(), message: error.to_string() })?;
        self.upsert(comment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fieldsync_common::change::TextRange;
    use fieldsync_common::protocol::CommentStatus;
    use serde_json::json;

    use super::*;

    fn path(raw: &str) -> FieldPath {
        FieldPath::parse(raw).unwrap()
    }

    fn book_with(id: &str, at: &str, from: usize, to: usize) -> CommentBook {
        let mut book = CommentBook::default();
        book.upsert(Comment::new(id, path(at), TextRange { from, to }));
        book
    }

    // ── Anchors ───────────────────────────────────────────────────

    #[test]
    fn anchor_collapses_when_text_deleted() {
        // "Hello World", comment on [5, 10), remote deletes [0, 11).
        let mut book = book_with("c1", "notes", 5, 10);
        book.map_through(&path("notes"), &ChangeSet::delete(11, 0, 11).unwrap());
        let comment = book.get("c1").unwrap();
        assert_eq!(comment.text_range, None);
        assert_eq!(comment.path, Some(path("notes")));
        assert!(!comment.is_visible());
    }

    #[test]
    fn anchor_moves_with_insert_before_it() {
        let mut book = book_with("c1", "notes", 5, 10);
        book.map_through(&path("notes"), &ChangeSet::insert(11, 0, ">> ").unwrap());
        assert_eq!(book.get("c1").unwrap().text_range, Some(TextRange { from: 8, to: 13 }));
    }

    #[test]
    fn other_fields_are_untouched() {
        let mut book = book_with("c1", "other", 5, 10);
        book.map_through(&path("notes"), &ChangeSet::delete(11, 0, 11).unwrap());
        assert_eq!(book.get("c1").unwrap().text_range, Some(TextRange { from: 5, to: 10 }));
    }

    #[test]
    fn validate_drops_ranges_past_end() {
        let mut book = book_with("c1", "notes", 5, 10);
        book.validate_against(&path("notes"), 7);
        assert_eq!(book.get("c1").unwrap().text_range, None);
    }

    // ── Deltas and key writes ─────────────────────────────────────

    #[test]
    fn deltas_merge_and_create() {
        let mut book = book_with("c1", "notes", 0, 2);
        let deltas: Vec<CommentDelta> = serde_json::from_value(json!([
            {"id": "c1", "status": "resolved"},
            {"id": "c2", "path": "notes", "text_range": {"from": 1, "to": 3}},
            {"id": "c3", "path": 17},
        ]))
        .unwrap();
        let touched = book.apply_deltas(&deltas);
        assert_eq!(touched, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(book.get("c1").unwrap().status, CommentStatus::Resolved);
        assert!(book.get("c2").unwrap().is_visible());
        assert!(book.get("c3").is_none());
    }

    #[test]
    fn set_field_and_whole_comment() {
        let mut book = CommentBook::default();
        book.set_field("c9", None, json!({"path": "notes", "text_range": {"from": 0, "to": 4}}))
            .unwrap();
        assert!(book.get("c9").unwrap().is_visible());

        book.set_field("c9", Some(&path("status")), json!("resolved")).unwrap();
        assert_eq!(book.get("c9").unwrap().status, CommentStatus::Resolved);

        book.set_field("c9", Some(&path("text")), json!("hi")).unwrap();
        assert_eq!(book.get("c9").unwrap().extra["text"], json!("hi"));

        assert!(book.set_field("c9", Some(&path("status")), json!(3)).is_err());
        assert_eq!(book.get("c9").unwrap().status, CommentStatus::Resolved);
    }

    #[test]
    fn unset_field_and_comment() {
        let mut book = book_with("c1", "notes", 0, 2);
        book.unset_field("c1", Some(&path("text_range"))).unwrap();
        assert_eq!(book.get("c1").unwrap().text_range, None);
        book.unset_field("c1", None).unwrap();
        assert!(book.get("c1").is_none());
    }

    // ── Structural changes ────────────────────────────────────────

    #[test]
    fn reindex_and_detach() {
        let mut book = book_with("c1", "items.[2].text", 0, 2);
        book.upsert(Comment::new("c2", path("items.[1].text"), TextRange { from: 0, to: 1 }));

        book.reindex(&path("items"), 1, ListShift::Removed);
        assert_eq!(book.get("c1").unwrap().path, Some(path("items.[1].text")));
        assert_eq!(book.get("c2").unwrap().path, None);

        book.detach_under(&path("items"));
        assert_eq!(book.get("c1").unwrap().path, None);
        assert!(book.iter().all(|comment| !comment.is_visible()));
    }
}
