// Collaboration store: the local replica of one shared document.
//
// Holds the document tree, comments, awareness and the per-path queues of
// local edits. Inbound events are applied through `receive*`; local edits
// go through `apply_intent` and come back out of `drain_outgoing`. The
// store does no I/O and never blocks; the session drives it.

mod per_path;
mod rebase;

use std::collections::BTreeMap;

use fieldsync_common::change::{ChangeSet, Selection};
use fieldsync_common::path::{FieldPath, ListShift, PathSegment, Reindexed};
use fieldsync_common::protocol::{
    ClientInfo, CollabEvent, Comment, CommentDelta, EventBody, EventType, FallbackRequest,
    Permissions, SortEntry, TextUpdate, WireEvent,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

pub use self::per_path::PerPathState;
use self::rebase::{ledger_tail, rebase};
use crate::awareness::{AwarenessState, Focus};
use crate::comments::CommentBook;
use crate::error::StoreError;

/// Top-level field under which comments are addressed by path.
const COMMENTS_KEY: &str = "comments";

/// A local edit requested by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum EditIntent {
    UpdateKey { path: FieldPath, value: Value },
    UpdateText { path: FieldPath, changes: ChangeSet, selection: Option<Selection> },
    CreateListItem { path: FieldPath, value: Value },
    DeleteListItem { path: FieldPath },
    UpdateAwareness { path: Option<FieldPath>, selection: Option<Selection> },
}

/// Read-only copy of the store for observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub data: Value,
    pub comments: Vec<Comment>,
    pub awareness: AwarenessState,
    pub version: u64,
    pub client_id: Option<String>,
    pub permissions: Option<Permissions>,
    pub initialized: bool,
    pub pending: usize,
    pub last_error: Option<String>,
    pub revision: u64,
}

#[derive(Debug, Default)]
pub struct CollabStore {
    data: Value,
    comments: CommentBook,
    awareness: AwarenessState,
    version: u64,
    client_id: Option<String>,
    permissions: Option<Permissions>,
    initialized: bool,
    per_path: BTreeMap<FieldPath, PerPathState>,
    next_seq: u64,
    revision: u64,
    awareness_dirty: bool,
    last_error: Option<String>,
}

impl CollabStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn comments(&self) -> &CommentBook {
        &self.comments
    }

    pub fn awareness(&self) -> &AwarenessState {
        &self.awareness
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn permissions(&self) -> Option<Permissions> {
        self.permissions
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Missing permissions allow writing; the server enforces them anyway.
    pub fn can_write(&self) -> bool {
        self.permissions.is_none_or(|permissions| permissions.write)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Bumped on every observable change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn per_path(&self, path: &FieldPath) -> Option<&PerPathState> {
        self.per_path.iter().find(|(key, _)| key.same_as(path)).map(|(_, state)| state)
    }

    /// Number of queued events not yet handed to a transport.
    pub fn pending_count(&self) -> usize {
        self.per_path.values().map(PerPathState::pending_len).sum()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn has_awareness_update(&self) -> bool {
        self.awareness_dirty && self.initialized
    }

    /// Text at `path`. A missing value or `null` reads as empty text.
    pub fn text_at(&self, path: &FieldPath) -> Result<String, StoreError> {
        match path.get(&self.data) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(text)) => Ok(text.clone()),
            Some(_) => Err(StoreError::NotText(path.to_string())),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            data: self.data.clone(),
            comments: self.comments.iter().cloned().collect(),
            awareness: self.awareness.clone(),
            version: self.version,
            client_id: self.client_id.clone(),
            permissions: self.permissions,
            initialized: self.initialized,
            pending: self.pending_count(),
            last_error: self.last_error.clone(),
            revision: self.revision,
        }
    }

    // ── Inbound ────────────────────────────────────────────────────

    /// Validate and apply one message from the transport. Failures are
    /// logged with the local state around them; the caller should drop the
    /// connection and resynchronize.
    pub fn receive_wire(&mut self, wire: WireEvent) -> Result<EventType, StoreError> {
        let event_type = wire.event_type.clone();
        let raw_path = wire.path.clone();
        let remote_version = wire.version;

        let result = CollabEvent::try_from(wire)
            .map_err(StoreError::from)
            .and_then(|event| self.receive(event));

        if let Err(error) = &result {
            let path = raw_path.as_deref().and_then(|raw| FieldPath::parse(raw).ok());
            let current = path.as_ref().and_then(|path| path.get(&self.data)).map(Value::to_string);
            let queue = path.as_ref().and_then(|path| self.per_path(path)).map(PerPathState::describe);
            error!(
                %event_type,
                path = ?raw_path,
                version = ?remote_version,
                local_version = self.version,
                current_value = ?current,
                per_path = ?queue,
                %error,
                "failed to apply collaboration event"
            );
        }
        result
    }

    /// Apply one validated event.
    pub fn receive(&mut self, event: CollabEvent) -> Result<EventType, StoreError> {
        let kind = event.kind();
        let own = event.client_id.is_some() && event.client_id == self.client_id;
        let sender = event.client_id;
        let version = event.version;

        match event.body {
            EventBody::Init { value, comments, permissions, clients, .. } => {
                self.on_init(version, sender, value, comments, permissions, clients);
                return Ok(kind);
            }
            EventBody::Connect { client } => self.awareness.add_client(client),
            EventBody::Disconnect => {
                if let Some(sender) = &sender {
                    self.awareness.remove_client(sender);
                }
            }
            EventBody::UpdateKey { path, value, comments } => {
                self.on_update_key(&path, value, &comments, own)?;
            }
            EventBody::UpdateText { path, updates, comments } => {
                self.on_update_text(&path, &updates, &comments, sender.as_deref(), own)?;
            }
            EventBody::Create { path, value } => self.on_create(&path, value)?,
            EventBody::Delete { path, comments } => self.on_delete(&path, &comments)?,
            EventBody::Sort { path, sort } => self.on_sort(&path, &sort),
            EventBody::Awareness { path, selection } => {
                if let Some(sender) = sender.as_deref().filter(|_| !own) {
                    self.on_awareness(sender, path, selection);
                }
            }
            EventBody::Error { message } => {
                let message = message.unwrap_or_else(|| "unknown error".to_string());
                warn!(%message, "server reported an error");
                self.last_error = Some(message);
            }
            EventBody::Ping => return Ok(kind),
        }

        if let Some(version) = version {
            self.version = self.version.max(version);
        }
        self.bump();
        Ok(kind)
    }

    fn on_init(
        &mut self,
        version: Option<u64>,
        client_id: Option<String>,
        value: Value,
        comments: Vec<Comment>,
        permissions: Option<Permissions>,
        clients: Vec<ClientInfo>,
    ) {
        self.data = value;
        self.comments.replace_all(comments);
        self.client_id = client_id;
        self.permissions = permissions;
        self.per_path.clear();
        self.awareness.clear_remote();
        self.awareness.replace_clients(clients);
        self.version = self.version.max(version.unwrap_or(0));
        self.initialized = true;
        self.last_error = None;

        // The local selection may not fit the fresh text.
        if let Some(path) = self.awareness.local().path.clone() {
            match path.get(&self.data) {
                Some(Value::String(text)) => {
                    self.awareness.validate_against(&path, text.chars().count());
                }
                _ => self.awareness.invalidate_under(&path),
            }
        }
        self.awareness_dirty = true;
        debug!(version = self.version, client_id = ?self.client_id, "document initialized");
        self.bump();
    }

    fn on_update_key(
        &mut self,
        path: &FieldPath,
        value: Value,
        comments: &[CommentDelta],
        own: bool,
    ) -> Result<(), StoreError> {
        let locally_pending = self.per_path(path).is_some_and(PerPathState::has_unsent_key_update);
        // Our own write to an unknown comment was never applied locally.
        let applied = own && !self.is_unknown_comment(path);
        if !applied && !locally_pending {
            let text_len = value.as_str().map(|text| text.chars().count());
            self.write_key(path, value)?;
            for (key, state) in self.per_path.iter_mut() {
                if key.starts_with(path) {
                    state.drop_text();
                }
            }
            match text_len {
                Some(len) => {
                    self.awareness.validate_against(path, len);
                    self.comments.validate_against(path, len);
                }
                None => self.awareness.invalidate_under(path),
            }
        }
        self.comments.apply_deltas(comments);
        Ok(())
    }

    fn on_update_text(
        &mut self,
        path: &FieldPath,
        updates: &[TextUpdate],
        comments: &[CommentDelta],
        sender: Option<&str>,
        own: bool,
    ) -> Result<(), StoreError> {
        let text = self.text_at(path)?;
        let key = self.state_key(path);
        let ledger = self.per_path.get(&key).map(|state| state.unconfirmed.as_slice()).unwrap_or_default();
        let rebased = rebase(&text, ledger, updates, own)?;
        let tail = ledger_tail(&rebased.ledger)?;

        path.set(&mut self.data, Value::String(rebased.text))?;
        if let Some(state) = self.per_path.get_mut(&key) {
            state.unconfirmed = rebased.ledger;
        }
        self.awareness.map_text(path, &rebased.remote);
        self.comments.map_through(path, &rebased.remote);

        // The sender's selection and comment deltas are in server
        // coordinates; move them past what we still have unconfirmed.
        let to_local = |selection: &Selection| match &tail {
            Some(tail) => selection.map(tail),
            None => Some(selection.clone()),
        };
        if let Some(sender) = sender.filter(|_| !own) {
            let selection = updates.iter().rev().find_map(|update| update.selection.as_ref());
            let focus = Focus::new(Some(path.clone()), selection.and_then(to_local));
            self.awareness.set_remote(sender, focus);
        }
        self.comments.apply_deltas(comments);
        if let Some(tail) = &tail {
            let anchored: Vec<String> = comments
                .iter()
                .filter(|delta| delta.anchor().is_some())
                .map(|delta| delta.id.clone())
                .collect();
            self.comments.map_some(&anchored, path, tail);
        }
        Ok(())
    }

    fn on_create(&mut self, path: &FieldPath, value: Value) -> Result<(), StoreError> {
        if let Some((id, field)) = comment_target(path) {
            return self.comments.set_field(&id, field.as_ref(), value);
        }
        if let Some((list, _)) = self.list_element(path) {
            let at = path.insert(&mut self.data, value)?;
            self.reindex(&list, at, ListShift::Inserted);
            return Ok(());
        }
        match path.get_mut(&mut self.data) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                path.set(&mut self.data, value)?;
            }
        }
        Ok(())
    }

    fn on_delete(&mut self, path: &FieldPath, comments: &[CommentDelta]) -> Result<(), StoreError> {
        if let Some((id, field)) = comment_target(path) {
            self.comments.unset_field(&id, field.as_ref())?;
        } else if let Some((list, index)) = self.list_element(path) {
            if path.unset(&mut self.data).is_some() {
                self.reindex(&list, index, ListShift::Removed);
            }
        } else {
            path.unset(&mut self.data);
            self.awareness.remove_under(path);
            self.comments.detach_under(path);
            self.per_path.retain(|key, _| !key.starts_with(path));
        }
        self.comments.apply_deltas(comments);
        Ok(())
    }

    fn on_sort(&mut self, path: &FieldPath, sort: &[SortEntry]) {
        let item_for = |item: &Value, id: &str| item.get("id").and_then(Value::as_str) == Some(id);
        match path.get_mut(&mut self.data) {
            Some(Value::Object(map)) => {
                for entry in sort {
                    if let Some(Value::Object(item)) = map.get_mut(&entry.id) {
                        item.insert("order".into(), entry.order.into());
                    }
                }
            }
            Some(Value::Array(items)) => {
                for entry in sort {
                    if let Some(Value::Object(item)) =
                        items.iter_mut().find(|item| item_for(item, &entry.id))
                    {
                        item.insert("order".into(), entry.order.into());
                    }
                }
            }
            _ => debug!(%path, "sort target is not a collection"),
        }
    }

    fn on_awareness(&mut self, sender: &str, path: Option<FieldPath>, selection: Option<Selection>) {
        let selection = match (&path, selection) {
            (Some(path), Some(selection)) => self.server_selection_to_local(path, &selection),
            _ => None,
        };
        if !self.awareness.set_remote(sender, Focus::new(path, selection)) {
            debug!(client_id = %sender, "awareness from unknown client");
        }
    }

    /// Check a selection against the server text at `path` and move it
    /// past our unconfirmed edits.
    fn server_selection_to_local(
        &self,
        path: &FieldPath,
        selection: &Selection,
    ) -> Option<Selection> {
        let local_len = path.get_str(&self.data)?.chars().count();
        let ledger = self.per_path(path).map(|state| state.unconfirmed.as_slice()).unwrap_or_default();
        match ledger_tail(ledger) {
            Ok(Some(tail)) if selection.fits(tail.len()) => selection.map(&tail),
            Ok(None) if selection.fits(local_len) => Some(selection.clone()),
            Ok(_) => None,
            Err(error) => {
                debug!(%path, %error, "unconfirmed edits do not compose");
                None
            }
        }
    }

    // ── Outbound ───────────────────────────────────────────────────

    /// Apply a local edit optimistically and queue it for sending. List
    /// inserts and removals are only queued; they show up once the server
    /// broadcasts them.
    pub fn apply_intent(&mut self, intent: EditIntent) -> Result<(), StoreError> {
        if let EditIntent::UpdateAwareness { path, selection } = intent {
            if self.awareness.set_local(Focus::new(path, selection)) {
                self.awareness_dirty = true;
                self.bump();
            }
            return Ok(());
        }
        if !self.can_write() {
            return Err(StoreError::ReadOnly);
        }

        match intent {
            EditIntent::UpdateKey { path, value } => {
                if !self.is_unknown_comment(&path) {
                    self.write_key(&path, value.clone())?;
                }
                let seq = self.next_seq();
                let state = self.state_mut(&path);
                state.drop_text();
                state.push_key_update(
                    seq,
                    CollabEvent::new(EventBody::UpdateKey { path, value, comments: Vec::new() }),
                );
            }
            EditIntent::UpdateText { path, changes, selection } => {
                self.local_text_change(path, changes, selection)?;
            }
            EditIntent::CreateListItem { path, value } => {
                let seq = self.next_seq();
                let event = CollabEvent::new(EventBody::Create { path: path.clone(), value });
                self.state_mut(&path).push_event(seq, event);
            }
            EditIntent::DeleteListItem { path } => {
                let seq = self.next_seq();
                let event =
                    CollabEvent::new(EventBody::Delete { path: path.clone(), comments: Vec::new() });
                self.state_mut(&path).push_event(seq, event);
            }
            EditIntent::UpdateAwareness { .. } => {}
        }
        self.bump();
        Ok(())
    }

    fn local_text_change(
        &mut self,
        path: FieldPath,
        changes: ChangeSet,
        selection: Option<Selection>,
    ) -> Result<(), StoreError> {
        let text = self.text_at(&path)?;
        let updated = changes.apply(&text)?;
        let seq = self.next_seq();
        self.state_mut(&path).push_text(seq, changes.clone(), selection.clone())?;
        path.set(&mut self.data, Value::String(updated))?;

        self.awareness.map_text(&path, &changes);
        self.comments.map_through(&path, &changes);
        let selection = selection.or_else(|| {
            let local = self.awareness.local();
            local.path.as_ref().is_some_and(|own| own.same_as(&path)).then(|| local.selection.clone())?
        });
        let moved_focus = !self.awareness.local().path.as_ref().is_some_and(|own| own.same_as(&path));
        self.awareness.set_local(Focus::new(Some(path), selection));
        // The selection rides along with the text update; only a focus move
        // needs its own awareness message.
        if moved_focus {
            self.awareness_dirty = true;
        }
        Ok(())
    }

    /// Take every queued event in the order it was made, stamped with the
    /// current version and client id.
    pub fn drain_outgoing(&mut self) -> Vec<CollabEvent> {
        let mut batch = Vec::new();
        for (path, state) in self.per_path.iter_mut() {
            for pending in state.pending.drain(..) {
                match pending.kind {
                    per_path::PendingKind::Event(event) => batch.push((pending.seq, event)),
                    per_path::PendingKind::Text => {
                        let Some(entry) = state.unconfirmed.iter_mut().find(|entry| !entry.sent) else {
                            continue;
                        };
                        entry.sent = true;
                        let update = TextUpdate {
                            changes: entry.changes.clone(),
                            selection: entry.selection.clone(),
                        };
                        let body = EventBody::UpdateText {
                            path: path.clone(),
                            updates: vec![update],
                            comments: Vec::new(),
                        };
                        batch.push((pending.seq, CollabEvent::new(body)));
                    }
                }
            }
        }
        self.per_path.retain(|_, state| !state.is_idle());
        batch.sort_by_key(|(seq, _)| *seq);
        batch.into_iter().map(|(_, event)| self.stamp(event)).collect()
    }

    /// The local focus as an awareness event, if it changed since last
    /// taken.
    pub fn take_awareness_event(&mut self) -> Option<CollabEvent> {
        if !self.has_awareness_update() {
            return None;
        }
        self.awareness_dirty = false;
        let local = self.awareness.local().clone();
        let body = EventBody::Awareness { path: local.path, selection: local.selection };
        Some(self.stamp(CollabEvent::new(body)))
    }

    /// Queued events packed for a one-off fallback POST before reconnecting.
    pub fn take_pending_for_flush(&mut self) -> Option<FallbackRequest> {
        let messages = self.drain_outgoing();
        if messages.is_empty() {
            return None;
        }
        Some(FallbackRequest { version: self.version, client_id: self.client_id.clone(), messages })
    }

    /// Forget connection-scoped state; the next INIT brings a fresh copy.
    pub fn reset_for_reconnect(&mut self) {
        self.version = 0;
        self.per_path.clear();
        self.awareness.clear_remote();
        self.initialized = false;
        self.bump();
    }

    /// Bookkeeping from a fallback poll response.
    pub fn sync_fallback(&mut self, version: u64, clients: Vec<ClientInfo>) {
        self.version = self.version.max(version);
        self.awareness.replace_clients(clients);
        self.bump();
    }

    // ── Internals ──────────────────────────────────────────────────

    fn bump(&mut self) {
        self.revision += 1;
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn stamp(&self, mut event: CollabEvent) -> CollabEvent {
        event.version = Some(self.version);
        event.client_id = self.client_id.clone();
        event
    }

    /// The per-path key already used for `path`, whichever notation it was
    /// written in.
    fn state_key(&self, path: &FieldPath) -> FieldPath {
        self.per_path.keys().find(|key| key.same_as(path)).cloned().unwrap_or_else(|| path.clone())
    }

    fn state_mut(&mut self, path: &FieldPath) -> &mut PerPathState {
        let key = self.state_key(path);
        self.per_path.entry(key).or_default()
    }

    fn write_key(&mut self, path: &FieldPath, value: Value) -> Result<(), StoreError> {
        match comment_target(path) {
            Some((id, field)) => self.comments.set_field(&id, field.as_ref(), value),
            None => {
                path.set(&mut self.data, value)?;
                Ok(())
            }
        }
    }

    /// Comments exist only once the server has confirmed them.
    fn is_unknown_comment(&self, path: &FieldPath) -> bool {
        comment_target(path).is_some_and(|(id, _)| self.comments.get(&id).is_none())
    }

    /// `(list, index)` when `path` addresses an element of an existing list.
    fn list_element(&self, path: &FieldPath) -> Option<(FieldPath, usize)> {
        let list = path.parent()?;
        let index = path.last().as_index()?;
        matches!(list.get(&self.data), Some(Value::Array(_))).then_some((list, index))
    }

    fn reindex(&mut self, list: &FieldPath, index: usize, shift: ListShift) {
        self.awareness.reindex(list, index, shift);
        self.comments.reindex(list, index, shift);
        let states = std::mem::take(&mut self.per_path);
        for (key, state) in states {
            match key.reindex(list, index, shift) {
                Reindexed::Unchanged => {
                    self.per_path.insert(key, state);
                }
                Reindexed::Moved(moved) => {
                    let mut state = state;
                    state.retarget(&moved);
                    self.per_path.insert(moved, state);
                }
                Reindexed::Removed => {}
            }
        }
    }
}

/// `(comment id, field inside it)` for paths of the form
/// `comments.<id>[.<field>...]`.
fn comment_target(path: &FieldPath) -> Option<(String, Option<FieldPath>)> {
    match path.segments() {
        [PathSegment::Key(root), id, rest @ ..] if root == COMMENTS_KEY => {
            let field = FieldPath::from_segments(rest.to_vec()).ok();
            Some((id.as_key(), field))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use fieldsync_common::change::TextRange;
    use fieldsync_common::protocol::{CommentStatus, UserInfo};
    use serde_json::json;

    use super::*;

    fn path(raw: &str) -> FieldPath {
        FieldPath::parse(raw).unwrap()
    }

    fn client(id: &str) -> ClientInfo {
        ClientInfo { client_id: id.into(), client_color: "#abcdef".into(), user: UserInfo::default() }
    }

    fn init(store: &mut CollabStore, client_id: &str, value: Value) {
        let event = CollabEvent {
            version: Some(1),
            client_id: Some(client_id.into()),
            body: EventBody::Init {
                path: None,
                value,
                comments: Vec::new(),
                permissions: Some(Permissions { read: true, write: true }),
                clients: vec![client("me"), client("other")],
            },
        };
        store.receive(event).unwrap();
    }

    fn ready(value: Value) -> CollabStore {
        let mut store = CollabStore::new();
        init(&mut store, "me", value);
        store
    }

    fn text_event(from: &str, version: u64, at: &str, changes: ChangeSet) -> CollabEvent {
        CollabEvent {
            version: Some(version),
            client_id: Some(from.into()),
            body: EventBody::UpdateText {
                path: path(at),
                updates: vec![TextUpdate { changes, selection: None }],
                comments: Vec::new(),
            },
        }
    }

    fn type_text(store: &mut CollabStore, at: &str, pos: usize, text: &str) {
        let len = store.text_at(&path(at)).unwrap().chars().count();
        let changes = ChangeSet::insert(len, pos, text).unwrap();
        store
            .apply_intent(EditIntent::UpdateText { path: path(at), changes, selection: None })
            .unwrap();
    }

    // ── Handshake ─────────────────────────────────────────────────

    #[test]
    fn init_replaces_state() {
        let mut store = ready(json!({"title": "x"}));
        store.apply_intent(EditIntent::UpdateKey { path: path("title"), value: json!("y") }).unwrap();
        assert!(store.has_pending());

        init(&mut store, "me-again", json!({"title": "server"}));
        assert_eq!(store.data(), &json!({"title": "server"}));
        assert_eq!(store.client_id(), Some("me-again"));
        assert!(!store.has_pending());
        assert!(store.is_initialized());
        assert_eq!(store.awareness().clients().len(), 2);
    }

    #[test]
    fn init_without_client_id_is_a_protocol_fault() {
        let mut store = CollabStore::new();
        let wire = WireEvent::decode(r#"{"type":"collab.init","value":{}}"#).unwrap();
        assert!(matches!(store.receive_wire(wire), Err(StoreError::Protocol(_))));
        assert!(!store.is_initialized());
    }

    // ── Text ──────────────────────────────────────────────────────

    #[test]
    fn own_echo_is_idempotent() {
        let mut store = ready(json!({"notes": ""}));
        type_text(&mut store, "notes", 0, "a");
        let outgoing = store.drain_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(store.per_path(&path("notes")).unwrap().unconfirmed_len(), 1);

        let mut echo = outgoing[0].clone();
        echo.version = Some(2);
        store.receive(echo).unwrap();
        assert_eq!(store.text_at(&path("notes")).unwrap(), "a");
        assert!(store.per_path(&path("notes")).is_none_or(|state| state.unconfirmed_len() == 0));
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn concurrent_inserts_converge() {
        // Two replicas of "" type "a" and "b" concurrently; the server
        // orders A first.
        let mut a = ready(json!({"t": ""}));
        let mut b = CollabStore::new();
        init(&mut b, "other", json!({"t": ""}));

        type_text(&mut a, "t", 0, "a");
        type_text(&mut b, "t", 0, "b");
        let from_a = a.drain_outgoing().remove(0);
        let from_b = b.drain_outgoing().remove(0);

        // Server order: A's update, then B's rebased onto it. B's change is
        // broadcast as the server applied it.
        let b_on_server = match &from_b.body {
            EventBody::UpdateText { updates, .. } => {
                updates[0].changes.map(&ChangeSet::insert(0, 0, "a").unwrap(), false).unwrap()
            }
            _ => unreachable!(),
        };

        a.receive(from_a.clone()).unwrap();
        a.receive(text_event("other", 3, "t", b_on_server.clone())).unwrap();
        b.receive(text_event("me", 2, "t", ChangeSet::insert(0, 0, "a").unwrap())).unwrap();
        b.receive(text_event("other", 3, "t", b_on_server)).unwrap();

        assert_eq!(a.text_at(&path("t")).unwrap(), "ab");
        assert_eq!(b.text_at(&path("t")).unwrap(), "ab");
    }

    #[test]
    fn delete_against_unconfirmed_insert_converges() {
        // Both start at "ab". A inserts "X" at 0, B deletes "a"; the server
        // orders B's delete first.
        let mut a = ready(json!({"t": "ab"}));
        let mut b = CollabStore::new();
        init(&mut b, "other", json!({"t": "ab"}));

        type_text(&mut a, "t", 0, "X");
        let from_a = a.drain_outgoing().remove(0);
        let delete = ChangeSet::delete(2, 0, 1).unwrap();
        let intent =
            EditIntent::UpdateText { path: path("t"), changes: delete.clone(), selection: None };
        b.apply_intent(intent).unwrap();
        let from_b = b.drain_outgoing().remove(0);
        assert_eq!(a.text_at(&path("t")).unwrap(), "Xab");
        assert_eq!(b.text_at(&path("t")).unwrap(), "b");

        let mut b_echo = from_b;
        b_echo.version = Some(2);
        let a_on_server = ChangeSet::insert(1, 0, "X").unwrap();

        a.receive(text_event("other", 2, "t", delete)).unwrap();
        assert_eq!(a.text_at(&path("t")).unwrap(), "Xb");
        let mut a_echo = from_a;
        a_echo.version = Some(3);
        a.receive(a_echo).unwrap();

        b.receive(b_echo).unwrap();
        b.receive(text_event("me", 3, "t", a_on_server)).unwrap();

        assert_eq!(a.text_at(&path("t")).unwrap(), "Xb");
        assert_eq!(b.text_at(&path("t")).unwrap(), "Xb");
        assert!(a.per_path(&path("t")).is_none_or(|state| state.unconfirmed_len() == 0));
        assert_eq!((a.version(), b.version()), (3, 3));
    }

    #[test]
    fn unsent_edits_coalesce_into_one_update() {
        let mut store = ready(json!({"t": ""}));
        for (pos, ch) in ["h", "e", "l", "l", "o"].iter().enumerate() {
            type_text(&mut store, "t", pos, ch);
        }
        let outgoing = store.drain_outgoing();
        assert_eq!(outgoing.len(), 1);
        match &outgoing[0].body {
            EventBody::UpdateText { updates, .. } => {
                assert_eq!(updates[0].changes.apply("").unwrap(), "hello");
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(outgoing[0].version, Some(1));
        assert_eq!(outgoing[0].client_id.as_deref(), Some("me"));
    }

    #[test]
    fn text_edit_length_mismatch_is_rejected() {
        let mut store = ready(json!({"t": "abc"}));
        let changes = ChangeSet::insert(10, 0, "x").unwrap();
        let result = store.apply_intent(EditIntent::UpdateText { path: path("t"), changes, selection: None });
        assert!(matches!(result, Err(StoreError::Change(_))));
        assert_eq!(store.text_at(&path("t")).unwrap(), "abc");
        assert!(!store.has_pending());
    }

    #[test]
    fn remote_text_moves_comment_anchor_to_none() {
        let mut store = ready(json!({"notes": "Hello World"}));
        store.comments.upsert(Comment::new("c1", path("notes"), TextRange { from: 5, to: 10 }));
        store.receive(text_event("other", 2, "notes", ChangeSet::delete(11, 0, 11).unwrap())).unwrap();
        assert_eq!(store.text_at(&path("notes")).unwrap(), "");
        assert_eq!(store.comments().get("c1").unwrap().text_range, None);
    }

    #[test]
    fn remote_selection_lands_in_local_coordinates() {
        let mut store = ready(json!({"t": "abc"}));
        type_text(&mut store, "t", 0, "xx");
        store.drain_outgoing();

        let mut event = text_event("other", 2, "t", ChangeSet::insert(3, 3, "!").unwrap());
        if let EventBody::UpdateText { updates, .. } = &mut event.body {
            updates[0].selection = Some(Selection::single(4, 4));
        }
        store.receive(event).unwrap();
        assert_eq!(store.text_at(&path("t")).unwrap(), "xxabc!");
        assert_eq!(store.awareness().other()["other"].selection, Some(Selection::single(6, 6)));
    }

    fn awareness_event(from: &str, at: &str, selection: Selection) -> CollabEvent {
        CollabEvent {
            version: None,
            client_id: Some(from.into()),
            body: EventBody::Awareness { path: Some(path(at)), selection: Some(selection) },
        }
    }

    #[test]
    fn remote_cursor_moves_past_unconfirmed_insert() {
        let mut store = ready(json!({"t": "abc"}));
        type_text(&mut store, "t", 0, "xx");
        store.drain_outgoing();

        store.receive(awareness_event("other", "t", Selection::single(3, 3))).unwrap();
        assert_eq!(store.text_at(&path("t")).unwrap(), "xxabc");
        assert_eq!(store.awareness().other()["other"].selection, Some(Selection::single(5, 5)));
    }

    #[test]
    fn remote_cursor_checked_against_server_text_not_local() {
        let mut store = ready(json!({"t": "abcd"}));
        let changes = ChangeSet::delete(4, 0, 2).unwrap();
        store.apply_intent(EditIntent::UpdateText { path: path("t"), changes, selection: None }).unwrap();

        // Valid on the server's "abcd" although the local text is "cd".
        store.receive(awareness_event("other", "t", Selection::single(4, 4))).unwrap();
        assert_eq!(store.awareness().other()["other"].selection, Some(Selection::single(2, 2)));

        store.receive(awareness_event("other", "t", Selection::single(0, 5))).unwrap();
        assert_eq!(store.awareness().other()["other"].selection, None);
    }

    // ── Keys ──────────────────────────────────────────────────────

    #[test]
    fn key_updates_coalesce_and_keep_order() {
        let mut store = ready(json!({}));
        store.apply_intent(EditIntent::UpdateKey { path: path("a"), value: json!(1) }).unwrap();
        store.apply_intent(EditIntent::UpdateKey { path: path("b"), value: json!(2) }).unwrap();
        store.apply_intent(EditIntent::UpdateKey { path: path("a"), value: json!(3) }).unwrap();
        let paths: Vec<_> = store
            .drain_outgoing()
            .into_iter()
            .map(|event| match event.body {
                EventBody::UpdateKey { path, value, .. } => (path.to_string(), value),
                other => panic!("unexpected body {other:?}"),
            })
            .collect();
        assert_eq!(paths, vec![("a".into(), json!(3)), ("b".into(), json!(2))]);
    }

    #[test]
    fn remote_key_update_skipped_while_local_one_pending() {
        let mut store = ready(json!({"title": "x"}));
        store.apply_intent(EditIntent::UpdateKey { path: path("title"), value: json!("mine") }).unwrap();
        let remote = CollabEvent {
            version: Some(2),
            client_id: Some("other".into()),
            body: EventBody::UpdateKey { path: path("title"), value: json!("theirs"), comments: Vec::new() },
        };
        store.receive(remote.clone()).unwrap();
        assert_eq!(store.data()["title"], json!("mine"));

        store.drain_outgoing();
        store.receive(remote).unwrap();
        assert_eq!(store.data()["title"], json!("theirs"));
    }

    #[test]
    fn read_only_refuses_edits_but_not_awareness() {
        let mut store = CollabStore::new();
        store
            .receive(CollabEvent {
                version: Some(1),
                client_id: Some("me".into()),
                body: EventBody::Init {
                    path: None,
                    value: json!({"t": ""}),
                    comments: Vec::new(),
                    permissions: Some(Permissions { read: true, write: false }),
                    clients: Vec::new(),
                },
            })
            .unwrap();
        let result = store.apply_intent(EditIntent::UpdateKey { path: path("t"), value: json!("x") });
        assert!(matches!(result, Err(StoreError::ReadOnly)));
        store
            .apply_intent(EditIntent::UpdateAwareness { path: Some(path("t")), selection: None })
            .unwrap();
        assert!(store.take_awareness_event().is_some());
        assert!(store.take_awareness_event().is_none());
    }

    #[test]
    fn comment_paths_route_to_comment_book() {
        let mut store = ready(json!({"notes": "Hello"}));
        store
            .apply_intent(EditIntent::UpdateKey {
                path: path("comments.c1"),
                value: json!({"path": "notes", "text_range": {"from": 0, "to": 5}}),
            })
            .unwrap();
        assert!(store.comments().get("c1").is_none());
        assert!(store.data().get("comments").is_none());

        let mut echo = store.drain_outgoing().remove(0);
        echo.version = Some(2);
        store.receive(echo).unwrap();
        assert!(store.comments().get("c1").unwrap().is_visible());

        // Known comments update optimistically.
        store
            .apply_intent(EditIntent::UpdateKey { path: path("comments.c1.status"), value: json!("resolved") })
            .unwrap();
        assert_eq!(store.comments().get("c1").unwrap().status, CommentStatus::Resolved);
        assert!(store.has_pending());
        assert!(store.data().get("comments").is_none());
    }

    // ── Structure ─────────────────────────────────────────────────

    #[test]
    fn create_and_delete_are_not_applied_optimistically() {
        let mut store = ready(json!({"items": []}));
        store
            .apply_intent(EditIntent::CreateListItem { path: path("items.[0]"), value: json!({"id": "x"}) })
            .unwrap();
        assert_eq!(store.data()["items"], json!([]));
        let outgoing = store.drain_outgoing();
        assert_eq!(outgoing[0].kind(), EventType::Create);
    }

    #[test]
    fn list_removal_reindexes_focus_and_comments() {
        let mut store = ready(json!({"items": [{"t": "a"}, {"t": "b"}, {"t": "c"}]}));
        store.comments.upsert(Comment::new("c1", path("items.[2].t"), TextRange { from: 0, to: 1 }));
        let focus = EventBody::Awareness {
            path: Some(path("items.[1].t")),
            selection: Some(Selection::single(0, 1)),
        };
        store
            .receive(CollabEvent { version: Some(2), client_id: Some("other".into()), body: focus })
            .unwrap();

        store
            .receive(CollabEvent {
                version: Some(3),
                client_id: Some("other".into()),
                body: EventBody::Delete { path: path("items.[1]"), comments: Vec::new() },
            })
            .unwrap();
        assert_eq!(store.data()["items"], json!([{"t": "a"}, {"t": "c"}]));
        assert_eq!(store.comments().get("c1").unwrap().path, Some(path("items.[1].t")));
        assert_eq!(store.awareness().other()["other"], Focus::default());
    }

    #[test]
    fn create_inserts_into_list_and_sort_sets_order() {
        let mut store = ready(json!({"items": [{"id": "a"}]}));
        store
            .receive(CollabEvent {
                version: Some(2),
                client_id: Some("other".into()),
                body: EventBody::Create { path: path("items.[0]"), value: json!({"id": "b"}) },
            })
            .unwrap();
        store
            .receive(CollabEvent {
                version: Some(3),
                client_id: Some("other".into()),
                body: EventBody::Sort {
                    path: path("items"),
                    sort: vec![SortEntry { id: "a".into(), order: 1 }, SortEntry { id: "b".into(), order: 2 }],
                },
            })
            .unwrap();
        assert_eq!(store.data()["items"], json!([{"id": "b", "order": 2}, {"id": "a", "order": 1}]));
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn awareness_from_unknown_client_is_ignored() {
        let mut store = ready(json!({"t": "abc"}));
        store
            .receive(CollabEvent {
                version: None,
                client_id: Some("ghost".into()),
                body: EventBody::Awareness { path: Some(path("t")), selection: None },
            })
            .unwrap();
        assert!(!store.awareness().other().contains_key("ghost"));
    }

    #[test]
    fn flush_request_carries_queue_in_order() {
        let mut store = ready(json!({}));
        for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
            store.apply_intent(EditIntent::UpdateKey { path: path(key), value: json!(value) }).unwrap();
        }
        let request = store.take_pending_for_flush().unwrap();
        assert_eq!(request.version, 1);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2].path(), Some(&path("c")));
        assert!(store.take_pending_for_flush().is_none());

        store.reset_for_reconnect();
        assert_eq!(store.version(), 0);
        assert!(!store.is_initialized());
    }
}
