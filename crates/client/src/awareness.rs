// Awareness tracker: which path each client is focused on and its selection.
//
// Selections are kept in local text coordinates. Every change applied to a
// text field locally is also mapped through the selections anchored there;
// a selection that no longer resolves is dropped, never clamped.

use std::collections::BTreeMap;

use fieldsync_common::change::{ChangeSet, Selection};
use fieldsync_common::path::{FieldPath, ListShift, Reindexed};
use fieldsync_common::protocol::ClientInfo;
use serde::Serialize;

/// A client's focus: the field it is looking at and, for text fields, its
/// selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Focus {
    pub path: Option<FieldPath>,
    pub selection: Option<Selection>,
}

impl Focus {
    pub fn new(path: Option<FieldPath>, selection: Option<Selection>) -> Self {
        Self { path, selection }
    }

    fn is_at(&self, path: &FieldPath) -> bool {
        self.path.as_ref().is_some_and(|own| own.same_as(path))
    }

    fn is_under(&self, prefix: &FieldPath) -> bool {
        self.path.as_ref().is_some_and(|own| own.starts_with(prefix))
    }

    fn map(&mut self, path: &FieldPath, changes: &ChangeSet) {
        if self.is_at(path) {
            self.selection = self.selection.as_ref().and_then(|selection| selection.map(changes));
        }
    }

    fn reindex(&mut self, list: &FieldPath, index: usize, shift: ListShift) {
        let Some(path) = &self.path else {
            return;
        };
        match path.reindex(list, index, shift) {
            Reindexed::Unchanged => {}
            Reindexed::Moved(moved) => self.path = Some(moved),
            Reindexed::Removed => *self = Focus::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AwarenessState {
    #[serde(rename = "self")]
    local: Focus,
    other: BTreeMap<String, Focus>,
    clients: Vec<ClientInfo>,
}

impl AwarenessState {
    pub fn local(&self) -> &Focus {
        &self.local
    }

    pub fn other(&self) -> &BTreeMap<String, Focus> {
        &self.other
    }

    pub fn clients(&self) -> &[ClientInfo] {
        &self.clients
    }

    pub fn client(&self, client_id: &str) -> Option<&ClientInfo> {
        self.clients.iter().find(|client| client.client_id == client_id)
    }

    /// Set the local focus. Returns whether anything changed.
    pub fn set_local(&mut self, focus: Focus) -> bool {
        if self.local == focus {
            return false;
        }
        self.local = focus;
        true
    }

    /// Replace the roster, dropping focus entries of clients no longer in it.
    pub fn replace_clients(&mut self, clients: Vec<ClientInfo>) {
        self.clients = clients;
        let clients = &self.clients;
        self.other.retain(|id, _| clients.iter().any(|client| &client.client_id == id));
    }

    pub fn add_client(&mut self, client: ClientInfo) {
        match self.clients.iter_mut().find(|known| known.client_id == client.client_id) {
            Some(known) => *known = client,
            None => self.clients.push(client),
        }
    }

    pub fn remove_client(&mut self, client_id: &str) {
        self.clients.retain(|client| client.client_id != client_id);
        self.other.remove(client_id);
    }

    /// Record a remote client's focus. Clients missing from the roster are
    /// ignored. Returns whether the entry was stored.
    pub fn set_remote(&mut self, client_id: &str, focus: Focus) -> bool {
        if self.client(client_id).is_none() {
            return false;
        }
        self.other.insert(client_id.to_string(), focus);
        true
    }

    pub fn clear_remote(&mut self) {
        self.other.clear();
    }

    /// Map every selection anchored at `path` through `changes`.
    pub fn map_text(&mut self, path: &FieldPath, changes: &ChangeSet) {
        self.local.map(path, changes);
        for focus in self.other.values_mut() {
            focus.map(path, changes);
        }
    }

    /// Drop selections at `path` that do not fit a text of `len` characters.
    pub fn validate_against(&mut self, path: &FieldPath, len: usize) {
        for focus in std::iter::once(&mut self.local).chain(self.other.values_mut()) {
            if focus.is_at(path) && focus.selection.as_ref().is_some_and(|s| !s.fits(len)) {
                focus.selection = None;
            }
        }
    }

    /// Drop selections anywhere under `prefix`, whose content was replaced.
    pub fn invalidate_under(&mut self, prefix: &FieldPath) {
        for focus in std::iter::once(&mut self.local).chain(self.other.values_mut()) {
            if focus.is_under(prefix) {
                focus.selection = None;
            }
        }
    }

    /// Unfocus clients whose field was removed.
    pub fn remove_under(&mut self, prefix: &FieldPath) {
        for focus in std::iter::once(&mut self.local).chain(self.other.values_mut()) {
            if focus.is_under(prefix) {
                *focus = Focus::default();
            }
        }
    }

    /// Re-express focus paths after a list insert or removal.
    pub fn reindex(&mut self, list: &FieldPath, index: usize, shift: ListShift) {
        self.local.reindex(list, index, shift);
        for focus in self.other.values_mut() {
            focus.reindex(list, index, shift);
        }
    }
}
