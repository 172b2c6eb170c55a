// Per-path bookkeeping: queued outgoing events and the ledger of text
// changes applied locally but not yet confirmed by the server.

use fieldsync_common::change::{ChangeError, ChangeSet, Selection};
use fieldsync_common::path::FieldPath;
use fieldsync_common::protocol::{CollabEvent, EventBody};

/// A local text change the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnconfirmedUpdate {
    pub changes: ChangeSet,
    /// Our selection right after the change, sent along with it.
    pub selection: Option<Selection>,
    pub sent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingKind {
    Event(CollabEvent),
    /// Stands for the unsent entry of the text ledger; the update is built
    /// from it when the queue is drained.
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pending {
    pub seq: u64,
    pub kind: PendingKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerPathState {
    pub(crate) pending: Vec<Pending>,
    pub(crate) unconfirmed: Vec<UnconfirmedUpdate>,
}

impl PerPathState {
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn unconfirmed_len(&self) -> usize {
        self.unconfirmed.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.unconfirmed.is_empty()
    }

    /// One-line summary for diagnostics.
    pub fn describe(&self) -> String {
        let sent = self.unconfirmed.iter().filter(|u| u.sent).count();
        format!(
            "pending={} unconfirmed={} (sent={sent})",
            self.pending.len(),
            self.unconfirmed.len()
        )
    }

    pub(crate) fn push_event(&mut self, seq: u64, event: CollabEvent) {
        self.pending.push(Pending { seq, kind: PendingKind::Event(event) });
    }

    /// Queue a key update, replacing the value of one still waiting.
    pub(crate) fn push_key_update(&mut self, seq: u64, event: CollabEvent) {
        let queued = self.pending.iter_mut().rev().find_map(|pending| match &mut pending.kind {
            PendingKind::Event(CollabEvent { body: EventBody::UpdateKey { .. }, .. }) => {
                Some(&mut pending.kind)
            }
            _ => None,
        });
        match queued {
            Some(kind) => *kind = PendingKind::Event(event),
            None => self.push_event(seq, event),
        }
    }

    pub(crate) fn has_unsent_key_update(&self) -> bool {
        self.pending.iter().any(|pending| {
            matches!(
                pending.kind,
                PendingKind::Event(CollabEvent { body: EventBody::UpdateKey { .. }, .. })
            )
        })
    }

    /// Record a local text change. While the previous change is unsent the
    /// two are composed into one ledger entry.
    pub(crate) fn push_text(
        &mut self,
        seq: u64,
        changes: ChangeSet,
        selection: Option<Selection>,
    ) -> Result<(), ChangeError> {
        if let Some(last) = self.unconfirmed.last_mut().filter(|last| !last.sent) {
            let composed = last.changes.compose(&changes)?;
            let selection =
                selection.or_else(|| last.selection.as_ref().and_then(|s| s.map(&changes)));
            last.changes = composed;
            last.selection = selection;
            return Ok(());
        }
        self.unconfirmed.push(UnconfirmedUpdate { changes, selection, sent: false });
        self.pending.push(Pending { seq, kind: PendingKind::Text });
        Ok(())
    }

    /// Point queued events at `path` after the element they address moved.
    pub(crate) fn retarget(&mut self, path: &FieldPath) {
        for pending in &mut self.pending {
            let PendingKind::Event(event) = &mut pending.kind else {
                continue;
            };
            match &mut event.body {
                EventBody::Create { path: own, .. }
                | EventBody::UpdateKey { path: own, .. }
                | EventBody::UpdateText { path: own, .. }
                | EventBody::Delete { path: own, .. }
                | EventBody::Sort { path: own, .. } => *own = path.clone(),
                _ => {}
            }
        }
    }

    /// Forget the text ledger; its changes were superseded.
    pub(crate) fn drop_text(&mut self) {
        self.unconfirmed.clear();
        self.pending.retain(|pending| !matches!(pending.kind, PendingKind::Text));
    }
}
