// Rebasing the local text ledger over updates confirmed by the server.
//
// The server orders every change. Updates arriving for a path are either
// echoes of our own oldest sent entries or changes from other clients.
// Echoes are dropped from the ledger; foreign changes are transformed so
// they apply on top of what we still have unconfirmed, and the ledger is
// transformed so it applies on top of them.

use fieldsync_common::change::{ChangeError, ChangeSet};
use fieldsync_common::protocol::TextUpdate;

use super::per_path::UnconfirmedUpdate;

/// Result of a rebase, not yet committed to the store.
#[derive(Debug)]
pub(crate) struct Rebased {
    /// Change turning the current local text into the new local text.
    pub remote: ChangeSet,
    /// The new local text.
    pub text: String,
    /// Remaining unconfirmed entries, now based on the server text.
    pub ledger: Vec<UnconfirmedUpdate>,
}

/// Rebase `ledger` (unconfirmed local changes on top of the last server
/// text) over `updates`. `text` is the current local text. `own` marks
/// updates that originate from this client.
///
/// An own update normally confirms the oldest sent ledger entry. When no
/// sent entry is left, because a local key write to the same path dropped
/// the ledger, the update is skipped rather than composed: the local text
/// already reflects the write that superseded it, and the server's copy of
/// that write follows as its own echo.
///
/// Nothing is modified: on error the caller keeps its old state.
pub(crate) fn rebase(
    text: &str,
    ledger: &[UnconfirmedUpdate],
    updates: &[TextUpdate],
    own: bool,
) -> Result<Rebased, ChangeError> {
    let mut ledger = ledger.to_vec();
    let base_len = match ledger.first() {
        Some(first) => first.changes.len(),
        None => text.chars().count(),
    };

    // `remote` goes from the server text as of the ledger base to the
    // server text after these updates, skipping our own echoed entries.
    let mut remote = ChangeSet::empty(base_len);
    for update in updates {
        if own {
            if ledger.first().is_some_and(|entry| entry.sent) {
                let confirmed = ledger.remove(0);
                remote = remote.map(&confirmed.changes, true)?;
            }
            // Otherwise the entry was already superseded locally.
            continue;
        }
        remote = remote.compose(&update.changes)?;
    }

    // Transform what is left of the ledger over `remote`. Afterwards
    // `remote` goes from the local text to the new local text.
    for entry in ledger.iter_mut() {
        let rebased = entry.changes.map(&remote, false)?;
        remote = remote.map(&entry.changes, true)?;
        entry.selection = entry.selection.as_ref().and_then(|selection| selection.map(&remote));
        entry.changes = rebased;
    }

    let text = remote.apply(text)?;
    Ok(Rebased { remote, text, ledger })
}

/// Composition of every ledger entry: maps server coordinates to local
/// ones. `None` when nothing is unconfirmed.
pub(crate) fn ledger_tail(ledger: &[UnconfirmedUpdate]) -> Result<Option<ChangeSet>, ChangeError> {
    let mut entries = ledger.iter();
    let Some(first) = entries.next() else {
        return Ok(None);
    };
    let mut tail = first.changes.clone();
    for entry in entries {
        tail = tail.compose(&entry.changes)?;
    }
    Ok(Some(tail))
}
