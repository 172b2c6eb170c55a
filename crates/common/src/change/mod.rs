// Change sets: immutable descriptions of a text edit.
//
// A change set covers a whole document. It is a run of sections, each either
// keeping (`Retain`) or replacing a span of the source text. Lengths count
// Unicode scalar values. Change sets compose into one equivalent change,
// map over concurrent changes, and map positions forward through the edit.

mod json;
mod selection;

use std::collections::VecDeque;

use thiserror::Error;

pub use selection::{Assoc, Selection, SelectionRange, TextRange};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChangeError {
    #[error("change covers a document of length {expected}, got length {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("range {from}..{to} is outside a document of length {len}")]
    OutOfRange { from: usize, to: usize, len: usize },

    #[error("malformed change: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Section {
    Retain(usize),
    Replace { delete: usize, insert: String },
}

/// A canonical change set: no empty sections, no two adjacent sections of
/// the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    sections: Vec<Section>,
}

impl ChangeSet {
    /// The identity change over a document of `len` characters.
    pub fn empty(len: usize) -> Self {
        let mut builder = Builder::default();
        builder.retain(len);
        builder.finish()
    }

    pub fn insert(len: usize, at: usize, text: &str) -> Result<Self, ChangeError> {
        Self::replace(len, at, at, text)
    }

    pub fn delete(len: usize, from: usize, to: usize) -> Result<Self, ChangeError> {
        Self::replace(len, from, to, "")
    }

    /// Replace `from..to` of a document of `len` characters with `text`.
    pub fn replace(len: usize, from: usize, to: usize, text: &str) -> Result<Self, ChangeError> {
        if from > to || to > len {
            return Err(ChangeError::OutOfRange { from, to, len });
        }
        let mut builder = Builder::default();
        builder.retain(from);
        builder.delete(to - from);
        builder.insert(text);
        builder.retain(len - to);
        Ok(builder.finish())
    }

    /// A single replacement turning `old` into `new`, found by trimming the
    /// common prefix and suffix.
    pub fn from_diff(old: &str, new: &str) -> Self {
        let old_chars: Vec<char> = old.chars().collect();
        let new_chars: Vec<char> = new.chars().collect();
        let prefix = old_chars.iter().zip(&new_chars).take_while(|(a, b)| a == b).count();
        let max_suffix = old_chars.len().min(new_chars.len()) - prefix;
        let suffix = old_chars
            .iter()
            .rev()
            .zip(new_chars.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        let inserted: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();
        let mut builder = Builder::default();
        builder.retain(prefix);
        builder.delete(old_chars.len() - prefix - suffix);
        builder.insert(&inserted);
        builder.retain(suffix);
        builder.finish()
    }

    /// Length of the document this change applies to.
    pub fn len(&self) -> usize {
        self.sections
            .iter()
            .map(|section| match section {
                Section::Retain(n) => *n,
                Section::Replace { delete, .. } => *delete,
            })
            .sum()
    }

    /// Length of the document this change produces.
    pub fn new_len(&self) -> usize {
        self.sections
            .iter()
            .map(|section| match section {
                Section::Retain(n) => *n,
                Section::Replace { insert, .. } => char_len(insert),
            })
            .sum()
    }

    /// True when the change leaves the document untouched.
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|section| matches!(section, Section::Retain(_)))
    }

    pub fn apply(&self, text: &str) -> Result<String, ChangeError> {
        let actual = char_len(text);
        if actual != self.len() {
            return Err(ChangeError::LengthMismatch { expected: self.len(), actual });
        }
        let mut chars = text.chars();
        let mut out = String::with_capacity(text.len());
        for section in &self.sections {
            match section {
                Section::Retain(n) => out.extend(chars.by_ref().take(*n)),
                Section::Replace { delete, insert } => {
                    chars.by_ref().take(*delete).for_each(drop);
                    out.push_str(insert);
                }
            }
        }
        Ok(out)
    }

    /// One change equivalent to applying `self` and then `other`.
    pub fn compose(&self, other: &ChangeSet) -> Result<ChangeSet, ChangeError> {
        if self.new_len() != other.len() {
            return Err(ChangeError::LengthMismatch {
                expected: self.new_len(),
                actual: other.len(),
            });
        }
        let mut a = self.ops();
        let mut b = other.ops();
        let mut out = Builder::default();
        loop {
            match (a.pop_front(), b.pop_front()) {
                (None, None) => break,
                (Some(Op::Delete(n)), rest_b) => {
                    out.delete(n);
                    push_front(&mut b, rest_b);
                }
                (rest_a, Some(Op::Insert(text))) => {
                    out.insert(&text);
                    push_front(&mut a, rest_a);
                }
                (Some(op_a), Some(op_b)) => {
                    let n = op_a.len().min(op_b.len());
                    let (head_a, rest_a) = op_a.split(n);
                    let (head_b, rest_b) = op_b.split(n);
                    match (head_a, head_b) {
                        (Op::Retain(_), Op::Retain(_)) => out.retain(n),
                        (Op::Retain(_), Op::Delete(_)) => out.delete(n),
                        (Op::Insert(text), Op::Retain(_)) => out.insert(&text),
                        // Inserted by `self`, deleted by `other`.
                        (Op::Insert(_), Op::Delete(_)) => {}
                        _ => return Err(malformed("compose")),
                    }
                    push_front(&mut a, rest_a);
                    push_front(&mut b, rest_b);
                }
                _ => return Err(malformed("compose")),
            }
        }
        Ok(out.finish())
    }

    /// Re-express this change so it applies after `other`, a concurrent
    /// change to the same document.
    ///
    /// With `before = true`, this change's insertions land ahead of
    /// `other`'s insertions at the same position; otherwise after them.
    pub fn map(&self, other: &ChangeSet, before: bool) -> Result<ChangeSet, ChangeError> {
        if self.len() != other.len() {
            return Err(ChangeError::LengthMismatch { expected: self.len(), actual: other.len() });
        }
        let mut a = self.ops();
        let mut b = other.ops();
        let mut out = Builder::default();
        loop {
            match (a.pop_front(), b.pop_front()) {
                (None, None) => break,
                (Some(Op::Insert(text)), rest_b)
                    if before || !matches!(rest_b, Some(Op::Insert(_))) =>
                {
                    out.insert(&text);
                    push_front(&mut b, rest_b);
                }
                (rest_a, Some(Op::Insert(text))) => {
                    out.retain(char_len(&text));
                    push_front(&mut a, rest_a);
                }
                (Some(op_a), Some(op_b)) => {
                    let n = op_a.len().min(op_b.len());
                    let (head_a, rest_a) = op_a.split(n);
                    let (head_b, rest_b) = op_b.split(n);
                    match (head_a, head_b) {
                        (Op::Retain(_), Op::Retain(_)) => out.retain(n),
                        (Op::Delete(_), Op::Retain(_)) => out.delete(n),
                        // Already gone in `other`'s result.
                        (Op::Retain(_) | Op::Delete(_), Op::Delete(_)) => {}
                        _ => return Err(malformed("map")),
                    }
                    push_front(&mut a, rest_a);
                    push_front(&mut b, rest_b);
                }
                _ => return Err(malformed("map")),
            }
        }
        Ok(out.finish())
    }

    /// Map a position in the source document to the changed document.
    /// Returns `None` when `pos` lies past the end of the source.
    pub fn map_pos(&self, pos: usize, assoc: Assoc) -> Option<usize> {
        let mut old = 0;
        let mut new = 0;
        for section in &self.sections {
            match section {
                Section::Retain(n) => {
                    let end = old + n;
                    if end > pos {
                        return Some(new + (pos - old));
                    }
                    new += n;
                    old = end;
                }
                Section::Replace { delete, insert } => {
                    let end = old + delete;
                    let inserted = char_len(insert);
                    if end > pos || (end == pos && *delete == 0 && assoc == Assoc::Before) {
                        return Some(if pos == old || assoc == Assoc::Before {
                            new
                        } else {
                            new + inserted
                        });
                    }
                    new += inserted;
                    old = end;
                }
            }
        }
        (pos <= old).then_some(new)
    }

    /// The replaced spans, as `(from, to, inserted)` in source coordinates.
    pub fn replacements(&self) -> impl Iterator<Item = (usize, usize, &str)> + '_ {
        let mut old = 0;
        self.sections.iter().filter_map(move |section| match section {
            Section::Retain(n) => {
                old += n;
                None
            }
            Section::Replace { delete, insert } => {
                let from = old;
                old += delete;
                Some((from, old, insert.as_str()))
            }
        })
    }

    fn ops(&self) -> VecDeque<Op> {
        let mut ops = VecDeque::with_capacity(self.sections.len() * 2);
        for section in &self.sections {
            match section {
                Section::Retain(n) => ops.push_back(Op::Retain(*n)),
                Section::Replace { delete, insert } => {
                    if !insert.is_empty() {
                        ops.push_back(Op::Insert(insert.clone()));
                    }
                    if *delete > 0 {
                        ops.push_back(Op::Delete(*delete));
                    }
                }
            }
        }
        ops
    }
}

/// Single-kind step used while walking two change sets side by side.
#[derive(Debug)]
enum Op {
    Retain(usize),
    Delete(usize),
    Insert(String),
}

impl Op {
    fn len(&self) -> usize {
        match self {
            Op::Retain(n) | Op::Delete(n) => *n,
            Op::Insert(text) => char_len(text),
        }
    }

    /// Split into the first `n` units and whatever remains.
    fn split(self, n: usize) -> (Op, Option<Op>) {
        let len = self.len();
        if n >= len {
            return (self, None);
        }
        match self {
            Op::Retain(_) => (Op::Retain(n), Some(Op::Retain(len - n))),
            Op::Delete(_) => (Op::Delete(n), Some(Op::Delete(len - n))),
            Op::Insert(text) => {
                let at = text.char_indices().nth(n).map_or(text.len(), |(at, _)| at);
                let (head, tail) = text.split_at(at);
                (Op::Insert(head.to_string()), Some(Op::Insert(tail.to_string())))
            }
        }
    }
}

fn push_front(ops: &mut VecDeque<Op>, op: Option<Op>) {
    if let Some(op) = op {
        ops.push_front(op);
    }
}

fn malformed(operation: &str) -> ChangeError {
    ChangeError::Malformed(format!("{operation} ran past the end of a change"))
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Accumulates sections, merging as it goes so the result is canonical.
#[derive(Default)]
struct Builder {
    sections: Vec<Section>,
    delete: usize,
    insert: String,
}

impl Builder {
    fn retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.flush();
        if let Some(Section::Retain(last)) = self.sections.last_mut() {
            *last += n;
        } else {
            self.sections.push(Section::Retain(n));
        }
    }

    fn delete(&mut self, n: usize) {
        self.delete += n;
    }

    fn insert(&mut self, text: &str) {
        self.insert.push_str(text);
    }

    fn flush(&mut self) {
        if self.delete == 0 && self.insert.is_empty() {
            return;
        }
        self.sections.push(Section::Replace {
            delete: std::mem::take(&mut self.delete),
            insert: std::mem::take(&mut self.insert),
        });
    }

    fn finish(mut self) -> ChangeSet {
        self.flush();
        ChangeSet { sections: self.sections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(len: usize, at: usize, text: &str) -> ChangeSet {
        ChangeSet::insert(len, at, text).unwrap()
    }

    fn del(len: usize, from: usize, to: usize) -> ChangeSet {
        ChangeSet::delete(len, from, to).unwrap()
    }

    // ── Construction ──────────────────────────────────────────────

    #[test]
    fn lengths_of_simple_changes() {
        let change = ChangeSet::replace(10, 2, 5, "xy").unwrap();
        assert_eq!(change.len(), 10);
        assert_eq!(change.new_len(), 9);
        assert!(!change.is_empty());
        assert!(ChangeSet::empty(4).is_empty());
        assert!(ChangeSet::replace(4, 1, 1, "").unwrap().is_empty());
    }

    #[test]
    fn rejects_out_of_range_replacement() {
        assert_eq!(
            ChangeSet::delete(3, 1, 5),
            Err(ChangeError::OutOfRange { from: 1, to: 5, len: 3 })
        );
        assert!(ChangeSet::delete(3, 2, 1).is_err());
    }

    #[test]
    fn from_diff_trims_common_affixes() {
        let change = ChangeSet::from_diff("hello world", "hello brave world");
        assert_eq!(change.replacements().collect::<Vec<_>>(), vec![(6, 6, "brave ")]);
        assert_eq!(change.apply("hello world").unwrap(), "hello brave world");

        let same = ChangeSet::from_diff("aaa", "aaa");
        assert!(same.is_empty());

        let repeated = ChangeSet::from_diff("aa", "aaa");
        assert_eq!(repeated.apply("aa").unwrap(), "aaa");
    }

    // ── Apply ─────────────────────────────────────────────────────

    #[test]
    fn apply_counts_characters_not_bytes() {
        let change = ins(3, 1, "é");
        assert_eq!(change.apply("äöü").unwrap(), "äéöü");
    }

    #[test]
    fn apply_rejects_wrong_length() {
        assert_eq!(
            del(5, 0, 1).apply("abc"),
            Err(ChangeError::LengthMismatch { expected: 5, actual: 3 })
        );
    }

    // ── Compose ───────────────────────────────────────────────────

    #[test]
    fn compose_matches_sequential_apply() {
        let a = ins(5, 2, "XY");
        let b = del(7, 1, 4);
        let composed = a.compose(&b).unwrap();
        let stepwise = b.apply(&a.apply("hello").unwrap()).unwrap();
        assert_eq!(composed.apply("hello").unwrap(), stepwise);
    }

    #[test]
    fn compose_drops_insert_then_delete() {
        let a = ins(3, 1, "zz");
        let b = del(5, 1, 3);
        assert!(a.compose(&b).unwrap().is_empty());
    }

    #[test]
    fn compose_rejects_length_mismatch() {
        assert!(ins(3, 0, "a").compose(&ChangeSet::empty(3)).is_err());
    }

    // ── Map ───────────────────────────────────────────────────────

    #[test]
    fn map_converges_for_concurrent_inserts() {
        let base = "ab";
        let a = ins(2, 1, "X");
        let b = ins(2, 1, "Y");
        let left = a.map(&b, true).unwrap().apply(&b.apply(base).unwrap()).unwrap();
        let right = b.map(&a, false).unwrap().apply(&a.apply(base).unwrap()).unwrap();
        assert_eq!(left, "aXYb");
        assert_eq!(left, right);
    }

    #[test]
    fn map_handles_overlapping_deletes() {
        let base = "abcdef";
        let a = del(6, 1, 4);
        let b = del(6, 2, 5);
        let left = a.map(&b, false).unwrap().apply(&b.apply(base).unwrap()).unwrap();
        let right = b.map(&a, true).unwrap().apply(&a.apply(base).unwrap()).unwrap();
        assert_eq!(left, "af");
        assert_eq!(left, right);
    }

    #[test]
    fn map_keeps_insert_inside_remote_delete() {
        let base = "abcd";
        let local = ins(4, 2, "X");
        let remote = del(4, 1, 3);
        let rebased = local.map(&remote, false).unwrap();
        assert_eq!(rebased.apply(&remote.apply(base).unwrap()).unwrap(), "aXd");
    }

    // ── Position mapping ──────────────────────────────────────────

    #[test]
    fn map_pos_respects_association() {
        let change = ins(4, 2, "XYZ");
        assert_eq!(change.map_pos(1, Assoc::After), Some(1));
        assert_eq!(change.map_pos(2, Assoc::Before), Some(2));
        assert_eq!(change.map_pos(2, Assoc::After), Some(5));
        assert_eq!(change.map_pos(3, Assoc::Before), Some(6));
        assert_eq!(change.map_pos(4, Assoc::Before), Some(7));
        assert_eq!(change.map_pos(5, Assoc::Before), None);
    }

    #[test]
    fn map_pos_collapses_deleted_span() {
        let change = del(10, 2, 6);
        assert_eq!(change.map_pos(4, Assoc::Before), Some(2));
        assert_eq!(change.map_pos(4, Assoc::After), Some(2));
        assert_eq!(change.map_pos(6, Assoc::After), Some(2));
        assert_eq!(change.map_pos(8, Assoc::After), Some(4));
    }
}
