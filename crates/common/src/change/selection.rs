// Selections and text ranges, mapped forward through change sets.

use serde::{Deserialize, Serialize};

use super::ChangeSet;

/// Which side of an insertion at exactly this position a mapped position
/// sticks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Before,
    After,
}

/// One selected span. `anchor` stays put, `head` moves with the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub anchor: usize,
    pub head: usize,
}

impl SelectionRange {
    pub fn cursor(pos: usize) -> Self {
        Self { anchor: pos, head: pos }
    }

    pub fn from(&self) -> usize {
        self.anchor.min(self.head)
    }

    pub fn to(&self) -> usize {
        self.anchor.max(self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }

    /// Map through `changes`. A non-empty range whose whole span is deleted
    /// is invalidated, as is a range that does not fit the changed document.
    pub fn map(&self, changes: &ChangeSet) -> Option<Self> {
        if self.to() > changes.len() {
            return None;
        }
        if self.is_empty() {
            return changes.map_pos(self.head, Assoc::After).map(Self::cursor);
        }
        let from = changes.map_pos(self.from(), Assoc::After)?;
        let to = changes.map_pos(self.to(), Assoc::Before)?;
        if from >= to {
            return None;
        }
        Some(if self.anchor <= self.head {
            Self { anchor: from, head: to }
        } else {
            Self { anchor: to, head: from }
        })
    }
}

/// A multi-range selection with one main range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub ranges: Vec<SelectionRange>,
    #[serde(default)]
    pub main: usize,
}

impl Selection {
    pub fn single(anchor: usize, head: usize) -> Self {
        Self { ranges: vec![SelectionRange { anchor, head }], main: 0 }
    }

    pub fn main_range(&self) -> Option<&SelectionRange> {
        self.ranges.get(self.main)
    }

    /// True when every range lies within a text of `len` characters.
    pub fn fits(&self, len: usize) -> bool {
        self.main_range().is_some() && self.ranges.iter().all(|range| range.to() <= len)
    }

    /// Map every range through `changes`. Secondary ranges that no longer
    /// resolve are dropped; if the main range does not, the whole selection
    /// is invalidated.
    pub fn map(&self, changes: &ChangeSet) -> Option<Self> {
        let mut ranges = Vec::with_capacity(self.ranges.len());
        let mut main = None;
        for (index, range) in self.ranges.iter().enumerate() {
            match range.map(changes) {
                Some(mapped) => {
                    if index == self.main {
                        main = Some(ranges.len());
                    }
                    ranges.push(mapped);
                }
                None if index == self.main => return None,
                None => {}
            }
        }
        Some(Self { ranges, main: main? })
    }
}

/// A half-open character range inside a text field, used to anchor comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub from: usize,
    pub to: usize,
}

impl TextRange {
    /// Map through `changes`; `None` once the range is empty or no longer
    /// fits the document.
    pub fn map(&self, changes: &ChangeSet) -> Option<Self> {
        if self.from >= self.to || self.to > changes.len() {
            return None;
        }
        let from = changes.map_pos(self.from, Assoc::After)?;
        let to = changes.map_pos(self.to, Assoc::Before)?;
        (from < to).then_some(Self { from, to })
    }

    pub fn fits(&self, len: usize) -> bool {
        self.from < self.to && self.to <= len
    }
}
