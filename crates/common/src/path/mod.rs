// Field paths: dotted addresses into the document tree, e.g. `findings.[0].title`.
//
// A path is a non-empty list of segments. Field names are plain segments,
// list indices are written as a bracketed segment (`[2]`).

mod tree;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of segments in a path.
const MAX_PATH_SEGMENTS: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path `{0}` contains an empty segment")]
    EmptySegment(String),

    #[error("path exceeds maximum depth of {MAX_PATH_SEGMENTS} segments")]
    TooDeep,

    #[error("invalid list index segment: {0}")]
    InvalidIndex(String),

    #[error("path `{0}` does not resolve to a value")]
    NotFound(String),

    #[error("path `{path}` expects {expected} at segment `{segment}`")]
    TypeMismatch { path: String, segment: String, expected: &'static str },

    #[error("list index {index} out of bounds (len {len}) in `{path}`")]
    OutOfBounds { path: String, index: usize, len: usize },
}

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    /// The list index this segment addresses, if any. Numeric field names
    /// count as indices when resolved against a list.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Key(key) => key.parse().ok(),
        }
    }

    /// The object key this segment addresses.
    pub fn as_key(&self) -> String {
        match self {
            Self::Key(key) => key.clone(),
            Self::Index(index) => index.to_string(),
        }
    }

    fn parse(raw: &str, full: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::EmptySegment(full.to_string()));
        }
        if let Some(inner) = raw.strip_prefix('[') {
            let digits =
                inner.strip_suffix(']').ok_or_else(|| PathError::InvalidIndex(raw.to_string()))?;
            return digits
                .parse::<usize>()
                .map(Self::Index)
                .map_err(|_| PathError::InvalidIndex(raw.to_string()));
        }
        Ok(Self::Key(raw.to_string()))
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// How a list changed, for re-expressing paths that point into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListShift {
    Inserted,
    Removed,
}

/// Result of re-expressing a path after a list mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reindexed {
    Unchanged,
    Moved(FieldPath),
    Removed,
}

/// A validated, non-empty path into the document tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parse a dotted path such as `findings.[0].title`.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        if input.is_empty() {
            return Err(PathError::Empty);
        }
        let segments = input
            .split('.')
            .map(|raw| PathSegment::parse(raw, input))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_segments(segments)
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Result<Self, PathError> {
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        if segments.len() > MAX_PATH_SEGMENTS {
            return Err(PathError::TooDeep);
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn last(&self) -> &PathSegment {
        // Non-empty by construction.
        &self.segments[self.segments.len() - 1]
    }

    /// The enclosing path, or `None` for a top-level field.
    pub fn parent(&self) -> Option<FieldPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self { segments: self.segments[..self.segments.len() - 1].to_vec() })
    }

    pub fn child(&self, segment: PathSegment) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    pub fn key(&self, key: impl Into<String>) -> FieldPath {
        self.child(PathSegment::Key(key.into()))
    }

    pub fn index(&self, index: usize) -> FieldPath {
        self.child(PathSegment::Index(index))
    }

    /// True when `prefix` equals this path or is one of its ancestors.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments.iter().zip(&prefix.segments).all(|(own, other)| same_step(own, other))
    }

    /// Equality that ignores which notation addressed a list index.
    pub fn same_as(&self, other: &FieldPath) -> bool {
        self.segments.len() == other.segments.len() && self.starts_with(other)
    }

    /// Re-express this path after an element was inserted into or removed
    /// from the list at `list` at position `index`.
    pub fn reindex(&self, list: &FieldPath, index: usize, shift: ListShift) -> Reindexed {
        let depth = list.segments.len();
        if self.segments.len() <= depth || !self.starts_with(list) {
            return Reindexed::Unchanged;
        }
        let Some(current) = self.segments[depth].as_index() else {
            return Reindexed::Unchanged;
        };

        let next = match shift {
            ListShift::Inserted if current >= index => current + 1,
            ListShift::Removed if current == index => return Reindexed::Removed,
            ListShift::Removed if current > index => current - 1,
            _ => return Reindexed::Unchanged,
        };

        let mut segments = self.segments.clone();
        segments[depth] = PathSegment::Index(next);
        Reindexed::Moved(Self { segments })
    }
}

/// Segments compare equal when they address the same step, whichever
/// notation was used for a list index.
fn same_step(left: &PathSegment, right: &PathSegment) -> bool {
    match (left, right) {
        (PathSegment::Key(a), PathSegment::Key(b)) => a == b,
        _ => left.as_index().is_some() && left.as_index() == right.as_index(),
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            if position > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}
