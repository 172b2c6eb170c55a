// Get / set / unset / insert over a JSON document tree addressed by `FieldPath`.

use serde_json::{Map, Value};

use super::{FieldPath, PathError, PathSegment};

impl FieldPath {
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, step)
    }

    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        self.segments.iter().try_fold(root, step_mut)
    }

    /// The string at this path, if the path resolves to one.
    pub fn get_str<'a>(&self, root: &'a Value) -> Option<&'a str> {
        self.get(root).and_then(Value::as_str)
    }

    /// Write `value` at this path, creating missing intermediate objects
    /// and lists. Returns the previous value, if any.
    ///
    /// A list index must address an existing element or equal the list
    /// length (append).
    pub fn set(&self, root: &mut Value, value: Value) -> Result<Option<Value>, PathError> {
        let mut node = root;
        let last = self.segments.len() - 1;
        for position in 0..last {
            let next_is_index = matches!(self.segments[position + 1], PathSegment::Index(_));
            node = self.descend_or_create(node, &self.segments[position], next_is_index)?;
        }

        let segment = &self.segments[last];
        if node.is_null() {
            *node = empty_container(matches!(segment, PathSegment::Index(_)));
        }
        match node {
            Value::Object(map) => Ok(map.insert(segment.as_key(), value)),
            Value::Array(items) => {
                let index = self.index_of(segment)?;
                match index.cmp(&items.len()) {
                    std::cmp::Ordering::Less => Ok(Some(std::mem::replace(&mut items[index], value))),
                    std::cmp::Ordering::Equal => {
                        items.push(value);
                        Ok(None)
                    }
                    std::cmp::Ordering::Greater => Err(PathError::OutOfBounds {
                        path: self.to_string(),
                        index,
                        len: items.len(),
                    }),
                }
            }
            _ => Err(self.mismatch(segment, "an object or list")),
        }
    }

    /// Remove the value at this path. Returns the removed value.
    pub fn unset(&self, root: &mut Value) -> Option<Value> {
        let parent = match self.parent() {
            Some(parent) => parent.get_mut(root)?,
            None => root,
        };
        let segment = self.last();
        match parent {
            Value::Object(map) => map.remove(&segment.as_key()),
            Value::Array(items) => {
                let index = segment.as_index()?;
                (index < items.len()).then(|| items.remove(index))
            }
            _ => None,
        }
    }

    /// Insert `value` into the list that encloses this path, at the index
    /// named by the last segment (clamped to the list length). Returns the
    /// index the value landed at.
    pub fn insert(&self, root: &mut Value, value: Value) -> Result<usize, PathError> {
        let parent = self.parent().ok_or_else(|| PathError::NotFound(self.to_string()))?;
        let segment = self.last();
        let index = self.index_of(segment)?;
        match parent.get_mut(root) {
            Some(Value::Array(items)) => {
                let index = index.min(items.len());
                items.insert(index, value);
                Ok(index)
            }
            Some(_) => Err(self.mismatch(segment, "a list")),
            None => Err(PathError::NotFound(parent.to_string())),
        }
    }

    fn descend_or_create<'a>(
        &self,
        node: &'a mut Value,
        segment: &PathSegment,
        next_is_index: bool,
    ) -> Result<&'a mut Value, PathError> {
        if node.is_null() {
            *node = empty_container(matches!(segment, PathSegment::Index(_)));
        }
        match node {
            Value::Object(map) => {
                Ok(map.entry(segment.as_key()).or_insert_with(|| empty_container(next_is_index)))
            }
            Value::Array(items) => {
                let index = self.index_of(segment)?;
                let len = items.len();
                items.get_mut(index).ok_or_else(|| PathError::OutOfBounds {
                    path: self.to_string(),
                    index,
                    len,
                })
            }
            _ => Err(self.mismatch(segment, "an object or list")),
        }
    }

    fn index_of(&self, segment: &PathSegment) -> Result<usize, PathError> {
        segment.as_index().ok_or_else(|| self.mismatch(segment, "a list index"))
    }

    fn mismatch(&self, segment: &PathSegment, expected: &'static str) -> PathError {
        PathError::TypeMismatch { path: self.to_string(), segment: segment.to_string(), expected }
    }
}

fn step<'a>(node: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(&segment.as_key()),
        Value::Array(items) => items.get(segment.as_index()?),
        _ => None,
    }
}

fn step_mut<'a>(node: &'a mut Value, segment: &PathSegment) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => map.get_mut(&segment.as_key()),
        Value::Array(items) => items.get_mut(segment.as_index()?),
        _ => None,
    }
}

fn empty_container(list: bool) -> Value {
    if list {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}
