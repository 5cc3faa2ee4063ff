//! In-memory document store: collection → id → document.
//!
//! All operations take canonical absolute paths. Lookups hand out live
//! references; the copy accessors and every mutation allocate fresh
//! containers so no value is ever aliased across two tree positions.

use serde_json::{Map, Number, Value};

use crate::error::ModelError;
use crate::path::{path_to_string, Segment};

/// The root value store. The root is always a JSON object whose first level
/// is collections and second level is documents.
#[derive(Debug, Clone)]
pub struct Tree {
    root: Value,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Replace the entire tree. Used by snapshot restore.
    pub fn replace_root(&mut self, root: Value) -> Result<(), ModelError> {
        if !root.is_object() {
            return Err(ModelError::CorruptBundle(
                "tree root must be an object".into(),
            ));
        }
        self.root = root;
        Ok(())
    }

    /// Resolve `path` to the live value, if present. No copy is taken.
    pub fn lookup(&self, path: &[Segment]) -> Option<&Value> {
        let mut cur = &self.root;
        for seg in path {
            cur = match (cur, seg) {
                (Value::Object(map), Segment::Key(k)) => map.get(k)?,
                // Objects accept index segments as stringified keys, so a
                // coerced path like `col.5` still addresses doc id "5".
                (Value::Object(map), Segment::Index(i)) => map.get(&i.to_string())?,
                (Value::Array(arr), Segment::Index(i)) => arr.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Shallow copy: a freshly allocated container at `path` with its
    /// immediate children; primitives come back as-is.
    pub fn get_copy(&self, path: &[Segment]) -> Option<Value> {
        let value = self.lookup(path)?;
        Some(match value {
            Value::Array(arr) => Value::Array(arr.to_vec()),
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.clone());
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }

    /// Full recursive structural copy of the value at `path`. `Value`'s
    /// `Clone` already copies containers all the way down, so this differs
    /// from [`get_copy`](Tree::get_copy) only in contract, not in cost.
    pub fn get_deep_copy(&self, path: &[Segment]) -> Option<Value> {
        self.lookup(path).cloned()
    }

    /// Write `value` at `path`, returning the previous value.
    ///
    /// Missing intermediate positions are created: objects for key segments
    /// and arrays for index segments (the new container's shape follows the
    /// segment that will index into it). Writing through a scalar fails with
    /// `PathTypeMismatch`; an index segment past the end of an array fails
    /// with `IndexOutOfRange` (index == len appends).
    pub fn set_at(&mut self, path: &[Segment], value: Value) -> Result<Option<Value>, ModelError> {
        if path.is_empty() {
            if !value.is_object() {
                return Err(ModelError::PathTypeMismatch(String::new()));
            }
            return Ok(Some(std::mem::replace(&mut self.root, value)));
        }
        let (parent_path, last) = path.split_at(path.len() - 1);
        let parent = descend_creating(&mut self.root, parent_path, &last[0])?;
        write_leaf(parent, &last[0], value, path)
    }

    /// Delete the value at `path`, returning it. No-op when absent.
    pub fn del_at(&mut self, path: &[Segment]) -> Option<Value> {
        if path.is_empty() {
            return None;
        }
        let (parent_path, last) = path.split_at(path.len() - 1);
        let parent = lookup_mut(&mut self.root, parent_path)?;
        match (parent, &last[0]) {
            (Value::Object(map), Segment::Key(k)) => map.remove(k),
            (Value::Object(map), Segment::Index(i)) => map.remove(&i.to_string()),
            (Value::Array(arr), Segment::Index(i)) if *i < arr.len() => Some(arr.remove(*i)),
            _ => None,
        }
    }

    /// Splice the array at `path`: remove `how_many` items at `index`, then
    /// insert `items` there. Returns the removed items and the new length.
    ///
    /// A missing target is created as an empty array (with object ancestors
    /// as needed); an existing non-array target is `NotAnArray`. Start and
    /// removal count clamp to the array bounds.
    pub fn splice_at(
        &mut self,
        path: &[Segment],
        index: usize,
        how_many: usize,
        items: Vec<Value>,
    ) -> Result<(Vec<Value>, usize), ModelError> {
        let arr = self.array_at_creating(path)?;
        let start = index.min(arr.len());
        let del_count = how_many.min(arr.len() - start);
        let removed: Vec<Value> = arr.drain(start..start + del_count).collect();
        for (offset, item) in items.into_iter().enumerate() {
            arr.insert(start + offset, item);
        }
        Ok((removed, arr.len()))
    }

    /// Move `how_many` items within the array at `path` from `from` to `to`.
    /// Returns the moved items.
    pub fn move_at(
        &mut self,
        path: &[Segment],
        from: usize,
        to: usize,
        how_many: usize,
    ) -> Result<Vec<Value>, ModelError> {
        let arr = match lookup_mut(&mut self.root, path) {
            Some(Value::Array(arr)) => arr,
            _ => return Err(ModelError::NotAnArray(path_to_string(path))),
        };
        let start = from.min(arr.len());
        let count = how_many.min(arr.len() - start);
        let moved: Vec<Value> = arr.drain(start..start + count).collect();
        let dest = to.min(arr.len());
        for (offset, item) in moved.iter().cloned().enumerate() {
            arr.insert(dest + offset, item);
        }
        Ok(moved)
    }

    /// Add `delta` to the number at `path` (treating a missing value as 0).
    /// Returns the new number and the previous value. A present non-number
    /// is `NotANumber`.
    pub fn increment_at(
        &mut self,
        path: &[Segment],
        delta: f64,
    ) -> Result<(f64, Option<Value>), ModelError> {
        let previous = self.lookup(path).cloned();
        let old = match &previous {
            None => 0.0,
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| ModelError::NotANumber(path_to_string(path)))?,
            Some(_) => return Err(ModelError::NotANumber(path_to_string(path))),
        };
        let new = old + delta;
        let number =
            number_from_f64(new).ok_or_else(|| ModelError::NotANumber(path_to_string(path)))?;
        self.set_at(path, Value::Number(number))?;
        Ok((new, previous))
    }

    fn array_at_creating(&mut self, path: &[Segment]) -> Result<&mut Vec<Value>, ModelError> {
        if path.is_empty() {
            return Err(ModelError::NotAnArray(String::new()));
        }
        let (parent_path, last) = path.split_at(path.len() - 1);
        let parent = descend_creating(&mut self.root, parent_path, &last[0])?;
        let slot = slot_creating(parent, &last[0], Value::Array(Vec::new()), path)?;
        match slot {
            Value::Array(arr) => Ok(arr),
            _ => Err(ModelError::NotAnArray(path_to_string(path))),
        }
    }
}

/// Integer-preserving number construction: whole finite values become JSON
/// integers so `100 + 1` reads back as `101`, not `101.0`.
pub fn number_from_f64(value: f64) -> Option<Number> {
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        Some(Number::from(value as i64))
    } else {
        Number::from_f64(value)
    }
}

fn lookup_mut<'a>(root: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in path {
        cur = match (cur, seg) {
            (Value::Object(map), Segment::Key(k)) => map.get_mut(k)?,
            (Value::Object(map), Segment::Index(i)) => map.get_mut(&i.to_string())?,
            (Value::Array(arr), Segment::Index(i)) => arr.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Container shape for a freshly created intermediate, chosen by the
/// segment that will index into it.
fn container_for(next: &Segment) -> Value {
    match next {
        Segment::Key(_) => Value::Object(Map::new()),
        Segment::Index(_) => Value::Array(Vec::new()),
    }
}

/// Walk `path` from `root`, creating missing intermediates. `last` is the
/// final path segment, used to shape the deepest created container.
fn descend_creating<'a>(
    root: &'a mut Value,
    path: &[Segment],
    last: &Segment,
) -> Result<&'a mut Value, ModelError> {
    let mut cur = root;
    for (i, seg) in path.iter().enumerate() {
        let next = path.get(i + 1).unwrap_or(last);
        let here = || path_to_string(&path[..=i]);
        cur = match (cur, seg) {
            (Value::Object(map), Segment::Key(k)) => map
                .entry(k.clone())
                .or_insert_with(|| container_for(next)),
            (Value::Object(map), Segment::Index(idx)) => map
                .entry(idx.to_string())
                .or_insert_with(|| container_for(next)),
            (Value::Array(arr), Segment::Index(idx)) => {
                let len = arr.len();
                if *idx < len {
                    &mut arr[*idx]
                } else if *idx == len {
                    arr.push(container_for(next));
                    arr.last_mut().expect("just pushed")
                } else {
                    return Err(ModelError::IndexOutOfRange {
                        path: here(),
                        index: *idx,
                        len,
                    });
                }
            }
            _ => return Err(ModelError::PathTypeMismatch(here())),
        };
    }
    Ok(cur)
}

/// Write `value` into `parent` at `seg`, returning the previous value.
fn write_leaf(
    parent: &mut Value,
    seg: &Segment,
    value: Value,
    full_path: &[Segment],
) -> Result<Option<Value>, ModelError> {
    match (parent, seg) {
        (Value::Object(map), Segment::Key(k)) => Ok(map.insert(k.clone(), value)),
        (Value::Object(map), Segment::Index(i)) => Ok(map.insert(i.to_string(), value)),
        (Value::Array(arr), Segment::Index(i)) => {
            let len = arr.len();
            if *i < len {
                Ok(Some(std::mem::replace(&mut arr[*i], value)))
            } else if *i == len {
                arr.push(value);
                Ok(None)
            } else {
                Err(ModelError::IndexOutOfRange {
                    path: path_to_string(full_path),
                    index: *i,
                    len,
                })
            }
        }
        _ => Err(ModelError::PathTypeMismatch(path_to_string(full_path))),
    }
}

/// Resolve or create the slot for `seg` in `parent`, initializing a missing
/// slot with `default`.
fn slot_creating<'a>(
    parent: &'a mut Value,
    seg: &Segment,
    default: Value,
    full_path: &[Segment],
) -> Result<&'a mut Value, ModelError> {
    match (parent, seg) {
        (Value::Object(map), Segment::Key(k)) => Ok(map.entry(k.clone()).or_insert(default)),
        (Value::Object(map), Segment::Index(i)) => {
            Ok(map.entry(i.to_string()).or_insert(default))
        }
        (Value::Array(arr), Segment::Index(i)) => {
            let len = arr.len();
            if *i < len {
                Ok(&mut arr[*i])
            } else if *i == len {
                arr.push(default);
                Ok(arr.last_mut().expect("just pushed"))
            } else {
                Err(ModelError::IndexOutOfRange {
                    path: path_to_string(full_path),
                    index: *i,
                    len,
                })
            }
        }
        _ => Err(ModelError::PathTypeMismatch(path_to_string(full_path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parse_path;
    use serde_json::json;

    #[test]
    fn set_creates_intermediate_objects() {
        let mut tree = Tree::new();
        let prev = tree
            .set_at(&parse_path("col.doc.a.b"), json!(1))
            .expect("set must succeed");
        assert!(prev.is_none());
        assert_eq!(tree.lookup(&parse_path("col.doc.a")), Some(&json!({"b": 1})));
    }

    #[test]
    fn set_through_scalar_is_type_mismatch() {
        let mut tree = Tree::new();
        tree.set_at(&parse_path("col.doc.a"), json!(5))
            .expect("set must succeed");
        let err = tree
            .set_at(&parse_path("col.doc.a.b"), json!(1))
            .expect_err("set through scalar must fail");
        assert!(matches!(err, ModelError::PathTypeMismatch(_)));
    }

    #[test]
    fn set_past_array_end_is_out_of_range() {
        let mut tree = Tree::new();
        tree.set_at(&parse_path("col.doc.xs"), json!([1]))
            .expect("set must succeed");
        let err = tree
            .set_at(&parse_path("col.doc.xs.3"), json!(2))
            .expect_err("sparse write must fail");
        assert!(matches!(err, ModelError::IndexOutOfRange { .. }));
    }

    #[test]
    fn set_at_array_end_appends() {
        let mut tree = Tree::new();
        tree.set_at(&parse_path("col.doc.xs"), json!(["a"]))
            .expect("set must succeed");
        tree.set_at(&parse_path("col.doc.xs.1"), json!("b"))
            .expect("append must succeed");
        assert_eq!(tree.lookup(&parse_path("col.doc.xs")), Some(&json!(["a", "b"])));
    }

    #[test]
    fn del_is_noop_when_absent() {
        let mut tree = Tree::new();
        assert!(tree.del_at(&parse_path("col.doc.gone")).is_none());
    }

    #[test]
    fn splice_creates_missing_arrays() {
        let mut tree = Tree::new();
        let (removed, len) = tree
            .splice_at(&parse_path("col.doc.xs"), 0, 0, vec![json!({"t": 1})])
            .expect("splice must succeed");
        assert!(removed.is_empty());
        assert_eq!(len, 1);
        assert_eq!(tree.lookup(&parse_path("col.doc.xs")), Some(&json!([{"t": 1}])));
    }

    #[test]
    fn splice_clamps_bounds() {
        let mut tree = Tree::new();
        tree.set_at(&parse_path("col.doc.xs"), json!([1, 2, 3]))
            .expect("set must succeed");
        let (removed, len) = tree
            .splice_at(&parse_path("col.doc.xs"), 2, 10, vec![])
            .expect("splice must succeed");
        assert_eq!(removed, vec![json!(3)]);
        assert_eq!(len, 2);
    }

    #[test]
    fn increment_preserves_integers() {
        let mut tree = Tree::new();
        tree.set_at(&parse_path("col.doc.n"), json!(100))
            .expect("set must succeed");
        let (new, prev) = tree
            .increment_at(&parse_path("col.doc.n"), 1.0)
            .expect("increment must succeed");
        assert_eq!(new, 101.0);
        assert_eq!(prev, Some(json!(100)));
        assert_eq!(tree.lookup(&parse_path("col.doc.n")), Some(&json!(101)));
    }

    #[test]
    fn increment_rejects_non_numbers() {
        let mut tree = Tree::new();
        tree.set_at(&parse_path("col.doc.n"), json!("x"))
            .expect("set must succeed");
        let err = tree
            .increment_at(&parse_path("col.doc.n"), 1.0)
            .expect_err("increment of string must fail");
        assert!(matches!(err, ModelError::NotANumber(_)));
    }

    #[test]
    fn move_shifts_items() {
        let mut tree = Tree::new();
        tree.set_at(&parse_path("col.doc.xs"), json!([1, 2, 3, 4]))
            .expect("set must succeed");
        let moved = tree
            .move_at(&parse_path("col.doc.xs"), 0, 2, 1)
            .expect("move must succeed");
        assert_eq!(moved, vec![json!(1)]);
        assert_eq!(tree.lookup(&parse_path("col.doc.xs")), Some(&json!([2, 3, 1, 4])));
    }
}
