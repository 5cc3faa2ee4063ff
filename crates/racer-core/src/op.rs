//! JSON0 operation descriptors.
//!
//! Every public mutation translates to one of these op shapes before it is
//! forwarded to the [`DocStore`](crate::docstore::DocStore). The wire form
//! is the well-known JSON0 component object `{p, oi, od, li, ld, na, lm}`,
//! so any conformant backend can process submitted ops.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ModelError;
use crate::path::{path_to_string, segments_from_value, segments_to_value, Segment};
use crate::tree::number_from_f64;

/// A single JSON0 op component. Paths are within-document (they do not
/// include the collection or document id).
#[derive(Debug, Clone, PartialEq)]
pub enum DocOp {
    /// `{p, oi}` — set a key that had no previous value.
    ObjectInsert { path: Vec<Segment>, value: Value },
    /// `{p, od}` — delete a key, carrying the removed value.
    ObjectDelete { path: Vec<Segment>, previous: Value },
    /// `{p, od, oi}` — replace a key's value.
    ObjectReplace {
        path: Vec<Segment>,
        previous: Value,
        value: Value,
    },
    /// `{p, li}` — insert one element at the list index ending `p`.
    ListInsert { path: Vec<Segment>, value: Value },
    /// `{p, ld}` — remove the element at the list index ending `p`.
    ListDelete { path: Vec<Segment>, previous: Value },
    /// `{p, ld, li}` — replace the element at the list index ending `p`.
    ListReplace {
        path: Vec<Segment>,
        previous: Value,
        value: Value,
    },
    /// `{p, na}` — add to the number at `p`.
    NumberAdd { path: Vec<Segment>, delta: f64 },
    /// `{p, lm}` — move the element at the list index ending `p` to index `to`.
    ListMove { path: Vec<Segment>, to: usize },
}

/// A submitted op tagged with the emitting model's session id, so
/// subscribers can skip their own ops, plus the compose-suppression flag.
#[derive(Debug, Clone, PartialEq)]
pub struct OpEnvelope {
    pub sid: u64,
    pub op: DocOp,
    pub prevent_compose: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpDecodeError {
    #[error("op is not an object")]
    NotAnObject,
    #[error("op missing path")]
    MissingPath,
    #[error("invalid op path: {0}")]
    InvalidPath(String),
    #[error("unrecognized op component combination")]
    UnknownShape,
    #[error("invalid component payload: {0}")]
    InvalidComponent(String),
}

impl DocOp {
    pub fn path(&self) -> &[Segment] {
        match self {
            DocOp::ObjectInsert { path, .. }
            | DocOp::ObjectDelete { path, .. }
            | DocOp::ObjectReplace { path, .. }
            | DocOp::ListInsert { path, .. }
            | DocOp::ListDelete { path, .. }
            | DocOp::ListReplace { path, .. }
            | DocOp::NumberAdd { path, .. }
            | DocOp::ListMove { path, .. } => path,
        }
    }

    /// Encode as the canonical JSON0 component object.
    pub fn to_wire(&self) -> Value {
        let mut out = Map::new();
        out.insert("p".into(), segments_to_value(self.path()));
        match self {
            DocOp::ObjectInsert { value, .. } => {
                out.insert("oi".into(), value.clone());
            }
            DocOp::ObjectDelete { previous, .. } => {
                out.insert("od".into(), previous.clone());
            }
            DocOp::ObjectReplace { previous, value, .. } => {
                out.insert("od".into(), previous.clone());
                out.insert("oi".into(), value.clone());
            }
            DocOp::ListInsert { value, .. } => {
                out.insert("li".into(), value.clone());
            }
            DocOp::ListDelete { previous, .. } => {
                out.insert("ld".into(), previous.clone());
            }
            DocOp::ListReplace { previous, value, .. } => {
                out.insert("ld".into(), previous.clone());
                out.insert("li".into(), value.clone());
            }
            DocOp::NumberAdd { delta, .. } => {
                let n = number_from_f64(*delta)
                    .unwrap_or_else(|| serde_json::Number::from(0));
                out.insert("na".into(), Value::Number(n));
            }
            DocOp::ListMove { to, .. } => {
                out.insert("lm".into(), Value::from(*to));
            }
        }
        Value::Object(out)
    }

    /// Decode a JSON0 component object back into a [`DocOp`].
    pub fn from_wire(value: &Value) -> Result<DocOp, OpDecodeError> {
        let obj = value.as_object().ok_or(OpDecodeError::NotAnObject)?;
        let p = obj.get("p").ok_or(OpDecodeError::MissingPath)?;
        let path =
            segments_from_value(p).map_err(|e| OpDecodeError::InvalidPath(e.to_string()))?;

        let oi = obj.get("oi").cloned();
        let od = obj.get("od").cloned();
        let li = obj.get("li").cloned();
        let ld = obj.get("ld").cloned();
        let na = obj.get("na");
        let lm = obj.get("lm");

        if let Some(na) = na {
            let delta = na
                .as_f64()
                .ok_or_else(|| OpDecodeError::InvalidComponent("na must be a number".into()))?;
            return Ok(DocOp::NumberAdd { path, delta });
        }
        if let Some(lm) = lm {
            let to = lm
                .as_u64()
                .ok_or_else(|| OpDecodeError::InvalidComponent("lm must be an index".into()))?;
            return Ok(DocOp::ListMove {
                path,
                to: to as usize,
            });
        }
        match (oi, od, li, ld) {
            (Some(value), Some(previous), None, None) => Ok(DocOp::ObjectReplace {
                path,
                previous,
                value,
            }),
            (Some(value), None, None, None) => Ok(DocOp::ObjectInsert { path, value }),
            (None, Some(previous), None, None) => Ok(DocOp::ObjectDelete { path, previous }),
            (None, None, Some(value), Some(previous)) => Ok(DocOp::ListReplace {
                path,
                previous,
                value,
            }),
            (None, None, Some(value), None) => Ok(DocOp::ListInsert { path, value }),
            (None, None, None, Some(previous)) => Ok(DocOp::ListDelete { path, previous }),
            _ => Err(OpDecodeError::UnknownShape),
        }
    }
}

/// Apply an op to a bare document value, the way a backend would.
///
/// The in-memory store uses this to keep its server-side copies in step
/// with submitted ops. Application is lenient the way JSON0 servers are in
/// practice: a delete of an already-missing key is a no-op, and `na` on a
/// missing position treats it as 0.
pub fn apply(doc: &mut Value, op: &DocOp) -> Result<(), ModelError> {
    match op {
        DocOp::ObjectInsert { path, value } | DocOp::ObjectReplace { path, value, .. } => {
            if path.is_empty() {
                *doc = value.clone();
                return Ok(());
            }
            let (parent, last) = split_parent(path)?;
            let target = navigate_mut_creating(doc, parent)
                .ok_or_else(|| ModelError::PathTypeMismatch(path_to_string(path)))?;
            match (target, last) {
                (Value::Object(map), Segment::Key(k)) => {
                    map.insert(k.clone(), value.clone());
                }
                (Value::Object(map), Segment::Index(i)) => {
                    map.insert(i.to_string(), value.clone());
                }
                _ => return Err(ModelError::PathTypeMismatch(path_to_string(path))),
            }
            Ok(())
        }
        DocOp::ObjectDelete { path, .. } => {
            if path.is_empty() {
                *doc = Value::Null;
                return Ok(());
            }
            let (parent, last) = split_parent(path)?;
            if let Some(Value::Object(map)) = navigate_mut(doc, parent) {
                match last {
                    Segment::Key(k) => map.remove(k),
                    Segment::Index(i) => map.remove(&i.to_string()),
                };
            }
            Ok(())
        }
        DocOp::ListInsert { path, value } => {
            let (parent, last) = split_parent(path)?;
            let index = index_segment(last, path)?;
            let target = navigate_mut(doc, parent)
                .ok_or_else(|| ModelError::NotAnArray(path_to_string(path)))?;
            match target {
                Value::Array(arr) => {
                    let i = index.min(arr.len());
                    arr.insert(i, value.clone());
                    Ok(())
                }
                _ => Err(ModelError::NotAnArray(path_to_string(path))),
            }
        }
        DocOp::ListDelete { path, .. } => {
            let (parent, last) = split_parent(path)?;
            let index = index_segment(last, path)?;
            if let Some(Value::Array(arr)) = navigate_mut(doc, parent) {
                if index < arr.len() {
                    arr.remove(index);
                }
            }
            Ok(())
        }
        DocOp::ListReplace { path, value, .. } => {
            let (parent, last) = split_parent(path)?;
            let index = index_segment(last, path)?;
            let target = navigate_mut(doc, parent)
                .ok_or_else(|| ModelError::NotAnArray(path_to_string(path)))?;
            match target {
                Value::Array(arr) if index < arr.len() => {
                    arr[index] = value.clone();
                    Ok(())
                }
                Value::Array(arr) => Err(ModelError::IndexOutOfRange {
                    path: path_to_string(path),
                    index,
                    len: arr.len(),
                }),
                _ => Err(ModelError::NotAnArray(path_to_string(path))),
            }
        }
        DocOp::NumberAdd { path, delta } => {
            let old = match navigate_mut(doc, path) {
                Some(Value::Number(n)) => n
                    .as_f64()
                    .ok_or_else(|| ModelError::NotANumber(path_to_string(path)))?,
                Some(_) => return Err(ModelError::NotANumber(path_to_string(path))),
                None => 0.0,
            };
            let number = number_from_f64(old + delta)
                .ok_or_else(|| ModelError::NotANumber(path_to_string(path)))?;
            set_leaf(doc, path, Value::Number(number))
        }
        DocOp::ListMove { path, to } => {
            let (parent, last) = split_parent(path)?;
            let from = index_segment(last, path)?;
            if let Some(Value::Array(arr)) = navigate_mut(doc, parent) {
                if from < arr.len() {
                    let item = arr.remove(from);
                    let dest = (*to).min(arr.len());
                    arr.insert(dest, item);
                }
            }
            Ok(())
        }
    }
}

fn split_parent(path: &[Segment]) -> Result<(&[Segment], &Segment), ModelError> {
    if path.is_empty() {
        return Err(ModelError::InvalidPath("empty op path".into()));
    }
    let (parent, last) = path.split_at(path.len() - 1);
    Ok((parent, &last[0]))
}

fn index_segment(seg: &Segment, path: &[Segment]) -> Result<usize, ModelError> {
    match seg {
        Segment::Index(i) => Ok(*i),
        Segment::Key(_) => Err(ModelError::NotAnArray(path_to_string(path))),
    }
}

/// Like [`navigate_mut`] but creates missing object intermediates, the way
/// permissive JSON0 servers accept inserts below not-yet-present keys.
fn navigate_mut_creating<'a>(doc: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    let mut cur = doc;
    for seg in path {
        cur = match (cur, seg) {
            (Value::Object(map), Segment::Key(k)) => map
                .entry(k.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            (Value::Object(map), Segment::Index(i)) => map
                .entry(i.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            (Value::Array(arr), Segment::Index(i)) => arr.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn navigate_mut<'a>(doc: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    let mut cur = doc;
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

fn set_leaf(doc: &mut Value, path: &[Segment], value: Value) -> Result<(), ModelError> {
    let (parent, last) = split_parent(path)?;
    let target = navigate_mut(doc, parent)
        .ok_or_else(|| ModelError::PathTypeMismatch(path_to_string(path)))?;
    match (target, last) {
        (Value::Object(map), Segment::Key(k)) => {
            map.insert(k.clone(), value);
            Ok(())
        }
        (Value::Object(map), Segment::Index(i)) => {
            map.insert(i.to_string(), value);
            Ok(())
        }
        (Value::Array(arr), Segment::Index(i)) if *i < arr.len() => {
            arr[*i] = value;
            Ok(())
        }
        _ => Err(ModelError::PathTypeMismatch(path_to_string(path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parse_path;
    use serde_json::json;

    #[test]
    fn wire_round_trip_holds_for_every_shape() {
        let ops = vec![
            DocOp::ObjectInsert {
                path: parse_path("a.b"),
                value: json!({"x": 1}),
            },
            DocOp::ObjectDelete {
                path: parse_path("a.b"),
                previous: json!(2),
            },
            DocOp::ObjectReplace {
                path: parse_path("a"),
                previous: json!(1),
                value: json!(2),
            },
            DocOp::ListInsert {
                path: parse_path("xs.0"),
                value: json!("i"),
            },
            DocOp::ListDelete {
                path: parse_path("xs.1"),
                previous: json!("d"),
            },
            DocOp::ListReplace {
                path: parse_path("xs.2"),
                previous: json!("a"),
                value: json!("b"),
            },
            DocOp::NumberAdd {
                path: parse_path("n"),
                delta: 2.0,
            },
            DocOp::ListMove {
                path: parse_path("xs.0"),
                to: 3,
            },
        ];
        for op in ops {
            let wire = op.to_wire();
            let decoded = DocOp::from_wire(&wire).expect("decode must succeed");
            assert_eq!(decoded, op, "wire form {wire}");
        }
    }

    #[test]
    fn wire_shape_uses_json0_field_names() {
        let op = DocOp::ObjectReplace {
            path: parse_path("title"),
            previous: json!("old"),
            value: json!("new"),
        };
        assert_eq!(
            op.to_wire(),
            json!({"p": ["title"], "od": "old", "oi": "new"})
        );
    }

    #[test]
    fn unknown_component_combinations_are_rejected() {
        assert!(DocOp::from_wire(&json!({"p": ["a"]})).is_err());
        assert!(DocOp::from_wire(&json!({"p": ["a"], "oi": 1, "li": 2})).is_err());
        assert!(DocOp::from_wire(&json!(["p"])).is_err());
    }

    #[test]
    fn apply_mirrors_list_edits() {
        let mut doc = json!({"xs": ["a", "c"]});
        apply(
            &mut doc,
            &DocOp::ListInsert {
                path: parse_path("xs.1"),
                value: json!("b"),
            },
        )
        .expect("apply must succeed");
        assert_eq!(doc, json!({"xs": ["a", "b", "c"]}));

        apply(
            &mut doc,
            &DocOp::ListDelete {
                path: parse_path("xs.0"),
                previous: json!("a"),
            },
        )
        .expect("apply must succeed");
        assert_eq!(doc, json!({"xs": ["b", "c"]}));
    }

    #[test]
    fn apply_number_add_defaults_missing_to_zero() {
        let mut doc = json!({});
        apply(
            &mut doc,
            &DocOp::NumberAdd {
                path: parse_path("n"),
                delta: 5.0,
            },
        )
        .expect("apply must succeed");
        assert_eq!(doc, json!({"n": 5}));
    }
}
