//! The public handle surface: navigation, reads, writes, and listeners.
//!
//! Every method canonicalizes its subpath argument against the handle's own
//! path before touching the tree. Writes follow one pipeline: canonicalize,
//! read the old value, apply the predicate, write the tree, emit the impact
//! event, and forward a JSON0 op when the path addresses inside a remotely
//! synchronized document.

use serde_json::Value;

use crate::error::ModelError;
use crate::events::{EventKind, ListenerId, MutationEvent};
use crate::model::{doc_address, enqueue_event, forward_ops, Model};
use crate::op::DocOp;
use crate::path::{join, path_to_string, AsSubpath, Segment};
use crate::tree::number_from_f64;

/// Completion callback for write acknowledgement.
pub type AckCallback = Box<dyn FnOnce(Result<(), ModelError>)>;

impl Model {
    // ── Navigation ────────────────────────────────────────────────────────

    /// A child handle at `sub` below this handle's path.
    pub fn at(&self, sub: impl AsSubpath) -> Model {
        let mut child = self.clone();
        child.path = self.resolve(sub);
        child
    }

    /// A sibling handle at an absolute path, ignoring this handle's path.
    pub fn scope(&self, absolute: impl AsSubpath) -> Model {
        let mut child = self.clone();
        child.path = absolute.to_segments();
        child
    }

    pub fn parent(&self) -> Model {
        self.parent_levels(1)
    }

    /// A handle `levels` steps up; stops at the root.
    pub fn parent_levels(&self, levels: usize) -> Model {
        let keep = self.path.len().saturating_sub(levels);
        let mut child = self.clone();
        child.path = self.path[..keep].to_vec();
        child
    }

    /// The final path segment, rendered as a string. Empty for the root.
    pub fn leaf(&self) -> String {
        self.path.last().map(Segment::as_str).unwrap_or_default()
    }

    /// The absolute dotted path of `sub` resolved against this handle.
    pub fn path(&self, sub: impl AsSubpath) -> String {
        path_to_string(&self.resolve(sub))
    }

    /// The absolute canonical segments of `sub` resolved against this handle.
    pub fn segments(&self, sub: impl AsSubpath) -> Vec<Segment> {
        self.resolve(sub)
    }

    // ── Flag builders ─────────────────────────────────────────────────────

    /// A handle whose writes emit no events, except to listeners registered
    /// under the same event context.
    pub fn silent(&self) -> Model {
        let mut child = self.clone();
        child.flags.silent = true;
        child
    }

    /// A handle whose emitted events carry `payload` as `passed`.
    pub fn pass(&self, payload: Value) -> Model {
        let mut child = self.clone();
        child.flags.pass = Some(payload);
        child
    }

    /// A handle whose submitted ops opt out of downstream op composition.
    pub fn prevent_compose(&self) -> Model {
        let mut child = self.clone();
        child.flags.prevent_compose = true;
        child
    }

    /// A handle labeling its emissions (and listener registrations) with
    /// the named event context.
    pub fn event_context(&self, id: &str) -> Model {
        let mut child = self.clone();
        child.flags.event_context = Some(id.to_string());
        child
    }

    /// A sibling handle bound to the named data-loading context.
    pub fn context(&self, id: &str) -> Model {
        let mut child = self.clone();
        child.context = id.to_string();
        child
    }

    /// The data-loading context this handle charges loads to.
    pub fn context_id(&self) -> &str {
        &self.context
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    /// The value at `sub`, deep-copied out of the tree.
    pub fn get(&self, sub: impl AsSubpath) -> Option<Value> {
        let path = self.resolve(sub);
        self.root.state.borrow().tree.get_deep_copy(&path)
    }

    /// Run `f` over the live value at `sub` without copying.
    ///
    /// The reference is an alias into the tree; `f` must not mutate through
    /// other handles while holding it.
    pub fn with_value<R>(&self, sub: impl AsSubpath, f: impl FnOnce(Option<&Value>) -> R) -> R {
        let path = self.resolve(sub);
        let st = self.root.state.borrow();
        f(st.tree.lookup(&path))
    }

    /// Shallow copy of the value at `sub`: a fresh container with its
    /// immediate children.
    pub fn get_copy(&self, sub: impl AsSubpath) -> Option<Value> {
        let path = self.resolve(sub);
        self.root.state.borrow().tree.get_copy(&path)
    }

    /// Full recursive copy of the value at `sub`.
    pub fn get_deep_copy(&self, sub: impl AsSubpath) -> Option<Value> {
        let path = self.resolve(sub);
        self.root.state.borrow().tree.get_deep_copy(&path)
    }

    /// Collection names currently in the tree. Root handles only.
    pub fn collections(&self) -> Option<Vec<String>> {
        if !self.is_root() {
            return None;
        }
        let st = self.root.state.borrow();
        st.tree
            .root()
            .as_object()
            .map(|map| map.keys().cloned().collect())
    }

    /// The whole tree as one JSON value. Root handles only.
    pub fn data(&self) -> Option<Value> {
        if !self.is_root() {
            return None;
        }
        Some(self.root.state.borrow().tree.root().clone())
    }

    // ── Listeners ─────────────────────────────────────────────────────────

    /// Register `handler` for `kind` events at or around `sub` (prefix
    /// impact in both directions). The handle's event context is attached
    /// to the registration.
    pub fn on(
        &self,
        kind: EventKind,
        sub: impl AsSubpath,
        handler: impl FnMut(&MutationEvent) + 'static,
    ) -> ListenerId {
        let path = self.resolve(sub);
        let boxed: crate::events::Handler = std::rc::Rc::new(std::cell::RefCell::new(handler));
        self.root.state.borrow_mut().bus.add_listener(
            kind,
            path,
            self.flags.event_context.clone(),
            boxed,
        )
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.root.state.borrow_mut().bus.remove_listener(id)
    }

    pub fn remove_all_listeners(&self) {
        self.root.state.borrow_mut().bus.clear();
    }

    // ── Writes ────────────────────────────────────────────────────────────

    /// Write `value` at `sub`, returning the previous value.
    pub fn set(&self, sub: impl AsSubpath, value: Value) -> Result<Option<Value>, ModelError> {
        self.write_set(self.resolve(sub), value, None)
    }

    /// [`set`](Model::set) with a completion callback invoked after the
    /// backend acknowledges (immediately for local-only paths).
    pub fn set_cb(
        &self,
        sub: impl AsSubpath,
        value: Value,
        cb: impl FnOnce(Result<(), ModelError>) + 'static,
    ) -> Result<Option<Value>, ModelError> {
        self.write_set(self.resolve(sub), value, Some(Box::new(cb)))
    }

    /// Write only if the new value is strictly unequal to the current one.
    /// Returns the (unchanged or replaced) previous value.
    pub fn set_diff(&self, sub: impl AsSubpath, value: Value) -> Result<Option<Value>, ModelError> {
        let path = self.resolve(sub);
        {
            let st = self.root.state.borrow();
            if let Some(current) = st.tree.lookup(&path) {
                if crate::equality::strict_equal(current, &value) {
                    return Ok(Some(current.clone()));
                }
            }
        }
        self.write_set(path, value, None)
    }

    /// Write only if the new value is deeply unequal to the current one.
    pub fn set_diff_deep(
        &self,
        sub: impl AsSubpath,
        value: Value,
    ) -> Result<Option<Value>, ModelError> {
        let path = self.resolve(sub);
        {
            let st = self.root.state.borrow();
            if let Some(current) = st.tree.lookup(&path) {
                if crate::equality::deep_equal(current, &value) {
                    return Ok(Some(current.clone()));
                }
            }
        }
        self.write_set(path, value, None)
    }

    /// Write only if the current value is `null` or missing. Returns the
    /// existing value otherwise.
    pub fn set_null(&self, sub: impl AsSubpath, value: Value) -> Result<Option<Value>, ModelError> {
        let path = self.resolve(sub);
        {
            let st = self.root.state.borrow();
            if let Some(current) = st.tree.lookup(&path) {
                if !current.is_null() {
                    return Ok(Some(current.clone()));
                }
            }
        }
        self.write_set(path, value, None)
    }

    /// Delete the value at `sub`, returning it. No-op when absent.
    pub fn del(&self, sub: impl AsSubpath) -> Result<Option<Value>, ModelError> {
        self.write_del(self.resolve(sub), None)
    }

    pub fn del_cb(
        &self,
        sub: impl AsSubpath,
        cb: impl FnOnce(Result<(), ModelError>) + 'static,
    ) -> Result<Option<Value>, ModelError> {
        self.write_del(self.resolve(sub), Some(Box::new(cb)))
    }

    /// Insert `doc` into the collection at `sub`, assigning a generated id
    /// when `doc["id"]` is absent. Returns the document id.
    pub fn add(&self, sub: impl AsSubpath, doc: Value) -> Result<String, ModelError> {
        self.add_inner(sub, doc, None)
    }

    pub fn add_cb(
        &self,
        sub: impl AsSubpath,
        doc: Value,
        cb: impl FnOnce(Result<(), ModelError>) + 'static,
    ) -> Result<String, ModelError> {
        self.add_inner(sub, doc, Some(Box::new(cb)))
    }

    /// Add 1 to the number at `sub` (0 when missing). Returns the new value.
    pub fn increment(&self, sub: impl AsSubpath) -> Result<f64, ModelError> {
        self.increment_by(sub, 1.0)
    }

    /// Add `delta` to the number at `sub`. Returns the new value.
    pub fn increment_by(&self, sub: impl AsSubpath, delta: f64) -> Result<f64, ModelError> {
        let path = self.resolve(sub);
        if path.is_empty() {
            return Err(ModelError::InvalidPath("cannot increment the root".into()));
        }
        let (new, previous) = {
            let mut st = self.root.state.borrow_mut();
            st.tree.increment_at(&path, delta)?
        };
        let value = number_from_f64(new).map(Value::Number);
        let event = self.event(EventKind::Change, path.clone(), value, previous);
        enqueue_event(&self.root, event);
        if let Some((collection, id, rest)) = doc_address(&path) {
            let op = DocOp::NumberAdd { path: rest, delta };
            forward_ops(
                &self.root,
                &collection,
                &id,
                vec![op],
                self.flags.prevent_compose,
                None,
            );
        }
        Ok(new)
    }

    /// Append `value` to the array at `sub`, creating the array (and any
    /// missing ancestors) when absent. Returns the new length.
    pub fn push(&self, sub: impl AsSubpath, value: Value) -> Result<usize, ModelError> {
        self.push_inner(self.resolve(sub), value, None)
    }

    pub fn push_cb(
        &self,
        sub: impl AsSubpath,
        value: Value,
        cb: impl FnOnce(Result<(), ModelError>) + 'static,
    ) -> Result<usize, ModelError> {
        self.push_inner(self.resolve(sub), value, Some(Box::new(cb)))
    }

    /// Insert `values` at `index` in the array at `sub` (created when
    /// absent). Returns the new length.
    pub fn insert(
        &self,
        sub: impl AsSubpath,
        index: usize,
        values: Vec<Value>,
    ) -> Result<usize, ModelError> {
        let path = self.resolve(sub);
        if values.is_empty() {
            let st = self.root.state.borrow();
            return match st.tree.lookup(&path) {
                Some(Value::Array(arr)) => Ok(arr.len()),
                Some(_) => Err(ModelError::NotAnArray(path_to_string(&path))),
                None => Ok(0),
            };
        }
        let (created, old_len) = self.array_shape(&path)?;
        let start = index.min(old_len);
        let new_len = {
            let mut st = self.root.state.borrow_mut();
            let (_, new_len) = st.tree.splice_at(&path, start, 0, values.clone())?;
            new_len
        };
        let event_path = join(&path, &[Segment::Index(start)]);
        let event = self.event(
            EventKind::Insert,
            event_path,
            Some(Value::Array(values.clone())),
            None,
        );
        enqueue_event(&self.root, event);
        if let Some((collection, id, rest)) = doc_address(&path) {
            let ops = if created {
                vec![DocOp::ObjectInsert {
                    path: rest,
                    value: Value::Array(values),
                }]
            } else {
                values
                    .into_iter()
                    .enumerate()
                    .map(|(offset, value)| DocOp::ListInsert {
                        path: join(&rest, &[Segment::Index(start + offset)]),
                        value,
                    })
                    .collect()
            };
            forward_ops(
                &self.root,
                &collection,
                &id,
                ops,
                self.flags.prevent_compose,
                None,
            );
        }
        Ok(new_len)
    }

    /// Remove `how_many` items starting at `index` from the array at `sub`.
    /// Returns the removed items. No-op (empty result) when the array or
    /// the range is absent.
    pub fn remove(
        &self,
        sub: impl AsSubpath,
        index: usize,
        how_many: usize,
    ) -> Result<Vec<Value>, ModelError> {
        let path = self.resolve(sub);
        let old_len = {
            let st = self.root.state.borrow();
            match st.tree.lookup(&path) {
                None => return Ok(Vec::new()),
                Some(Value::Array(arr)) => arr.len(),
                Some(_) => return Err(ModelError::NotAnArray(path_to_string(&path))),
            }
        };
        let start = index.min(old_len);
        let removed = {
            let mut st = self.root.state.borrow_mut();
            let (removed, _) = st.tree.splice_at(&path, start, how_many, Vec::new())?;
            removed
        };
        if removed.is_empty() {
            return Ok(removed);
        }
        let event_path = join(&path, &[Segment::Index(start)]);
        let event = self.event(
            EventKind::Remove,
            event_path,
            Some(Value::Array(removed.clone())),
            None,
        );
        enqueue_event(&self.root, event);
        if let Some((collection, id, rest)) = doc_address(&path) {
            let op_path = join(&rest, &[Segment::Index(start)]);
            let ops = removed
                .iter()
                .map(|item| DocOp::ListDelete {
                    path: op_path.clone(),
                    previous: item.clone(),
                })
                .collect();
            forward_ops(
                &self.root,
                &collection,
                &id,
                ops,
                self.flags.prevent_compose,
                None,
            );
        }
        Ok(removed)
    }

    /// Move the element at `from` to `to` within the array at `sub`.
    /// Returns the moved element (empty when `from` is out of range).
    pub fn move_item(
        &self,
        sub: impl AsSubpath,
        from: usize,
        to: usize,
    ) -> Result<Vec<Value>, ModelError> {
        let path = self.resolve(sub);
        let moved = {
            let mut st = self.root.state.borrow_mut();
            st.tree.move_at(&path, from, to, 1)?
        };
        if moved.is_empty() {
            return Ok(moved);
        }
        let event_path = join(&path, &[Segment::Index(from)]);
        let event = self.event(EventKind::Move, event_path, Some(Value::from(to)), None);
        enqueue_event(&self.root, event);
        if let Some((collection, id, rest)) = doc_address(&path) {
            let op = DocOp::ListMove {
                path: join(&rest, &[Segment::Index(from)]),
                to,
            };
            forward_ops(
                &self.root,
                &collection,
                &id,
                vec![op],
                self.flags.prevent_compose,
                None,
            );
        }
        Ok(moved)
    }

    // ── Write pipeline internals ──────────────────────────────────────────

    fn write_set(
        &self,
        path: Vec<Segment>,
        value: Value,
        cb: Option<AckCallback>,
    ) -> Result<Option<Value>, ModelError> {
        if path.is_empty() {
            return Err(ModelError::InvalidPath("cannot set the root".into()));
        }
        tracing::debug!(path = %path_to_string(&path), "set");
        let (previous, parent_is_array) = {
            let mut st = self.root.state.borrow_mut();
            let parent_is_array = matches!(
                st.tree.lookup(&path[..path.len() - 1]),
                Some(Value::Array(_))
            );
            let previous = st.tree.set_at(&path, value.clone())?;
            (previous, parent_is_array)
        };
        let event = self.event(
            EventKind::Change,
            path.clone(),
            Some(value.clone()),
            previous.clone(),
        );
        enqueue_event(&self.root, event);
        if let Some((collection, id, rest)) = doc_address(&path) {
            let op = match (parent_is_array, previous.clone()) {
                (true, Some(prev)) => DocOp::ListReplace {
                    path: rest,
                    previous: prev,
                    value,
                },
                (true, None) => DocOp::ListInsert { path: rest, value },
                (false, Some(prev)) => DocOp::ObjectReplace {
                    path: rest,
                    previous: prev,
                    value,
                },
                (false, None) => DocOp::ObjectInsert { path: rest, value },
            };
            forward_ops(
                &self.root,
                &collection,
                &id,
                vec![op],
                self.flags.prevent_compose,
                cb,
            );
        } else if let Some(cb) = cb {
            cb(Ok(()));
        }
        Ok(previous)
    }

    fn write_del(
        &self,
        path: Vec<Segment>,
        cb: Option<AckCallback>,
    ) -> Result<Option<Value>, ModelError> {
        if path.is_empty() {
            return Err(ModelError::InvalidPath("cannot delete the root".into()));
        }
        tracing::debug!(path = %path_to_string(&path), "del");
        let (previous, parent_is_array) = {
            let mut st = self.root.state.borrow_mut();
            let parent_is_array = matches!(
                st.tree.lookup(&path[..path.len() - 1]),
                Some(Value::Array(_))
            );
            (st.tree.del_at(&path), parent_is_array)
        };
        let Some(previous) = previous else {
            if let Some(cb) = cb {
                cb(Ok(()));
            }
            return Ok(None);
        };
        let event = self.event(EventKind::Change, path.clone(), None, Some(previous.clone()));
        enqueue_event(&self.root, event);
        if let Some((collection, id, rest)) = doc_address(&path) {
            let op = if parent_is_array {
                DocOp::ListDelete {
                    path: rest,
                    previous: previous.clone(),
                }
            } else {
                DocOp::ObjectDelete {
                    path: rest,
                    previous: previous.clone(),
                }
            };
            forward_ops(
                &self.root,
                &collection,
                &id,
                vec![op],
                self.flags.prevent_compose,
                cb,
            );
        } else if let Some(cb) = cb {
            cb(Ok(()));
        }
        Ok(Some(previous))
    }

    fn add_inner(
        &self,
        sub: impl AsSubpath,
        mut doc: Value,
        cb: Option<AckCallback>,
    ) -> Result<String, ModelError> {
        let col_path = self.resolve(sub);
        if col_path.len() != 1 {
            return Err(ModelError::MissingDoc(path_to_string(&col_path)));
        }
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| ModelError::NotAnObject(path_to_string(&col_path)))?;
        let id = match obj.get("id") {
            Some(Value::String(existing)) => existing.clone(),
            _ => {
                let generated = self.id();
                obj.insert("id".to_string(), Value::String(generated.clone()));
                generated
            }
        };
        let doc_path = join(&col_path, &[Segment::from(id.as_str())]);
        self.write_set(doc_path, doc, cb)?;
        Ok(id)
    }

    /// Whether the array at `path` needs creating, and its current length.
    fn array_shape(&self, path: &[Segment]) -> Result<(bool, usize), ModelError> {
        let st = self.root.state.borrow();
        match st.tree.lookup(path) {
            None => Ok((true, 0)),
            Some(Value::Array(arr)) => Ok((false, arr.len())),
            Some(_) => Err(ModelError::NotAnArray(path_to_string(path))),
        }
    }

    fn push_inner(
        &self,
        path: Vec<Segment>,
        value: Value,
        cb: Option<AckCallback>,
    ) -> Result<usize, ModelError> {
        let (created, old_len) = self.array_shape(&path)?;
        let new_len = {
            let mut st = self.root.state.borrow_mut();
            let (_, new_len) = st.tree.splice_at(&path, old_len, 0, vec![value.clone()])?;
            new_len
        };
        let index = new_len - 1;
        let event_path = join(&path, &[Segment::Index(index)]);
        let event = self.event(
            EventKind::Insert,
            event_path,
            Some(Value::Array(vec![value.clone()])),
            None,
        );
        enqueue_event(&self.root, event);
        if let Some((collection, id, rest)) = doc_address(&path) {
            let op = if created {
                DocOp::ObjectInsert {
                    path: rest,
                    value: Value::Array(vec![value]),
                }
            } else {
                DocOp::ListInsert {
                    path: join(&rest, &[Segment::Index(index)]),
                    value,
                }
            };
            forward_ops(
                &self.root,
                &collection,
                &id,
                vec![op],
                self.flags.prevent_compose,
                cb,
            );
        } else if let Some(cb) = cb {
            cb(Ok(()));
        }
        Ok(new_len)
    }
}
