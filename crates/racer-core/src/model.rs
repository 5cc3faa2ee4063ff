//! The model root: shared tree state, the mutation pipeline, and fan-out.
//!
//! A [`Model`] value is a scoped handle; every handle derived from the same
//! root shares one tree, one event bus, and one load coordinator through an
//! `Rc`. The engine is single-threaded and cooperative: all tree and
//! listener work is synchronous, and the only suspension points are the
//! callback-based `DocStore` calls.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::docstore::{DocStore, DoneCallback};
use crate::error::ModelError;
use crate::events::{EventBus, EventKind, MutationEvent};
use crate::load::{ContextCounts, ItemState};
use crate::op::{DocOp, OpEnvelope};
use crate::path::{join, path_to_string, AsSubpath, Segment};
use crate::query::QueryState;
use crate::tree::Tree;
use crate::{generate_id, generate_sid};

pub const DEFAULT_CONTEXT: &str = "root";

/// Engine configuration, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Downgrade every `subscribe` to a `fetch`.
    pub fetch_only: bool,
    /// Number of cooperative ticks an item lingers after its reference
    /// count reaches zero before its data is unloaded. 0 unloads at once.
    pub unload_delay: u32,
}

/// Per-handle emission flags. Derived handles carry independent copies.
#[derive(Debug, Clone, Default)]
pub(crate) struct Flags {
    pub silent: bool,
    pub pass: Option<Value>,
    pub prevent_compose: bool,
    pub event_context: Option<String>,
}

/// Work deferred to a later cooperative tick.
pub(crate) enum Deferred {
    /// `when_nothing_pending` registered while already settled.
    Settled(Box<dyn FnOnce()>),
    /// A debounced unload, keyed so an intervening load cancels it.
    Unload {
        key: String,
        epoch: u64,
        remaining: u32,
    },
}

pub(crate) struct ModelState {
    pub(crate) tree: Tree,
    pub(crate) bus: EventBus,
    pub(crate) contexts: BTreeMap<String, ContextCounts>,
    pub(crate) items: BTreeMap<String, ItemState>,
    pub(crate) queries: BTreeMap<String, QueryState>,
    /// In-flight loads plus unacknowledged op submissions.
    pub(crate) pending: usize,
    pub(crate) settle_cbs: Vec<Box<dyn FnOnce()>>,
    pub(crate) deferred: VecDeque<Deferred>,
    /// Opaque derived-view state carried through snapshots. The core does
    /// not compute these; it only round-trips them.
    pub(crate) refs: Value,
    pub(crate) ref_lists: Value,
    pub(crate) fns: Value,
    pub(crate) filters: Value,
}

impl ModelState {
    fn new() -> Self {
        Self {
            tree: Tree::new(),
            bus: EventBus::new(),
            contexts: BTreeMap::new(),
            items: BTreeMap::new(),
            queries: BTreeMap::new(),
            pending: 0,
            settle_cbs: Vec::new(),
            deferred: VecDeque::new(),
            refs: Value::Object(serde_json::Map::new()),
            ref_lists: Value::Object(serde_json::Map::new()),
            fns: Value::Object(serde_json::Map::new()),
            filters: Value::Object(serde_json::Map::new()),
        }
    }
}

pub(crate) struct Root {
    pub(crate) state: RefCell<ModelState>,
    pub(crate) store: Rc<dyn DocStore>,
    pub(crate) sid: u64,
    pub(crate) options: ModelOptions,
    pub(crate) error_sink: RefCell<Option<Box<dyn FnMut(String)>>>,
}

/// A scoped handle into the shared document tree.
///
/// The root handle has the empty path and the default data-loading context;
/// `at`/`scope`/`context` and the flag builders derive children that share
/// the root's tree and event bus. Two handles with equal absolute path and
/// context are interchangeable for reads and writes.
pub struct Model {
    pub(crate) root: Rc<Root>,
    pub(crate) path: Vec<Segment>,
    pub(crate) context: String,
    pub(crate) flags: Flags,
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Self {
            root: Rc::clone(&self.root),
            path: self.path.clone(),
            context: self.context.clone(),
            flags: self.flags.clone(),
        }
    }
}

impl AsSubpath for Model {
    fn to_segments(&self) -> Vec<Segment> {
        self.path.clone()
    }
}

impl AsSubpath for &Model {
    fn to_segments(&self) -> Vec<Segment> {
        self.path.clone()
    }
}

impl Model {
    pub fn new(store: Rc<dyn DocStore>) -> Model {
        Self::with_options(store, ModelOptions::default())
    }

    pub fn with_options(store: Rc<dyn DocStore>, options: ModelOptions) -> Model {
        Model {
            root: Rc::new(Root {
                state: RefCell::new(ModelState::new()),
                store,
                sid: generate_sid(),
                options,
                error_sink: RefCell::new(None),
            }),
            path: Vec::new(),
            context: DEFAULT_CONTEXT.to_string(),
            flags: Flags::default(),
        }
    }

    /// The session id this model stamps onto submitted ops.
    pub fn sid(&self) -> u64 {
        self.root.sid
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Route asynchronous failures that have no callback (and panics caught
    /// during fan-out) to `sink` instead of escalating fatally.
    pub fn set_error_sink(&self, sink: impl FnMut(String) + 'static) {
        *self.root.error_sink.borrow_mut() = Some(Box::new(sink));
    }

    /// A freshly generated 128-bit v4-style identifier, lowercase hex with
    /// standard hyphenation.
    pub fn id(&self) -> String {
        generate_id()
    }

    /// Invoke `cb` once every load and op submission issued before this
    /// call has settled. Registered while already settled, it still fires
    /// asynchronously, on the next [`step`](Model::step).
    pub fn when_nothing_pending(&self, cb: impl FnOnce() + 'static) {
        let mut st = self.root.state.borrow_mut();
        if st.pending == 0 {
            st.deferred.push_back(Deferred::Settled(Box::new(cb)));
        } else {
            st.settle_cbs.push(Box::new(cb));
        }
    }

    /// Run one cooperative tick of model-local deferred work: settled
    /// `when_nothing_pending` callbacks and due unloads. Returns how many
    /// tasks executed.
    pub fn step(&self) -> usize {
        let mut executed = 0;
        let batch = {
            let mut st = self.root.state.borrow_mut();
            std::mem::take(&mut st.deferred)
        };
        for task in batch {
            match task {
                Deferred::Settled(cb) => {
                    let settled = self.root.state.borrow().pending == 0;
                    if settled {
                        cb();
                        executed += 1;
                    } else {
                        self.root.state.borrow_mut().settle_cbs.push(cb);
                    }
                }
                Deferred::Unload {
                    key,
                    epoch,
                    remaining,
                } => {
                    if remaining > 0 {
                        self.root.state.borrow_mut().deferred.push_back(Deferred::Unload {
                            key,
                            epoch,
                            remaining: remaining - 1,
                        });
                    } else {
                        crate::load::perform_unload(&self.root, &key, epoch);
                        executed += 1;
                    }
                }
            }
        }
        executed
    }

    /// Canonicalize `sub` against this handle's path.
    pub(crate) fn resolve(&self, sub: impl AsSubpath) -> Vec<Segment> {
        join(&self.path, &sub.to_segments())
    }

    pub(crate) fn event(
        &self,
        kind: EventKind,
        path: Vec<Segment>,
        value: Option<Value>,
        previous: Option<Value>,
    ) -> MutationEvent {
        MutationEvent {
            kind,
            path,
            value,
            previous,
            passed: self.flags.pass.clone(),
            silent: self.flags.silent,
            event_context: self.flags.event_context.clone(),
        }
    }
}

/// Split an absolute path into `(collection, id, within-doc rest)` when it
/// addresses inside a remotely synchronized document. Collections whose
/// name starts with `_` or `$` are local-only.
pub(crate) fn doc_address(path: &[Segment]) -> Option<(String, String, Vec<Segment>)> {
    if path.len() < 2 {
        return None;
    }
    let collection = path[0].as_str();
    if collection.starts_with('_') || collection.starts_with('$') {
        return None;
    }
    Some((collection, path[1].as_str(), path[2..].to_vec()))
}

/// Queue a mutation event and deliver it unless a drain is already running
/// (in which case the outer drain picks it up — fan-out never re-enters).
pub(crate) fn enqueue_event(root: &Rc<Root>, event: MutationEvent) {
    let drain_now = {
        let mut st = root.state.borrow_mut();
        st.bus.queue.push_back(event);
        !st.bus.draining
    };
    if drain_now {
        drain_events(root);
    }
}

pub(crate) fn drain_events(root: &Rc<Root>) {
    root.state.borrow_mut().bus.draining = true;
    loop {
        let next = root.state.borrow_mut().bus.queue.pop_front();
        let Some(event) = next else { break };
        let handlers = root.state.borrow().bus.matching(&event);
        tracing::trace!(
            kind = ?event.kind,
            path = %path_to_string(&event.path),
            listeners = handlers.len(),
            "fanout"
        );
        for handler in handlers {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (handler.borrow_mut())(&event);
            }));
            if let Err(payload) = outcome {
                report_error(root, panic_message(payload));
            }
        }
    }
    root.state.borrow_mut().bus.draining = false;
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}

/// Report to the configured error sink; without one, escalate fatally.
pub(crate) fn report_error(root: &Rc<Root>, message: String) {
    let mut sink = root.error_sink.borrow_mut();
    match sink.as_mut() {
        Some(f) => f(message),
        None => {
            drop(sink);
            panic!("unhandled model error: {message}");
        }
    }
}

/// Fire settled callbacks if nothing is pending anymore.
pub(crate) fn check_settled(root: &Rc<Root>) {
    let cbs = {
        let mut st = root.state.borrow_mut();
        if st.pending == 0 && !st.settle_cbs.is_empty() {
            std::mem::take(&mut st.settle_cbs)
        } else {
            Vec::new()
        }
    };
    for cb in cbs {
        cb();
    }
}

/// Submit `ops` for one document. The optional completion callback fires
/// after the last ack, or with the first error; the local tree is never
/// rolled back on backend errors (the backend reconciles via OT).
pub(crate) fn forward_ops(
    root: &Rc<Root>,
    collection: &str,
    id: &str,
    ops: Vec<DocOp>,
    prevent_compose: bool,
    cb: Option<DoneCallback>,
) {
    if ops.is_empty() {
        if let Some(cb) = cb {
            cb(Ok(()));
        }
        return;
    }
    let total = ops.len();
    root.state.borrow_mut().pending += total;
    let joiner: Rc<RefCell<Option<DoneCallback>>> = Rc::new(RefCell::new(cb));
    let remaining = Rc::new(std::cell::Cell::new(total));
    for op in ops {
        tracing::debug!(collection, id, op = %op.to_wire(), "submit op");
        let envelope = OpEnvelope {
            sid: root.sid,
            op,
            prevent_compose,
        };
        let weak = Rc::downgrade(root);
        let joiner = Rc::clone(&joiner);
        let remaining = Rc::clone(&remaining);
        root.store.submit_op(
            collection,
            id,
            envelope,
            Box::new(move |result| {
                let Some(root) = weak.upgrade() else { return };
                root.state.borrow_mut().pending -= 1;
                remaining.set(remaining.get() - 1);
                match result {
                    Err(err) => match joiner.borrow_mut().take() {
                        Some(cb) => cb(Err(err)),
                        None => report_error(&root, format!("op submission failed: {err}")),
                    },
                    Ok(()) => {
                        if remaining.get() == 0 {
                            if let Some(cb) = joiner.borrow_mut().take() {
                                cb(Ok(()));
                            }
                        }
                    }
                }
                check_settled(&root);
            }),
        );
    }
}

/// Apply an op delivered by the DocStore for a subscribed document.
///
/// Ops stamped with this model's own session id are skipped (they were
/// already applied locally at submission time). Application failures go to
/// the error sink; they never unwind into the store.
pub(crate) fn apply_remote_op(root: &Rc<Root>, collection: &str, id: &str, envelope: OpEnvelope) {
    if envelope.sid == root.sid {
        return;
    }
    tracing::debug!(collection, id, op = %envelope.op.to_wire(), "apply remote op");
    let base = vec![Segment::from(collection), Segment::from(id)];
    let op = envelope.op;
    let full = join(&base, op.path());

    let applied = (|| -> Result<Option<MutationEvent>, ModelError> {
        let mut st = root.state.borrow_mut();
        match &op {
            DocOp::ObjectInsert { value, .. }
            | DocOp::ObjectReplace { value, .. }
            | DocOp::ListReplace { value, .. } => st.tree.set_at(&full, value.clone()).map(|previous| {
                Some(remote_event(EventKind::Change, full.clone(), Some(value.clone()), previous))
            }),
            DocOp::ObjectDelete { .. } => {
                let previous = st.tree.del_at(&full);
                Ok(previous.map(|prev| {
                    remote_event(EventKind::Change, full.clone(), None, Some(prev))
                }))
            }
            DocOp::ListInsert { value, .. } => {
                let (parent, index) = split_list_path(&full)?;
                st.tree
                    .splice_at(parent, index, 0, vec![value.clone()])
                    .map(|_| {
                        Some(remote_event(
                            EventKind::Insert,
                            full.clone(),
                            Some(Value::Array(vec![value.clone()])),
                            None,
                        ))
                    })
            }
            DocOp::ListDelete { .. } => {
                let (parent, index) = split_list_path(&full)?;
                st.tree.splice_at(parent, index, 1, Vec::new()).map(|(removed, _)| {
                    if removed.is_empty() {
                        None
                    } else {
                        Some(remote_event(
                            EventKind::Remove,
                            full.clone(),
                            Some(Value::Array(removed)),
                            None,
                        ))
                    }
                })
            }
            DocOp::NumberAdd { delta, .. } => {
                st.tree.increment_at(&full, *delta).map(|(new, previous)| {
                    let value = crate::tree::number_from_f64(new).map(Value::Number);
                    Some(remote_event(EventKind::Change, full.clone(), value, previous))
                })
            }
            DocOp::ListMove { to, .. } => {
                let (parent, from) = split_list_path(&full)?;
                st.tree.move_at(parent, from, *to, 1).map(|_| {
                    Some(remote_event(
                        EventKind::Move,
                        full.clone(),
                        Some(Value::from(*to)),
                        None,
                    ))
                })
            }
        }
    })();

    match applied {
        Ok(Some(event)) => enqueue_event(root, event),
        Ok(None) => {}
        Err(err) => report_error(
            root,
            format!("remote op failed at {}: {err}", path_to_string(&full)),
        ),
    }
}

fn remote_event(
    kind: EventKind,
    path: Vec<Segment>,
    value: Option<Value>,
    previous: Option<Value>,
) -> MutationEvent {
    MutationEvent {
        kind,
        path,
        value,
        previous,
        passed: None,
        silent: false,
        event_context: None,
    }
}

fn split_list_path(full: &[Segment]) -> Result<(&[Segment], usize), ModelError> {
    match full.split_last() {
        Some((Segment::Index(i), parent)) => Ok((parent, *i)),
        _ => Err(ModelError::NotAnArray(path_to_string(full))),
    }
}
