//! Reference-counted data loading: fetch/subscribe lifecycle per context.
//!
//! Each named context keeps separate fetch and subscribe counts per item
//! (doc or query). An item's data is resident while the summed count across
//! all contexts is positive; dropping to zero cancels an in-flight load or
//! schedules an unload after the configured delay.

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::docstore::{QueryResults, SubscriptionId};
use crate::error::ModelError;
use crate::events::{EventKind, MutationEvent};
use crate::handle::AckCallback;
use crate::model::{
    apply_remote_op, check_settled, doc_address, enqueue_event, Deferred, Model, Root,
};
use crate::path::{path_to_string, Segment};
use crate::query::{stable_hash, Query, QueryState};

/// An addressable load item: a document reference or a query.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadTarget {
    Doc { collection: String, id: String },
    Query(Query),
}

impl LoadTarget {
    pub fn doc(collection: impl Into<String>, id: impl Into<String>) -> Self {
        LoadTarget::Doc {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// A doc target from a dotted `collection.id` path.
    pub fn path(path: &str) -> Result<Self, ModelError> {
        let segments = crate::path::parse_path(path);
        match doc_address(&segments) {
            Some((collection, id, rest)) if rest.is_empty() => {
                Ok(LoadTarget::Doc { collection, id })
            }
            _ => Err(ModelError::MissingDoc(path.to_string())),
        }
    }
}

impl From<&Query> for LoadTarget {
    fn from(query: &Query) -> Self {
        LoadTarget::Query(query.clone())
    }
}

/// The plain descriptor stored per item (no handles, so it serializes and
/// never cycles back into the root).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ItemKind {
    Doc {
        collection: String,
        id: String,
    },
    Query {
        collection: String,
        expression: Value,
        options: Value,
    },
}

impl ItemKind {
    fn from_target(target: &LoadTarget) -> Self {
        match target {
            LoadTarget::Doc { collection, id } => ItemKind::Doc {
                collection: collection.clone(),
                id: id.clone(),
            },
            LoadTarget::Query(query) => ItemKind::Query {
                collection: query.collection().to_string(),
                expression: query.expression().clone(),
                options: query.options().clone(),
            },
        }
    }

    pub(crate) fn key(&self) -> String {
        match self {
            ItemKind::Doc { collection, id } => format!("doc:{collection}.{id}"),
            ItemKind::Query {
                collection,
                expression,
                options,
            } => format!("query:{collection}:{}", stable_hash(expression, options)),
        }
    }
}

/// Per-context reference counts, keyed by item key.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContextCounts {
    pub(crate) fetched: BTreeMap<String, usize>,
    pub(crate) subscribed: BTreeMap<String, usize>,
}

impl ContextCounts {
    pub(crate) fn is_empty(&self) -> bool {
        self.fetched.is_empty() && self.subscribed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemStatus {
    Loading,
    Resident,
    Unloading,
}

pub(crate) struct ItemState {
    pub(crate) kind: ItemKind,
    pub(crate) status: ItemStatus,
    pub(crate) fetch_total: usize,
    pub(crate) sub_total: usize,
    pub(crate) store_sub: Option<SubscriptionId>,
    pub(crate) cancelled: bool,
    /// Bumped whenever a scheduled unload is invalidated.
    pub(crate) epoch: u64,
    waiters: Vec<AckCallback>,
}

impl ItemState {
    /// Release this item's store subscription, consuming the state. Used
    /// when snapshot restore discards the previous load table.
    pub(crate) fn drop_store_sub(mut self, store: &dyn crate::docstore::DocStore) {
        if let Some(sub) = self.store_sub.take() {
            match &self.kind {
                ItemKind::Doc { collection, id } => store.unsubscribe_doc(collection, id, sub),
                ItemKind::Query { .. } => store.unsubscribe_query(sub),
            }
        }
    }

    fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            status: ItemStatus::Loading,
            fetch_total: 0,
            sub_total: 0,
            store_sub: None,
            cancelled: false,
            epoch: 0,
            waiters: Vec::new(),
        }
    }

    fn total(&self) -> usize {
        self.fetch_total + self.sub_total
    }
}

/// Joins N per-target completions into one user callback: fires once, with
/// the first error or `Ok` after the last target settles.
struct Joiner {
    remaining: Cell<usize>,
    failed: RefCell<Option<ModelError>>,
    cb: RefCell<Option<AckCallback>>,
}

impl Joiner {
    fn new(count: usize, cb: AckCallback) -> Rc<Self> {
        let joiner = Rc::new(Self {
            remaining: Cell::new(count),
            failed: RefCell::new(None),
            cb: RefCell::new(Some(cb)),
        });
        if count == 0 {
            if let Some(cb) = joiner.cb.borrow_mut().take() {
                cb(Ok(()));
            }
        }
        joiner
    }

    fn arm(self: &Rc<Self>) -> AckCallback {
        let joiner = Rc::clone(self);
        Box::new(move |result| {
            if let Err(err) = result {
                let mut failed = joiner.failed.borrow_mut();
                if failed.is_none() {
                    *failed = Some(err);
                }
            }
            joiner.remaining.set(joiner.remaining.get() - 1);
            if joiner.remaining.get() == 0 {
                if let Some(cb) = joiner.cb.borrow_mut().take() {
                    match joiner.failed.borrow_mut().take() {
                        Some(err) => cb(Err(err)),
                        None => cb(Ok(())),
                    }
                }
            }
        })
    }
}

impl Model {
    /// Fetch one or more items into this handle's context.
    pub fn fetch(
        &self,
        targets: impl IntoIterator<Item = LoadTarget>,
        done: impl FnOnce(Result<(), ModelError>) + 'static,
    ) {
        load(&self.root, &self.context, targets, false, Box::new(done));
    }

    /// Subscribe one or more items into this handle's context. With the
    /// `fetch_only` option, subscribes are downgraded to fetches.
    pub fn subscribe(
        &self,
        targets: impl IntoIterator<Item = LoadTarget>,
        done: impl FnOnce(Result<(), ModelError>) + 'static,
    ) {
        let subscribe = !self.root.options.fetch_only;
        load(&self.root, &self.context, targets, subscribe, Box::new(done));
    }

    pub fn unfetch(
        &self,
        targets: impl IntoIterator<Item = LoadTarget>,
        done: impl FnOnce(Result<(), ModelError>) + 'static,
    ) {
        release(&self.root, &self.context, targets, false, Box::new(done));
    }

    pub fn unsubscribe(
        &self,
        targets: impl IntoIterator<Item = LoadTarget>,
        done: impl FnOnce(Result<(), ModelError>) + 'static,
    ) {
        let subscribe = !self.root.options.fetch_only;
        release(&self.root, &self.context, targets, subscribe, Box::new(done));
    }

    /// Zero every count held by `ctx` (this handle's context when `None`)
    /// and release whatever drops to zero.
    pub fn unload(&self, ctx: Option<&str>) {
        let ctx = ctx.unwrap_or(&self.context).to_string();
        unload_context(&self.root, &ctx);
    }

    /// [`unload`](Model::unload) across every context.
    pub fn unload_all(&self) {
        let contexts: Vec<String> = {
            let st = self.root.state.borrow();
            st.contexts.keys().cloned().collect()
        };
        for ctx in contexts {
            unload_context(&self.root, &ctx);
        }
    }

    /// This handle as a doc load target; the path must be `collection.id`.
    pub fn load_target(&self) -> Result<LoadTarget, ModelError> {
        match doc_address(&self.path) {
            Some((collection, id, rest)) if rest.is_empty() => {
                Ok(LoadTarget::Doc { collection, id })
            }
            _ => Err(ModelError::MissingDoc(path_to_string(&self.path))),
        }
    }
}

pub(crate) fn load(
    root: &Rc<Root>,
    ctx: &str,
    targets: impl IntoIterator<Item = LoadTarget>,
    subscribe: bool,
    done: AckCallback,
) {
    let targets: Vec<LoadTarget> = targets.into_iter().collect();
    let joiner = Joiner::new(targets.len(), done);
    for target in targets {
        load_one(root, ctx, ItemKind::from_target(&target), subscribe, joiner.arm());
    }
}

enum LoadAction {
    /// The item was already resident; the callback completes at once.
    AckNow(AckCallback),
    /// A load for this item is already in flight; the callback joined it.
    Waiting,
    /// Begin a fresh load (or open a missing store subscription).
    Start { kind: ItemKind, subscribe: bool },
}

fn load_one(root: &Rc<Root>, ctx: &str, kind: ItemKind, subscribe: bool, cb: AckCallback) {
    let key = kind.key();
    tracing::debug!(context = ctx, item = %key, subscribe, "load");
    let action = {
        let mut st = root.state.borrow_mut();
        let counts = st.contexts.entry(ctx.to_string()).or_default();
        let slot = if subscribe {
            counts.subscribed.entry(key.clone()).or_insert(0)
        } else {
            counts.fetched.entry(key.clone()).or_insert(0)
        };
        *slot += 1;

        let fresh = !st.items.contains_key(&key);
        let item = st
            .items
            .entry(key.clone())
            .or_insert_with(|| ItemState::new(kind.clone()));
        if subscribe {
            item.sub_total += 1;
        } else {
            item.fetch_total += 1;
        }

        if fresh {
            item.waiters.push(cb);
            LoadAction::Start {
                kind: item.kind.clone(),
                subscribe,
            }
        } else {
            match item.status {
                ItemStatus::Loading => {
                    // A pending cancellation is revoked; the outstanding ack
                    // completes this load normally.
                    item.cancelled = false;
                    item.waiters.push(cb);
                    if subscribe && item.store_sub.is_none() {
                        // The in-flight load is fetch-only; open the store
                        // subscription alongside it.
                        LoadAction::Start {
                            kind: item.kind.clone(),
                            subscribe: true,
                        }
                    } else {
                        LoadAction::Waiting
                    }
                }
                ItemStatus::Resident | ItemStatus::Unloading => {
                    if item.status == ItemStatus::Unloading {
                        item.status = ItemStatus::Resident;
                        item.epoch += 1;
                    }
                    if subscribe && item.store_sub.is_none() {
                        item.waiters.push(cb);
                        LoadAction::Start {
                            kind: item.kind.clone(),
                            subscribe: true,
                        }
                    } else {
                        LoadAction::AckNow(cb)
                    }
                }
            }
        }
    };

    match action {
        LoadAction::AckNow(cb) => cb(Ok(())),
        LoadAction::Waiting => {}
        LoadAction::Start { kind, subscribe } => start_load(root, key, kind, subscribe),
    }
}

/// Kick off the store call for an item. `pending` is held for the duration
/// of the load so `when_nothing_pending` waits for it.
fn start_load(root: &Rc<Root>, key: String, kind: ItemKind, subscribe: bool) {
    root.state.borrow_mut().pending += 1;
    let weak = Rc::downgrade(root);
    match kind {
        ItemKind::Doc { collection, id } => {
            let done_key = key.clone();
            let done_collection = collection.clone();
            let done_id = id.clone();
            let done = Box::new(move |result: Result<Option<Value>, ModelError>| {
                let Some(root) = weak.upgrade() else { return };
                finish_doc_load(&root, &done_key, &done_collection, &done_id, result);
            });
            if subscribe {
                let op_weak = Rc::downgrade(root);
                let op_collection = collection.clone();
                let op_id = id.clone();
                let sub = root.store.subscribe_doc(
                    &collection,
                    &id,
                    Box::new(move |envelope| {
                        let Some(root) = op_weak.upgrade() else { return };
                        apply_remote_op(&root, &op_collection, &op_id, envelope);
                    }),
                    done,
                );
                if let Some(item) = root.state.borrow_mut().items.get_mut(&key) {
                    item.store_sub = Some(sub);
                }
            } else {
                root.store.fetch_doc(&collection, &id, done);
            }
        }
        ItemKind::Query {
            collection,
            expression,
            options,
        } => {
            let done_key = key.clone();
            let done = Box::new(move |result: Result<QueryResults, ModelError>| {
                let Some(root) = weak.upgrade() else { return };
                finish_query_load(&root, &done_key, result);
            });
            if subscribe {
                let results_weak = Rc::downgrade(root);
                let results_key = key.clone();
                let sub = root.store.subscribe_query(
                    &collection,
                    &expression,
                    &options,
                    Box::new(move |results| {
                        let Some(root) = results_weak.upgrade() else { return };
                        apply_query_results(&root, &results_key, results);
                    }),
                    done,
                );
                if let Some(item) = root.state.borrow_mut().items.get_mut(&key) {
                    item.store_sub = Some(sub);
                }
            } else {
                root.store.fetch_query(&collection, &expression, &options, done);
            }
        }
    }
}

fn finish_doc_load(
    root: &Rc<Root>,
    key: &str,
    collection: &str,
    id: &str,
    result: Result<Option<Value>, ModelError>,
) {
    root.state.borrow_mut().pending -= 1;
    let outcome = settle_item(root, key, result.is_ok());
    match outcome {
        ItemOutcome::Gone => {}
        ItemOutcome::Cancelled { store_sub } => {
            if let Some(sub) = store_sub {
                root.store.unsubscribe_doc(collection, id, sub);
            }
        }
        ItemOutcome::Settled { waiters } => match result {
            Ok(doc) => {
                if let Some(doc) = doc {
                    write_loaded_doc(root, collection, id, doc);
                }
                for cb in waiters {
                    cb(Ok(()));
                }
            }
            Err(err) => {
                for cb in waiters {
                    cb(Err(err.clone()));
                }
            }
        },
    }
    check_settled(root);
}

fn finish_query_load(root: &Rc<Root>, key: &str, result: Result<QueryResults, ModelError>) {
    root.state.borrow_mut().pending -= 1;
    let outcome = settle_item(root, key, result.is_ok());
    match outcome {
        ItemOutcome::Gone => {}
        ItemOutcome::Cancelled { store_sub } => {
            if let Some(sub) = store_sub {
                root.store.unsubscribe_query(sub);
            }
        }
        ItemOutcome::Settled { waiters } => match result {
            Ok(results) => {
                apply_query_results(root, key, results);
                for cb in waiters {
                    cb(Ok(()));
                }
            }
            Err(err) => {
                for cb in waiters {
                    cb(Err(err.clone()));
                }
            }
        },
    }
    check_settled(root);
}

enum ItemOutcome {
    /// The item vanished before the ack arrived.
    Gone,
    /// The load was cancelled while in flight; discard the ack.
    Cancelled { store_sub: Option<SubscriptionId> },
    /// The load completed; deliver to everyone who joined it.
    Settled { waiters: Vec<AckCallback> },
}

/// Transition an item out of `Loading` when its ack arrives. On error the
/// item goes back to absent and its counts are dropped everywhere.
fn settle_item(root: &Rc<Root>, key: &str, ok: bool) -> ItemOutcome {
    let mut st = root.state.borrow_mut();
    let Some(item) = st.items.get_mut(key) else {
        return ItemOutcome::Gone;
    };
    if item.cancelled {
        let store_sub = item.store_sub.take();
        st.items.remove(key);
        clear_counts(&mut st.contexts, key);
        return ItemOutcome::Cancelled { store_sub };
    }
    let waiters = std::mem::take(&mut item.waiters);
    if ok {
        item.status = ItemStatus::Resident;
    } else {
        st.items.remove(key);
        clear_counts(&mut st.contexts, key);
    }
    ItemOutcome::Settled { waiters }
}

fn clear_counts(contexts: &mut BTreeMap<String, ContextCounts>, key: &str) {
    for counts in contexts.values_mut() {
        counts.fetched.remove(key);
        counts.subscribed.remove(key);
    }
    contexts.retain(|_, counts| !counts.is_empty());
}

/// Put a freshly loaded doc into the tree and announce it.
pub(crate) fn write_loaded_doc(root: &Rc<Root>, collection: &str, id: &str, doc: Value) {
    let path = vec![Segment::from(collection), Segment::from(id)];
    let previous = {
        let mut st = root.state.borrow_mut();
        match st.tree.set_at(&path, doc.clone()) {
            Ok(previous) => previous,
            Err(err) => {
                drop(st);
                crate::model::report_error(
                    root,
                    format!("loaded doc rejected at {}: {err}", path_to_string(&path)),
                );
                return;
            }
        }
    };
    enqueue_event(
        root,
        MutationEvent {
            kind: EventKind::Load,
            path,
            value: Some(doc),
            previous,
            passed: None,
            silent: false,
            event_context: None,
        },
    );
}

/// Fold a query result set into the tree and the query registry. New docs
/// announce as `Load`; changed docs as `Change`.
pub(crate) fn apply_query_results(root: &Rc<Root>, key: &str, results: QueryResults) {
    let (collection, expression, options) = {
        let st = root.state.borrow();
        match st.items.get(key).map(|item| &item.kind) {
            Some(ItemKind::Query {
                collection,
                expression,
                options,
            }) => (collection.clone(), expression.clone(), options.clone()),
            _ => return,
        }
    };
    {
        let mut st = root.state.borrow_mut();
        let entry = st
            .queries
            .entry(key.to_string())
            .or_insert_with(|| QueryState {
                collection: collection.clone(),
                expression,
                options,
                ids: Vec::new(),
                extra: None,
            });
        entry.ids = results.ids.clone();
        entry.extra = results.extra.clone();
    }
    for (id, doc) in results.docs {
        let path = vec![Segment::from(collection.as_str()), Segment::from(id.as_str())];
        let changed = {
            let st = root.state.borrow();
            match st.tree.lookup(&path) {
                Some(current) => {
                    if crate::equality::deep_equal(current, &doc) {
                        None
                    } else {
                        Some(EventKind::Change)
                    }
                }
                None => Some(EventKind::Load),
            }
        };
        let Some(kind) = changed else { continue };
        let previous = {
            let mut st = root.state.borrow_mut();
            match st.tree.set_at(&path, doc.clone()) {
                Ok(previous) => previous,
                Err(_) => continue,
            }
        };
        enqueue_event(
            root,
            MutationEvent {
                kind,
                path,
                value: Some(doc),
                previous,
                passed: None,
                silent: false,
                event_context: None,
            },
        );
    }
}

pub(crate) fn release(
    root: &Rc<Root>,
    ctx: &str,
    targets: impl IntoIterator<Item = LoadTarget>,
    subscribe: bool,
    done: AckCallback,
) {
    let targets: Vec<LoadTarget> = targets.into_iter().collect();
    let joiner = Joiner::new(targets.len(), done);
    for target in targets {
        let kind = ItemKind::from_target(&target);
        release_one(root, ctx, &kind.key(), subscribe, 1);
        joiner.arm()(Ok(()));
    }
}

/// Decrement `count` references for `key` in `ctx`. When the summed count
/// across contexts reaches zero the item is cancelled (still loading) or
/// unloaded (after the configured delay).
fn release_one(root: &Rc<Root>, ctx: &str, key: &str, subscribe: bool, count: usize) {
    tracing::debug!(context = ctx, item = %key, subscribe, "release");
    enum ReleaseAction {
        None,
        CancelWaiters(Vec<AckCallback>),
        DropSubscription(ItemKind, SubscriptionId),
        UnloadNow(u64),
        ScheduleUnload(u64, u32),
    }

    let action = {
        let mut st = root.state.borrow_mut();
        if let Some(counts) = st.contexts.get_mut(ctx) {
            let slots = if subscribe {
                &mut counts.subscribed
            } else {
                &mut counts.fetched
            };
            if let Some(slot) = slots.get_mut(key) {
                *slot = slot.saturating_sub(count);
                if *slot == 0 {
                    slots.remove(key);
                }
            }
            if counts.is_empty() {
                st.contexts.remove(ctx);
            }
        }

        let unload_delay = root.options.unload_delay;
        match st.items.get_mut(key) {
            None => ReleaseAction::None,
            Some(item) => {
                if subscribe {
                    item.sub_total = item.sub_total.saturating_sub(count);
                } else {
                    item.fetch_total = item.fetch_total.saturating_sub(count);
                }
                if item.total() > 0 {
                    // Still referenced; but the last subscriber may be gone.
                    if subscribe && item.sub_total == 0 {
                        if let Some(sub) = item.store_sub.take() {
                            ReleaseAction::DropSubscription(item.kind.clone(), sub)
                        } else {
                            ReleaseAction::None
                        }
                    } else {
                        ReleaseAction::None
                    }
                } else {
                    match item.status {
                        ItemStatus::Loading => {
                            item.cancelled = true;
                            ReleaseAction::CancelWaiters(std::mem::take(&mut item.waiters))
                        }
                        ItemStatus::Resident | ItemStatus::Unloading => {
                            item.status = ItemStatus::Unloading;
                            item.epoch += 1;
                            let epoch = item.epoch;
                            if unload_delay == 0 {
                                ReleaseAction::UnloadNow(epoch)
                            } else {
                                ReleaseAction::ScheduleUnload(epoch, unload_delay - 1)
                            }
                        }
                    }
                }
            }
        }
    };

    match action {
        ReleaseAction::None => {}
        ReleaseAction::CancelWaiters(waiters) => {
            for cb in waiters {
                cb(Err(ModelError::Cancelled(key.to_string())));
            }
        }
        ReleaseAction::DropSubscription(kind, sub) => match kind {
            ItemKind::Doc { collection, id } => root.store.unsubscribe_doc(&collection, &id, sub),
            ItemKind::Query { .. } => root.store.unsubscribe_query(sub),
        },
        ReleaseAction::UnloadNow(epoch) => perform_unload(root, key, epoch),
        ReleaseAction::ScheduleUnload(epoch, remaining) => {
            root.state.borrow_mut().deferred.push_back(Deferred::Unload {
                key: key.to_string(),
                epoch,
                remaining,
            });
        }
    }
}

/// Actually evict an unloading item: drop its store subscription, remove
/// its data, and announce the unload. A stale epoch means the item was
/// re-loaded in the meantime and the eviction is void.
pub(crate) fn perform_unload(root: &Rc<Root>, key: &str, epoch: u64) {
    let (kind, store_sub, removed) = {
        let mut st = root.state.borrow_mut();
        let Some(item) = st.items.get(key) else { return };
        if item.status != ItemStatus::Unloading || item.epoch != epoch {
            return;
        }
        let mut item = st.items.remove(key).expect("checked above");
        let store_sub = item.store_sub.take();
        let kind = item.kind;
        let removed = match &kind {
            ItemKind::Doc { collection, id } => {
                let path = vec![Segment::from(collection.as_str()), Segment::from(id.as_str())];
                st.tree.del_at(&path).map(|doc| (path, doc))
            }
            ItemKind::Query { .. } => {
                st.queries.remove(key);
                None
            }
        };
        (kind, store_sub, removed)
    };
    tracing::debug!(item = %key, "unload");
    if let Some(sub) = store_sub {
        match &kind {
            ItemKind::Doc { collection, id } => root.store.unsubscribe_doc(collection, id, sub),
            ItemKind::Query { .. } => root.store.unsubscribe_query(sub),
        }
    }
    if let Some((path, doc)) = removed {
        enqueue_event(
            root,
            MutationEvent {
                kind: EventKind::Unload,
                path,
                value: None,
                previous: Some(doc),
                passed: None,
                silent: false,
                event_context: None,
            },
        );
    }
}

/// Zero every count held by `ctx` and release items that drop to zero.
pub(crate) fn unload_context(root: &Rc<Root>, ctx: &str) {
    tracing::debug!(context = ctx, "unload context");
    let counts = {
        let mut st = root.state.borrow_mut();
        st.contexts.remove(ctx)
    };
    let Some(counts) = counts else { return };
    // Re-insert so release_one's bookkeeping sees the counts it expects.
    root.state
        .borrow_mut()
        .contexts
        .insert(ctx.to_string(), counts.clone());
    for (key, count) in counts.fetched {
        release_one(root, ctx, &key, false, count);
    }
    for (key, count) in counts.subscribed {
        release_one(root, ctx, &key, true, count);
    }
    root.state.borrow_mut().contexts.remove(ctx);
}

/// Summed reference counts for one item across restored contexts.
#[derive(Debug, Default, Clone)]
pub(crate) struct RestoredCounts {
    pub(crate) fetched: usize,
    pub(crate) subscribed: usize,
}

/// Rebuild the load table from restored counts. Doc keys decode from their
/// `doc:<collection>.<id>` form; query keys must appear in `query_kinds`.
/// Restored items are resident (their data came with the snapshot) with no
/// store subscription yet.
pub(crate) fn restore_items(
    counts: &BTreeMap<String, RestoredCounts>,
    query_kinds: &BTreeMap<String, ItemKind>,
) -> Result<BTreeMap<String, ItemState>, ModelError> {
    let mut items = BTreeMap::new();
    for (key, count) in counts {
        let kind = if let Some(rest) = key.strip_prefix("doc:") {
            let (collection, id) = rest.split_once('.').ok_or_else(|| {
                ModelError::CorruptBundle(format!("malformed doc item key: {key}"))
            })?;
            ItemKind::Doc {
                collection: collection.to_string(),
                id: id.to_string(),
            }
        } else if key.starts_with("query:") {
            query_kinds
                .get(key)
                .cloned()
                .ok_or_else(|| ModelError::CorruptBundle(format!("unknown query item: {key}")))?
        } else {
            return Err(ModelError::CorruptBundle(format!("unknown item key: {key}")));
        };
        let mut item = ItemState::new(kind);
        item.status = ItemStatus::Resident;
        item.fetch_total = count.fetched;
        item.sub_total = count.subscribed;
        items.insert(key.clone(), item);
    }
    Ok(items)
}

/// Re-open store subscriptions to match restored subscribe refcounts.
/// Used by snapshot restore; fetch-only items keep their restored data
/// without a refresh.
pub(crate) fn resubscribe_all(root: &Rc<Root>) {
    let to_start: Vec<(String, ItemKind)> = {
        let st = root.state.borrow();
        st.items
            .iter()
            .filter(|(_, item)| item.store_sub.is_none() && item.sub_total > 0)
            .map(|(key, item)| (key.clone(), item.kind.clone()))
            .collect()
    };
    for (key, kind) in to_start {
        start_load(root, key, kind, true);
    }
}

