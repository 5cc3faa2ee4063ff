//! In-process [`DocStore`] used by the test suite and as a reference
//! backend implementation.
//!
//! Deliveries (acks, op broadcasts, query result updates) are queued and
//! drained by [`MemoryDocStore::step`], so one `step` call plays the part
//! of one remote scheduling tick. Submitted ops are applied to the stored
//! doc immediately, in submission order.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::docstore::{
    DocCallback, DocStore, DoneCallback, OpHandler, QueryCallback, QueryResults, ResultsHandler,
    SubscriptionId,
};
use crate::error::ModelError;
use crate::op::{self, DocOp, OpEnvelope};

struct DocSub {
    collection: String,
    id: String,
    on_op: Rc<RefCell<OpHandler>>,
}

struct QuerySub {
    collection: String,
    expression: Value,
    options: Value,
    on_results: Rc<RefCell<ResultsHandler>>,
}

#[derive(Default)]
struct MemState {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    doc_subs: BTreeMap<SubscriptionId, DocSub>,
    query_subs: BTreeMap<SubscriptionId, QuerySub>,
    next_sub: SubscriptionId,
    tasks: VecDeque<Box<dyn FnOnce()>>,
    fail_next_submit: Option<ModelError>,
}

/// Shared in-memory OT backend. Clone the handle to share one store across
/// several models.
#[derive(Clone)]
pub struct MemoryDocStore {
    state: Rc<RefCell<MemState>>,
}

impl Default for MemoryDocStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MemState::default())),
        }
    }

    /// Deliver every queued ack, remote op, and query update, including
    /// ones queued while draining. Returns the number of deliveries.
    pub fn step(&self) -> usize {
        let mut delivered = 0;
        loop {
            let task = self.state.borrow_mut().tasks.pop_front();
            let Some(task) = task else { break };
            task();
            delivered += 1;
        }
        delivered
    }

    pub fn is_idle(&self) -> bool {
        self.state.borrow().tasks.is_empty()
    }

    /// Place a doc directly into the store, without broadcasting.
    pub fn seed_doc(&self, collection: &str, id: &str, doc: Value) {
        self.state
            .borrow_mut()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
    }

    /// The server-side copy of a doc.
    pub fn doc(&self, collection: &str, id: &str) -> Option<Value> {
        self.state
            .borrow()
            .collections
            .get(collection)
            .and_then(|col| col.get(id))
            .cloned()
    }

    /// Make the next `submit_op` fail with a backend error. Test hook.
    pub fn fail_next_submit(&self, message: &str) {
        self.state.borrow_mut().fail_next_submit = Some(ModelError::Backend(message.to_string()));
    }

    fn next_sub_id(state: &mut MemState) -> SubscriptionId {
        state.next_sub += 1;
        state.next_sub
    }

    fn enqueue(&self, task: Box<dyn FnOnce()>) {
        self.state.borrow_mut().tasks.push_back(task);
    }

    /// Queue result recomputation and delivery for every query subscribed
    /// to `collection`.
    fn notify_queries(&self, collection: &str) {
        let subs: Vec<(Value, Value, Rc<RefCell<ResultsHandler>>)> = {
            let st = self.state.borrow();
            st.query_subs
                .values()
                .filter(|sub| sub.collection == collection)
                .map(|sub| {
                    (
                        sub.expression.clone(),
                        sub.options.clone(),
                        Rc::clone(&sub.on_results),
                    )
                })
                .collect()
        };
        let collection = collection.to_string();
        for (expression, options, handler) in subs {
            let state = Rc::clone(&self.state);
            let collection = collection.clone();
            self.enqueue(Box::new(move || {
                // Compute at delivery time so the results reflect every op
                // applied before this tick.
                let results = {
                    let st = state.borrow();
                    run_query(&st, &collection, &expression, &options)
                };
                (handler.borrow_mut())(results);
            }));
        }
    }
}

impl DocStore for MemoryDocStore {
    fn fetch_doc(&self, collection: &str, id: &str, done: DocCallback) {
        let doc = self.doc(collection, id);
        self.enqueue(Box::new(move || done(Ok(doc))));
    }

    fn subscribe_doc(
        &self,
        collection: &str,
        id: &str,
        on_op: OpHandler,
        done: DocCallback,
    ) -> SubscriptionId {
        let sub = {
            let mut st = self.state.borrow_mut();
            let sub = Self::next_sub_id(&mut st);
            st.doc_subs.insert(
                sub,
                DocSub {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    on_op: Rc::new(RefCell::new(on_op)),
                },
            );
            sub
        };
        let doc = self.doc(collection, id);
        self.enqueue(Box::new(move || done(Ok(doc))));
        sub
    }

    fn unsubscribe_doc(&self, _collection: &str, _id: &str, sub: SubscriptionId) {
        self.state.borrow_mut().doc_subs.remove(&sub);
    }

    fn submit_op(&self, collection: &str, id: &str, envelope: OpEnvelope, done: DoneCallback) {
        let failure = self.state.borrow_mut().fail_next_submit.take();
        if let Some(err) = failure {
            self.enqueue(Box::new(move || done(Err(err))));
            return;
        }
        let applied = {
            let mut st = self.state.borrow_mut();
            let col = st.collections.entry(collection.to_string()).or_default();
            let doc = col
                .entry(id.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            let applied = op::apply(doc, &envelope.op);
            // A whole-doc delete removes the entry rather than leaving null.
            if applied.is_ok()
                && matches!(&envelope.op, DocOp::ObjectDelete { path, .. } if path.is_empty())
            {
                col.remove(id);
            }
            applied
        };
        match applied {
            Err(err) => {
                let err = ModelError::Backend(err.to_string());
                self.enqueue(Box::new(move || done(Err(err))));
            }
            Ok(()) => {
                self.enqueue(Box::new(move || done(Ok(()))));
                let handlers: Vec<Rc<RefCell<OpHandler>>> = {
                    let st = self.state.borrow();
                    st.doc_subs
                        .values()
                        .filter(|sub| sub.collection == collection && sub.id == id)
                        .map(|sub| Rc::clone(&sub.on_op))
                        .collect()
                };
                for handler in handlers {
                    let envelope = envelope.clone();
                    self.enqueue(Box::new(move || {
                        (handler.borrow_mut())(envelope);
                    }));
                }
                self.notify_queries(collection);
            }
        }
    }

    fn fetch_query(
        &self,
        collection: &str,
        expression: &Value,
        options: &Value,
        done: QueryCallback,
    ) {
        let results = {
            let st = self.state.borrow();
            run_query(&st, collection, expression, options)
        };
        self.enqueue(Box::new(move || done(Ok(results))));
    }

    fn subscribe_query(
        &self,
        collection: &str,
        expression: &Value,
        options: &Value,
        on_results: ResultsHandler,
        done: QueryCallback,
    ) -> SubscriptionId {
        let sub = {
            let mut st = self.state.borrow_mut();
            let sub = Self::next_sub_id(&mut st);
            st.query_subs.insert(
                sub,
                QuerySub {
                    collection: collection.to_string(),
                    expression: expression.clone(),
                    options: options.clone(),
                    on_results: Rc::new(RefCell::new(on_results)),
                },
            );
            sub
        };
        let results = {
            let st = self.state.borrow();
            run_query(&st, collection, expression, options)
        };
        self.enqueue(Box::new(move || done(Ok(results))));
        sub
    }

    fn unsubscribe_query(&self, sub: SubscriptionId) {
        self.state.borrow_mut().query_subs.remove(&sub);
    }
}

/// Equality-filter query evaluation: every `(key, value)` pair in the
/// expression must match the doc; `{}` matches the whole collection.
/// Options understood: `$skip` and `$limit`.
fn run_query(state: &MemState, collection: &str, expression: &Value, options: &Value) -> QueryResults {
    let empty = BTreeMap::new();
    let col = state.collections.get(collection).unwrap_or(&empty);
    let mut ids: Vec<String> = col
        .iter()
        .filter(|(_, doc)| matches_expression(doc, expression))
        .map(|(id, _)| id.clone())
        .collect();
    let matched = ids.len();

    let skip = options
        .get("$skip")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    if skip > 0 {
        ids = ids.into_iter().skip(skip).collect();
    }
    if let Some(limit) = options.get("$limit").and_then(Value::as_u64) {
        ids.truncate(limit as usize);
    }

    let docs = ids
        .iter()
        .filter_map(|id| col.get(id).map(|doc| (id.clone(), doc.clone())))
        .collect();
    QueryResults {
        ids,
        docs,
        extra: Some(Value::from(matched as u64)),
    }
}

fn matches_expression(doc: &Value, expression: &Value) -> bool {
    match expression {
        Value::Object(filters) => filters
            .iter()
            .all(|(key, expected)| doc.get(key) == Some(expected)),
        Value::Null => true,
        _ => false,
    }
}
