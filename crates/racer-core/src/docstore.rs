//! The backend seam consumed by the model engine.
//!
//! The engine is single-threaded and cooperative, so the interface is
//! callback-based: a store may complete a call synchronously or defer it to
//! a later scheduling tick. All completion callbacks run on the caller's
//! logical event loop.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ModelError;
use crate::op::OpEnvelope;

/// Identifier for an active doc or query subscription within a store.
pub type SubscriptionId = u64;

/// Completion of a fire-and-forget call (op submission).
pub type DoneCallback = Box<dyn FnOnce(Result<(), ModelError>)>;

/// Completion of a doc load: the doc snapshot, or `None` when the doc does
/// not exist yet.
pub type DocCallback = Box<dyn FnOnce(Result<Option<Value>, ModelError>)>;

/// Completion of a query load.
pub type QueryCallback = Box<dyn FnOnce(Result<QueryResults, ModelError>)>;

/// Remote-op delivery for a doc subscription.
pub type OpHandler = Box<dyn FnMut(OpEnvelope)>;

/// Result-set delivery for a query subscription.
pub type ResultsHandler = Box<dyn FnMut(QueryResults)>;

/// A query's materialized answer: ids in backend order, the matching doc
/// snapshots, and backend-defined extra metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResults {
    pub ids: Vec<String>,
    pub docs: BTreeMap<String, Value>,
    pub extra: Option<Value>,
}

/// Operational-transform document backend.
///
/// The engine owns nothing about storage, transport, or transform; it
/// forwards JSON0 ops and consumes snapshots/op streams through this
/// interface. Implementations use interior mutability (`&self` methods) and
/// must deliver callbacks on the single logical event loop.
pub trait DocStore {
    fn fetch_doc(&self, collection: &str, id: &str, done: DocCallback);

    /// Subscribe to a doc: `on_op` receives every op accepted by the
    /// backend for this doc (including the subscriber's own, which carry
    /// the submitter's session id for filtering).
    fn subscribe_doc(
        &self,
        collection: &str,
        id: &str,
        on_op: OpHandler,
        done: DocCallback,
    ) -> SubscriptionId;

    fn unsubscribe_doc(&self, collection: &str, id: &str, sub: SubscriptionId);

    fn submit_op(&self, collection: &str, id: &str, envelope: OpEnvelope, done: DoneCallback);

    fn fetch_query(&self, collection: &str, expression: &Value, options: &Value, done: QueryCallback);

    fn subscribe_query(
        &self,
        collection: &str,
        expression: &Value,
        options: &Value,
        on_results: ResultsHandler,
        done: QueryCallback,
    ) -> SubscriptionId;

    fn unsubscribe_query(&self, sub: SubscriptionId);
}
