//! Client-side handles over remote queries.
//!
//! A [`Query`] is a cheap value naming `(collection, expression, options)`;
//! its identity is the stable hash of the expression and options, so two
//! handles built from equal inputs share one load item and one result set.

use serde_json::{json, Value};
use std::rc::Weak;

use crate::error::ModelError;
use crate::load::LoadTarget;
use crate::model::{Model, Root};
use crate::path::Segment;

/// Deterministic serialization of `{expression, options}`. Object keys are
/// sorted at every level, so equal inputs always hash equally.
pub(crate) fn stable_hash(expression: &Value, options: &Value) -> String {
    serde_json::to_string(&json!({
        "expression": expression,
        "options": options,
    }))
    .unwrap_or_default()
}

/// The registry entry backing a loaded query: its current id set and extra
/// metadata, updated on every result delivery.
#[derive(Debug, Clone)]
pub(crate) struct QueryState {
    pub(crate) collection: String,
    pub(crate) expression: Value,
    pub(crate) options: Value,
    pub(crate) ids: Vec<String>,
    pub(crate) extra: Option<Value>,
}

/// A scoped handle over a remote query.
#[derive(Debug, Clone)]
pub struct Query {
    root: Weak<Root>,
    context: String,
    collection: String,
    expression: Value,
    options: Value,
    hash: String,
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection && self.hash == other.hash
    }
}

impl Model {
    /// A query handle bound to this handle's data-loading context.
    pub fn query(&self, collection: &str, expression: Value, options: Value) -> Query {
        let hash = stable_hash(&expression, &options);
        Query {
            root: std::rc::Rc::downgrade(&self.root),
            context: self.context.clone(),
            collection: collection.to_string(),
            expression,
            options,
            hash,
        }
    }
}

impl Query {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn expression(&self) -> &Value {
        &self.expression
    }

    pub fn options(&self) -> &Value {
        &self.options
    }

    /// The stable hash identifying this query in item keys and bundles.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub(crate) fn key(&self) -> String {
        format!("query:{}:{}", self.collection, self.hash)
    }

    /// The current result ids, in backend order.
    pub fn get_ids(&self) -> Vec<String> {
        let Some(root) = self.root.upgrade() else {
            return Vec::new();
        };
        let st = root.state.borrow();
        st.queries
            .get(&self.key())
            .map(|entry| entry.ids.clone())
            .unwrap_or_default()
    }

    /// The materialized result documents, in backend order. Ids whose doc
    /// is not resident are skipped.
    pub fn get(&self) -> Vec<Value> {
        let Some(root) = self.root.upgrade() else {
            return Vec::new();
        };
        let st = root.state.borrow();
        let Some(entry) = st.queries.get(&self.key()) else {
            return Vec::new();
        };
        entry
            .ids
            .iter()
            .filter_map(|id| {
                let path = [
                    Segment::from(self.collection.as_str()),
                    Segment::from(id.as_str()),
                ];
                st.tree.get_deep_copy(&path)
            })
            .collect()
    }

    /// Backend-defined metadata attached to the result set.
    pub fn get_extra(&self) -> Option<Value> {
        let root = self.root.upgrade()?;
        let st = root.state.borrow();
        st.queries.get(&self.key()).and_then(|entry| entry.extra.clone())
    }

    pub fn fetch(&self, done: impl FnOnce(Result<(), ModelError>) + 'static) {
        self.load(false, Box::new(done));
    }

    pub fn subscribe(&self, done: impl FnOnce(Result<(), ModelError>) + 'static) {
        self.load(true, Box::new(done));
    }

    pub fn unfetch(&self, done: impl FnOnce(Result<(), ModelError>) + 'static) {
        self.release(false, Box::new(done));
    }

    pub fn unsubscribe(&self, done: impl FnOnce(Result<(), ModelError>) + 'static) {
        self.release(true, Box::new(done));
    }

    fn load(&self, subscribe: bool, done: crate::handle::AckCallback) {
        let Some(root) = self.root.upgrade() else {
            done(Err(ModelError::Backend("model dropped".into())));
            return;
        };
        let subscribe = subscribe && !root.options.fetch_only;
        crate::load::load(
            &root,
            &self.context,
            [LoadTarget::Query(self.clone())],
            subscribe,
            done,
        );
    }

    fn release(&self, subscribe: bool, done: crate::handle::AckCallback) {
        let Some(root) = self.root.upgrade() else {
            done(Err(ModelError::Backend("model dropped".into())));
            return;
        };
        let subscribe = subscribe && !root.options.fetch_only;
        crate::load::release(
            &root,
            &self.context,
            [LoadTarget::Query(self.clone())],
            subscribe,
            done,
        );
    }
}
