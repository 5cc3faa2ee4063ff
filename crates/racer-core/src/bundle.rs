//! Snapshot bundling: the whole engine state as one opaque JSON value.
//!
//! The bundle carries the tree by collection, every context's reference
//! counts, the active queries, and the opaque derived-view slots. Restoring
//! replaces all state atomically and then re-opens store subscriptions to
//! match the restored subscribe refcounts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ModelError;
use crate::load::{resubscribe_all, restore_items, ItemKind, RestoredCounts};
use crate::model::Model;
use crate::query::{stable_hash, QueryState};

#[derive(Debug, Serialize, Deserialize)]
struct BundleShape {
    collections: Value,
    contexts: BTreeMap<String, ContextShape>,
    queries: Vec<QueryShape>,
    refs: Value,
    #[serde(rename = "refLists")]
    ref_lists: Value,
    fns: Value,
    filters: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextShape {
    fetched: BTreeMap<String, usize>,
    subscribed: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct QueryShape {
    collection: String,
    expression: Value,
    options: Value,
    ids: Vec<String>,
    extra: Option<Value>,
}

impl Model {
    /// Serialize the tree, contexts, queries, and derived-view slots into
    /// one round-trippable JSON value.
    pub fn bundle(&self) -> Value {
        let st = self.root.state.borrow();
        let contexts = st
            .contexts
            .iter()
            .map(|(name, counts)| {
                (
                    name.clone(),
                    ContextShape {
                        fetched: counts.fetched.clone(),
                        subscribed: counts.subscribed.clone(),
                    },
                )
            })
            .collect();
        let queries = st
            .queries
            .values()
            .map(|entry| QueryShape {
                collection: entry.collection.clone(),
                expression: entry.expression.clone(),
                options: entry.options.clone(),
                ids: entry.ids.clone(),
                extra: entry.extra.clone(),
            })
            .collect();
        let shape = BundleShape {
            collections: st.tree.root().clone(),
            contexts,
            queries,
            refs: st.refs.clone(),
            ref_lists: st.ref_lists.clone(),
            fns: st.fns.clone(),
            filters: st.filters.clone(),
        };
        serde_json::to_value(&shape).unwrap_or(Value::Null)
    }

    /// Replace all state from a snapshot produced by [`bundle`](Model::bundle).
    ///
    /// Validation happens before any state is touched, so a corrupt
    /// snapshot leaves the model unchanged. After restore, store
    /// subscriptions are re-initiated for every item with a positive
    /// subscribe count.
    pub fn unbundle(&self, snapshot: Value) -> Result<(), ModelError> {
        let shape: BundleShape = serde_json::from_value(snapshot)
            .map_err(|err| ModelError::CorruptBundle(err.to_string()))?;
        if !shape.collections.is_object() {
            return Err(ModelError::CorruptBundle(
                "collections must be an object".into(),
            ));
        }

        // Resolve every referenced item key up front; unknown or malformed
        // keys fail the whole restore.
        let queries_by_key: BTreeMap<String, &QueryShape> = shape
            .queries
            .iter()
            .map(|q| {
                (
                    format!(
                        "query:{}:{}",
                        q.collection,
                        stable_hash(&q.expression, &q.options)
                    ),
                    q,
                )
            })
            .collect();
        let query_kinds: BTreeMap<String, ItemKind> = queries_by_key
            .iter()
            .map(|(key, q)| {
                (
                    key.clone(),
                    ItemKind::Query {
                        collection: q.collection.clone(),
                        expression: q.expression.clone(),
                        options: q.options.clone(),
                    },
                )
            })
            .collect();
        let mut counts: BTreeMap<String, RestoredCounts> = BTreeMap::new();
        for ctx in shape.contexts.values() {
            for (key, n) in &ctx.fetched {
                counts.entry(key.clone()).or_default().fetched += n;
            }
            for (key, n) in &ctx.subscribed {
                counts.entry(key.clone()).or_default().subscribed += n;
            }
        }
        let items = restore_items(&counts, &query_kinds)?;

        let old_subs = {
            let mut st = self.root.state.borrow_mut();
            st.tree.replace_root(shape.collections)?;
            st.contexts = shape
                .contexts
                .into_iter()
                .map(|(name, ctx)| {
                    (
                        name,
                        crate::load::ContextCounts {
                            fetched: ctx.fetched,
                            subscribed: ctx.subscribed,
                        },
                    )
                })
                .collect();
            st.queries = queries_by_key
                .iter()
                .map(|(key, q)| {
                    (
                        key.clone(),
                        QueryState {
                            collection: q.collection.clone(),
                            expression: q.expression.clone(),
                            options: q.options.clone(),
                            ids: q.ids.clone(),
                            extra: q.extra.clone(),
                        },
                    )
                })
                .collect();
            st.refs = shape.refs;
            st.ref_lists = shape.ref_lists;
            st.fns = shape.fns;
            st.filters = shape.filters;
            std::mem::replace(&mut st.items, items)
        };
        // Drop subscriptions belonging to the replaced state.
        for (_, item) in old_subs {
            item.drop_store_sub(&*self.root.store);
        }
        resubscribe_all(&self.root);
        Ok(())
    }
}
