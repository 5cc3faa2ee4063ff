use racer_core::{LoadTarget, MemoryDocStore, Model, ModelError};
use serde_json::json;
use std::rc::Rc;

fn ok_cb() -> impl FnOnce(Result<(), ModelError>) + 'static {
    |result| result.expect("load must succeed")
}

#[test]
fn bundle_round_trips_tree_contexts_and_queries() {
    let store = Rc::new(MemoryDocStore::new());
    store.seed_doc("books", "b1", json!({"title": "t"}));
    store.seed_doc("users", "u1", json!({"age": 3}));

    let source = Model::new(store.clone());
    source.set("_page.color", json!("green")).expect("set must succeed");
    source.subscribe([LoadTarget::doc("books", "b1")], ok_cb());
    let query = source.query("users", json!({"age": 3}), json!({}));
    query.fetch(ok_cb());
    store.step();

    let snapshot = source.bundle();
    assert!(snapshot.get("collections").is_some());
    assert!(snapshot.get("refLists").is_some());

    let restored = Model::new(store.clone());
    restored.unbundle(snapshot).expect("unbundle must succeed");
    store.step();

    assert_eq!(restored.get("_page.color"), Some(json!("green")));
    assert_eq!(restored.get("books.b1.title"), Some(json!("t")));
    let restored_query = restored.query("users", json!({"age": 3}), json!({}));
    assert_eq!(restored_query.get_ids(), vec!["u1"]);
}

#[test]
fn restored_subscriptions_keep_receiving_ops() {
    let store = Rc::new(MemoryDocStore::new());
    store.seed_doc("books", "b1", json!({"title": "t"}));

    let source = Model::new(store.clone());
    source.subscribe([LoadTarget::doc("books", "b1")], ok_cb());
    store.step();

    let restored = Model::new(store.clone());
    restored.unbundle(source.bundle()).expect("unbundle must succeed");
    store.step();

    let writer = Model::new(store.clone());
    writer.set("books.b1.title", json!("u")).expect("set must succeed");
    store.step();

    assert_eq!(
        restored.get("books.b1.title"),
        Some(json!("u")),
        "the restored model re-subscribed"
    );
}

#[test]
fn bundles_survive_a_serialization_boundary() {
    let store = Rc::new(MemoryDocStore::new());
    let source = Model::new(store.clone());
    source.set("_page.nested", json!({"xs": [1, 2, {"k": "v"}]}))
        .expect("set must succeed");

    let wire = serde_json::to_string(&source.bundle()).expect("bundle must serialize");
    let snapshot = serde_json::from_str(&wire).expect("bundle must deserialize");

    let restored = Model::new(store.clone());
    restored.unbundle(snapshot).expect("unbundle must succeed");
    assert_eq!(
        restored.get("_page.nested"),
        Some(json!({"xs": [1, 2, {"k": "v"}]}))
    );
}

#[test]
fn corrupt_bundles_are_rejected_and_leave_state_untouched() {
    let store = Rc::new(MemoryDocStore::new());
    let model = Model::new(store.clone());
    model.set("_page.keep", json!(1)).expect("set must succeed");

    for bad in [
        json!([]),
        json!({"collections": {}}),
        json!({
            "collections": 5,
            "contexts": {},
            "queries": [],
            "refs": {},
            "refLists": {},
            "fns": {},
            "filters": {}
        }),
        json!({
            "collections": {},
            "contexts": {"root": {"fetched": {"bogus-key": 1}, "subscribed": {}}},
            "queries": [],
            "refs": {},
            "refLists": {},
            "fns": {},
            "filters": {}
        }),
        json!({
            "collections": {},
            "contexts": {"root": {"fetched": {}, "subscribed": {"query:users:unknown": 1}}},
            "queries": [],
            "refs": {},
            "refLists": {},
            "fns": {},
            "filters": {}
        }),
    ] {
        let err = model.unbundle(bad).expect_err("corrupt bundle must fail");
        assert!(matches!(err, ModelError::CorruptBundle(_)));
        assert_eq!(
            model.get("_page.keep"),
            Some(json!(1)),
            "failed restores leave state alone"
        );
    }
}

#[test]
fn derived_view_slots_round_trip_opaquely() {
    let store = Rc::new(MemoryDocStore::new());
    let model = Model::new(store.clone());
    let mut snapshot = model.bundle();
    snapshot["refs"] = json!({"_page.active": "books.b1"});
    snapshot["fns"] = json!({"sum": ["a", "b"]});

    let restored = Model::new(store.clone());
    restored.unbundle(snapshot).expect("unbundle must succeed");
    let again = restored.bundle();
    assert_eq!(again["refs"], json!({"_page.active": "books.b1"}));
    assert_eq!(again["fns"], json!({"sum": ["a", "b"]}));
}
