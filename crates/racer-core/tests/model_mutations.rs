use racer_core::{EventKind, MemoryDocStore, Model};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn new_model() -> (Rc<MemoryDocStore>, Model) {
    let store = Rc::new(MemoryDocStore::new());
    let model = Model::new(store.clone());
    (store, model)
}

fn change_counter(model: &Model, path: &str) -> Rc<RefCell<usize>> {
    let counter = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&counter);
    model.on(EventKind::Change, path, move |_| {
        *sink.borrow_mut() += 1;
    });
    counter
}

#[test]
fn scalar_set_and_get() {
    let (_store, root) = new_model();
    root.set("a.b", json!(1)).expect("set must succeed");
    assert_eq!(root.get("a.b"), Some(json!(1)));
    assert_eq!(root.get("a"), Some(json!({"b": 1})));
}

#[test]
fn set_returns_previous_value() {
    let (_store, root) = new_model();
    assert_eq!(root.set("a.b", json!(1)).expect("set must succeed"), None);
    assert_eq!(
        root.set("a.b", json!(2)).expect("set must succeed"),
        Some(json!(1))
    );
}

#[test]
fn push_on_absent_path_creates_the_array() {
    let (_store, root) = new_model();
    let len = root
        .at("x")
        .push("xs", json!({"t": 1}))
        .expect("push must succeed");
    assert_eq!(len, 1);
    assert_eq!(root.get("x.xs"), Some(json!([{"t": 1}])));
}

#[test]
fn increment_defaults_to_one() {
    let (_store, root) = new_model();
    root.set("n", json!(100)).expect("set must succeed");
    let new = root.at("n").increment(()).expect("increment must succeed");
    assert_eq!(new, 101.0);
    assert_eq!(root.get("n"), Some(json!(101)));
}

#[test]
fn increment_of_missing_value_starts_at_zero() {
    let (_store, root) = new_model();
    let new = root
        .increment_by("counters.hits", 3.0)
        .expect("increment must succeed");
    assert_eq!(new, 3.0);
    assert_eq!(root.get("counters.hits"), Some(json!(3)));
}

#[test]
fn insert_and_remove_keep_order() {
    let (_store, root) = new_model();
    root.set("_page.pages", json!([])).expect("set must succeed");
    let pages = root.at("_page.pages");
    pages.insert((), 0, vec![json!({"t": "3"})]).expect("insert must succeed");
    pages.insert((), 0, vec![json!({"t": "1"})]).expect("insert must succeed");
    pages.insert((), 1, vec![json!({"t": "2"})]).expect("insert must succeed");
    assert_eq!(
        root.get("_page.pages"),
        Some(json!([{"t": "1"}, {"t": "2"}, {"t": "3"}]))
    );

    let removed = pages.remove((), 1, 1).expect("remove must succeed");
    assert_eq!(removed, vec![json!({"t": "2"})]);
    assert_eq!(root.get("_page.pages"), Some(json!([{"t": "1"}, {"t": "3"}])));
}

#[test]
fn push_insert_remove_length_law() {
    let (_store, root) = new_model();
    let items = root.at("_page.items");
    assert_eq!(items.push((), json!("a")).expect("push must succeed"), 1);
    assert_eq!(items.push((), json!("b")).expect("push must succeed"), 2);
    assert_eq!(
        items
            .insert((), 1, vec![json!("c"), json!("d")])
            .expect("insert must succeed"),
        4
    );
    let removed = items.remove((), 1, 2).expect("remove must succeed");
    assert_eq!(removed, vec![json!("c"), json!("d")]);
    assert_eq!(root.get("_page.items"), Some(json!(["a", "b"])));
}

#[test]
fn remove_past_the_end_clamps() {
    let (_store, root) = new_model();
    root.set("_page.xs", json!([1, 2, 3])).expect("set must succeed");
    let removed = root.remove("_page.xs", 2, 10).expect("remove must succeed");
    assert_eq!(removed, vec![json!(3)]);
    let removed = root.remove("_page.xs", 5, 1).expect("remove must succeed");
    assert!(removed.is_empty());
}

#[test]
fn set_diff_skips_equal_writes() {
    let (_store, root) = new_model();
    root.set("_page.a", json!({"x": 1})).expect("set must succeed");
    let changes = change_counter(&root, "_page.a");

    let previous = root
        .set_diff("_page.a", json!({"x": 1}))
        .expect("set_diff must succeed");
    assert_eq!(previous, Some(json!({"x": 1})));
    assert_eq!(*changes.borrow(), 0);

    let previous = root
        .set_diff_deep("_page.a", json!({"x": 1}))
        .expect("set_diff_deep must succeed");
    assert_eq!(previous, Some(json!({"x": 1})));
    assert_eq!(*changes.borrow(), 0);

    let previous = root
        .set_diff("_page.a", json!({"x": 2}))
        .expect("set_diff must succeed");
    assert_eq!(previous, Some(json!({"x": 1})));
    assert_eq!(*changes.borrow(), 1);
    assert_eq!(root.get("_page.a"), Some(json!({"x": 2})));
}

#[test]
fn set_null_only_fills_gaps() {
    let (_store, root) = new_model();
    assert_eq!(
        root.set_null("_page.color", json!("green"))
            .expect("set_null must succeed"),
        None
    );
    assert_eq!(root.get("_page.color"), Some(json!("green")));

    // Present non-null: returns the existing value, writes nothing.
    assert_eq!(
        root.set_null("_page.color", json!("red"))
            .expect("set_null must succeed"),
        Some(json!("green"))
    );
    assert_eq!(root.get("_page.color"), Some(json!("green")));

    root.set("_page.color", Value::Null).expect("set must succeed");
    root.set_null("_page.color", json!("blue"))
        .expect("set_null must succeed");
    assert_eq!(root.get("_page.color"), Some(json!("blue")));
}

#[test]
fn del_returns_previous_and_skips_absent() {
    let (_store, root) = new_model();
    root.set("_page.a", json!({"x": 1})).expect("set must succeed");
    let changes = change_counter(&root, "_page.a");

    assert_eq!(
        root.del("_page.a").expect("del must succeed"),
        Some(json!({"x": 1}))
    );
    assert_eq!(*changes.borrow(), 1);
    assert_eq!(root.get("_page.a"), None);

    assert_eq!(root.del("_page.a").expect("del must succeed"), None);
    assert_eq!(*changes.borrow(), 1);
}

#[test]
fn add_assigns_and_returns_an_id() {
    let (store, root) = new_model();
    let id = root
        .add("books", json!({"title": "Moby-Dick"}))
        .expect("add must succeed");
    assert_eq!(id.len(), 36);

    let doc = root.get(format!("books.{id}")).expect("doc must be present");
    assert_eq!(doc["title"], json!("Moby-Dick"));
    assert_eq!(doc["id"], json!(id.clone()));

    store.step();
    assert_eq!(store.doc("books", &id), Some(doc));
}

#[test]
fn add_keeps_a_caller_provided_id() {
    let (_store, root) = new_model();
    let id = root
        .add("books", json!({"id": "b1", "title": "Ulysses"}))
        .expect("add must succeed");
    assert_eq!(id, "b1");
    assert_eq!(
        root.get("books.b1"),
        Some(json!({"id": "b1", "title": "Ulysses"}))
    );
}

#[test]
fn add_rejects_non_objects() {
    let (_store, root) = new_model();
    assert!(root.add("books", json!(42)).is_err());
}

#[test]
fn move_item_shifts_and_reports() {
    let (_store, root) = new_model();
    root.set("_page.xs", json!(["a", "b", "c"])).expect("set must succeed");
    let moved = root.move_item("_page.xs", 0, 2).expect("move must succeed");
    assert_eq!(moved, vec![json!("a")]);
    assert_eq!(root.get("_page.xs"), Some(json!(["b", "c", "a"])));
}

#[test]
fn writes_through_scalars_are_rejected() {
    let (_store, root) = new_model();
    root.set("_page.n", json!(5)).expect("set must succeed");
    assert!(root.set("_page.n.deep", json!(1)).is_err());
    assert!(root.push("_page.n", json!(1)).is_err());
    assert!(root.increment("_page.n.deep").is_err());
}

#[test]
fn get_copy_and_deep_copy_detach_from_the_tree() {
    let (_store, root) = new_model();
    root.set("_page.a", json!({"xs": [1, 2]})).expect("set must succeed");
    let copy = root.get_copy("_page.a").expect("copy must be present");
    let deep = root.get_deep_copy("_page.a").expect("copy must be present");
    root.set("_page.a.xs.0", json!(99)).expect("set must succeed");
    assert_eq!(copy["xs"], json!([1, 2]));
    assert_eq!(deep["xs"], json!([1, 2]));
}

#[test]
fn with_value_reads_without_copying() {
    let (_store, root) = new_model();
    root.set("_page.a", json!({"x": 1})).expect("set must succeed");
    let x = root.with_value("_page.a.x", |v| v.cloned());
    assert_eq!(x, Some(json!(1)));
    assert_eq!(root.with_value("_page.missing", |v| v.is_some()), false);
}

#[test]
fn root_accessors_are_root_only() {
    let (_store, root) = new_model();
    root.set("_page.a", json!(1)).expect("set must succeed");
    root.set("books.b1.title", json!("t")).expect("set must succeed");
    assert_eq!(
        root.collections().expect("root must expose collections"),
        vec!["_page".to_string(), "books".to_string()]
    );
    assert!(root.at("books").collections().is_none());
    assert!(root.at("books").data().is_none());
    let data = root.data().expect("root must expose data");
    assert_eq!(data["books"]["b1"]["title"], json!("t"));
}

#[test]
fn handle_navigation_resolves_paths() {
    let (_store, root) = new_model();
    let h = root.at("a.b").at("c");
    assert_eq!(h.path(()), "a.b.c");
    assert_eq!(h.leaf(), "c");
    assert_eq!(h.parent().path(()), "a.b");
    assert_eq!(h.parent_levels(2).path(()), "a");
    assert_eq!(h.scope("x.y").path(()), "x.y");
    assert_eq!(root.at(&h).path(()), "a.b.c");
    assert_eq!(root.path("items.3"), "items.3");
}

// Deterministic value generator in the style of a seeded fuzz matrix.
fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn random_value(state: &mut u64, depth: u32) -> Value {
    match xorshift(state) % if depth == 0 { 4 } else { 6 } {
        0 => Value::Null,
        1 => json!(xorshift(state) % 2 == 0),
        2 => json!(xorshift(state) % 1000),
        3 => json!(format!("s{}", xorshift(state) % 100)),
        4 => {
            let len = (xorshift(state) % 4) as usize;
            Value::Array((0..len).map(|_| random_value(state, depth - 1)).collect())
        }
        _ => {
            let len = (xorshift(state) % 4) as usize;
            let mut map = serde_json::Map::new();
            for i in 0..len {
                map.insert(format!("k{i}"), random_value(state, depth - 1));
            }
            Value::Object(map)
        }
    }
}

#[test]
fn get_after_set_round_trips_for_seeded_values() {
    let (_store, root) = new_model();
    for seed in [0x5eed_c0de_u64, 1, 0xff, 0xc0ffee, 0x0123_4567_89ab_cdef] {
        let mut state = seed;
        for i in 0..32 {
            let value = random_value(&mut state, 3);
            let path = format!("_page.items.v{i}");
            root.set(path.as_str(), value.clone()).expect("set must succeed");
            assert_eq!(
                root.get_deep_copy(path.as_str()),
                Some(value),
                "round trip mismatch seed={seed} i={i}"
            );
        }
    }
}
