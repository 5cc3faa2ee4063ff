use racer_core::{EventKind, MemoryDocStore, Model};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn new_model() -> Model {
    Model::new(Rc::new(MemoryDocStore::new()))
}

fn recorder(model: &Model, kind: EventKind, path: &str) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    model.on(kind, path, move |event| {
        sink.borrow_mut()
            .push(racer_core::path::path_to_string(&event.path));
    });
    log
}

#[test]
fn listeners_fire_iff_one_path_prefixes_the_other() {
    let root = new_model();
    let coarse = recorder(&root, EventKind::Change, "_page.a");
    let fine = recorder(&root, EventKind::Change, "_page.a.b.c");
    let sibling = recorder(&root, EventKind::Change, "_page.z");

    root.set("_page.a.b", json!({"c": 1})).expect("set must succeed");

    assert_eq!(coarse.borrow().len(), 1, "coarse listener sees sub-change");
    assert_eq!(fine.borrow().len(), 1, "fine listener sees container swap");
    assert_eq!(sibling.borrow().len(), 0, "sibling is unaffected");
}

#[test]
fn handlers_run_in_registration_order() {
    let root = new_model();
    let log = Rc::new(RefCell::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let sink = Rc::clone(&log);
        root.on(EventKind::Change, "_page.x", move |_| {
            sink.borrow_mut().push(name);
        });
    }
    root.set("_page.x", json!(1)).expect("set must succeed");
    assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
}

#[test]
fn handler_mutations_deliver_after_the_current_emission() {
    let root = new_model();
    let handle = root.clone();
    // First listener reacts to `a` by writing `b`.
    root.on(EventKind::Change, "_page.a", move |_| {
        handle.set("_page.b", json!(2)).expect("set must succeed");
    });
    let log = recorder(&root, EventKind::Change, "_page");

    root.set("_page.a", json!(1)).expect("set must succeed");

    // The second listener saw `a` first even though it registered after the
    // mutating listener; `b` arrived as a separate, later emission.
    assert_eq!(*log.borrow(), vec!["_page.a", "_page.b"]);
    assert_eq!(root.get("_page.b"), Some(json!(2)));
}

#[test]
fn event_payload_carries_value_and_previous() {
    let root = new_model();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    root.on(EventKind::Change, "_page.n", move |event| {
        sink.borrow_mut()
            .push((event.value.clone(), event.previous.clone()));
    });
    root.set("_page.n", json!(1)).expect("set must succeed");
    root.set("_page.n", json!(2)).expect("set must succeed");
    root.del("_page.n").expect("del must succeed");
    assert_eq!(
        *seen.borrow(),
        vec![
            (Some(json!(1)), None),
            (Some(json!(2)), Some(json!(1))),
            (None, Some(json!(2))),
        ]
    );
}

#[test]
fn insert_and_remove_events_carry_items_at_the_start_index() {
    let root = new_model();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    root.on(EventKind::All, "_page.xs", move |event| {
        sink.borrow_mut().push((
            event.kind,
            racer_core::path::path_to_string(&event.path),
            event.value.clone(),
        ));
    });

    root.push("_page.xs", json!("a")).expect("push must succeed");
    root.insert("_page.xs", 0, vec![json!("b"), json!("c")])
        .expect("insert must succeed");
    root.remove("_page.xs", 1, 2).expect("remove must succeed");

    assert_eq!(
        *seen.borrow(),
        vec![
            (EventKind::Insert, "_page.xs.0".to_string(), Some(json!(["a"]))),
            (
                EventKind::Insert,
                "_page.xs.0".to_string(),
                Some(json!(["b", "c"]))
            ),
            (
                EventKind::Remove,
                "_page.xs.1".to_string(),
                Some(json!(["c", "a"]))
            ),
        ]
    );
}

#[test]
fn silent_handles_suppress_events() {
    let root = new_model();
    let log = recorder(&root, EventKind::Change, "_page");
    root.silent().set("_page.a", json!(1)).expect("set must succeed");
    assert!(log.borrow().is_empty());
    assert_eq!(root.get("_page.a"), Some(json!(1)));
}

#[test]
fn silent_events_still_reach_their_event_context() {
    let root = new_model();
    let matched = recorder(&root.event_context("sync"), EventKind::Change, "_page");
    let unmatched = recorder(&root, EventKind::Change, "_page");

    root.silent()
        .event_context("sync")
        .set("_page.a", json!(1))
        .expect("set must succeed");

    assert_eq!(matched.borrow().len(), 1);
    assert!(unmatched.borrow().is_empty());
}

#[test]
fn pass_metadata_rides_on_events() {
    let root = new_model();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    root.on(EventKind::Change, "_page.a", move |event| {
        sink.borrow_mut().push(event.passed.clone());
    });
    root.pass(json!({"source": "import"}))
        .set("_page.a", json!(1))
        .expect("set must succeed");
    root.set("_page.a", json!(2)).expect("set must succeed");
    assert_eq!(
        *seen.borrow(),
        vec![Some(json!({"source": "import"})), None]
    );
}

#[test]
fn panicking_handlers_report_and_do_not_abort_fanout() {
    let root = new_model();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    root.set_error_sink(move |message| sink.borrow_mut().push(message));

    root.on(EventKind::Change, "_page.a", |_| {
        panic!("listener exploded");
    });
    let log = recorder(&root, EventKind::Change, "_page.a");

    root.set("_page.a", json!(1)).expect("set must succeed");

    assert_eq!(log.borrow().len(), 1, "later listeners still run");
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("listener exploded"));
}

#[test]
fn removed_listeners_stop_firing() {
    let root = new_model();
    let log = Rc::new(RefCell::new(0usize));
    let sink = Rc::clone(&log);
    let id = root.on(EventKind::Change, "_page.a", move |_| {
        *sink.borrow_mut() += 1;
    });
    root.set("_page.a", json!(1)).expect("set must succeed");
    assert!(root.remove_listener(id));
    root.set("_page.a", json!(2)).expect("set must succeed");
    assert_eq!(*log.borrow(), 1);
}
