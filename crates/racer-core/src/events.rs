//! Mutation events and the path-prefix listener index.
//!
//! Listeners are kept in registration order and matched against an event
//! when one path is a prefix of the other, so a coarse listener hears every
//! change below it and a fine listener hears container swaps above it.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::path::{may_impact, Segment};

/// The kind of a mutation event. `All` is only valid on listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Change,
    Insert,
    Remove,
    Move,
    Load,
    Unload,
    All,
}

/// Payload fanned out for every mutation.
///
/// `value` and `previous` depend on the kind: for `Insert`/`Remove` the
/// path includes the start index and `value` is the array of items; for
/// `Move`, `value` is the destination index.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub kind: EventKind,
    pub path: Vec<Segment>,
    pub value: Option<Value>,
    pub previous: Option<Value>,
    /// Caller metadata carried by the emitting handle's `pass` flag.
    pub passed: Option<Value>,
    pub silent: bool,
    pub event_context: Option<String>,
}

pub type ListenerId = u64;

pub(crate) type Handler = Rc<RefCell<dyn FnMut(&MutationEvent)>>;

struct ListenerEntry {
    id: ListenerId,
    kind: EventKind,
    path: Vec<Segment>,
    event_context: Option<String>,
    handler: Handler,
}

/// Registration-ordered listener table plus the pending-event queue used to
/// keep fan-out non-re-entrant.
pub(crate) struct EventBus {
    next_id: ListenerId,
    listeners: Vec<ListenerEntry>,
    pub(crate) queue: VecDeque<MutationEvent>,
    pub(crate) draining: bool,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            listeners: Vec::new(),
            queue: VecDeque::new(),
            draining: false,
        }
    }

    pub(crate) fn add_listener(
        &mut self,
        kind: EventKind,
        path: Vec<Segment>,
        event_context: Option<String>,
        handler: Handler,
    ) -> ListenerId {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.listeners.push(ListenerEntry {
            id,
            kind,
            path,
            event_context,
            handler,
        });
        id
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|entry| entry.id != id);
        self.listeners.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Handlers matching `event`, in registration order.
    pub(crate) fn matching(&self, event: &MutationEvent) -> Vec<Handler> {
        self.listeners
            .iter()
            .filter(|entry| {
                if entry.kind != EventKind::All && entry.kind != event.kind {
                    return false;
                }
                if !may_impact(&entry.path, &event.path) {
                    return false;
                }
                if event.silent {
                    // Silent emissions reach only listeners registered under
                    // the same explicit event context.
                    return entry.event_context.is_some()
                        && entry.event_context == event.event_context;
                }
                true
            })
            .map(|entry| Rc::clone(&entry.handler))
            .collect()
    }
}
