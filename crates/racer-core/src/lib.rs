//! Core engine for racer-rs: a synchronized, path-addressed data model.
//!
//! The tree holds JSON documents by collection and id; scoped handles issue
//! mutations through one pipeline that updates the tree, fans out impact
//! events to prefix-matched listeners, and forwards JSON0 ops to a
//! pluggable [`DocStore`](docstore::DocStore) backend. Loading is
//! reference-counted per named context.
//!
//! The engine is single-threaded and cooperative: handles share one root
//! through an `Rc`, all tree and listener work is synchronous, and backend
//! deliveries arrive between emissions, never inside one.

pub mod bundle;
pub mod docstore;
pub mod error;
pub mod events;
pub mod handle;
pub mod load;
pub mod memory_store;
pub mod model;
pub mod op;
pub mod path;
pub mod query;
pub mod tree;

mod equality;

use rand::Rng;

pub use docstore::{DocStore, QueryResults, SubscriptionId};
pub use error::ModelError;
pub use events::{EventKind, ListenerId, MutationEvent};
pub use load::LoadTarget;
pub use memory_store::MemoryDocStore;
pub use model::{Model, ModelOptions};
pub use op::{DocOp, OpEnvelope};
pub use path::Segment;
pub use query::Query;

/// Generates the session id a model stamps onto its submitted ops.
pub fn generate_sid() -> u64 {
    let mut rng = rand::thread_rng();
    rng.gen_range(1..u64::MAX)
}

/// Generates a 128-bit v4-style identifier: lowercase hex with standard
/// hyphenation.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
