//! The two comparison predicates behind the diff mutations.
//!
//! `set_diff` asks "is this the same value", `set_diff_deep` asks "is this
//! the same structure". Over an owned JSON tree there is no reference
//! identity to distinguish the two, so both end up structural; they are
//! kept as separate named operators so every call site says which contract
//! it means, and so the scalar fast path stays explicit.

use serde_json::Value;

/// The `set_diff` predicate. Scalars compare by value; containers fall
/// through to [`deep_equal`], which is what identity collapses to once
/// values are owned rather than shared.
pub(crate) fn strict_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            deep_equal(a, b)
        }
        _ => strict_scalar(a, b),
    }
}

/// The `set_diff_deep` predicate: recursive structural equality. Arrays
/// must match element-wise in order; objects must carry the same key set
/// with deep-equal values. Mismatched variants are never equal, so `0`,
/// `null`, `false`, and `""` all stay distinct from one another.
pub(crate) fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len() && left.iter().zip(right).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, x)| right.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        _ => strict_scalar(a, b),
    }
}

fn strict_scalar(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        _ => false,
    }
}
