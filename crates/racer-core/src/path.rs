//! Path algebra for the document tree.
//!
//! Addresses are canonical segment sequences; the dotted-string form is a
//! compatibility rendering. Integer-looking string segments are coerced to
//! indices at parse time, so `"items.0"` and `[Key("items"), Index(0)]`
//! address the same node.

use serde_json::Value;
use std::fmt;

use crate::error::ModelError;

/// One step of a canonical path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// Renders the segment the way the dotted string form spells it.
    pub fn as_str(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        coerce(s)
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        coerce(&s)
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i)
    }
}

/// Coerce one string token: `^[0-9]+$` becomes an index, everything else a
/// key. Digit runs too large for `usize` stay keys.
fn coerce(token: &str) -> Segment {
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = token.parse::<usize>() {
            return Segment::Index(i);
        }
    }
    Segment::Key(token.to_string())
}

/// Parse a dotted path string into canonical segments.
///
/// The empty string is the empty (root) path. No `..` or leading-dot
/// resolution takes place; every token between dots is a segment.
pub fn parse_path(input: &str) -> Vec<Segment> {
    if input.is_empty() {
        return Vec::new();
    }
    input.split('.').map(coerce).collect()
}

/// Render canonical segments back into the dotted string form.
pub fn path_to_string(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&seg.as_str());
    }
    out
}

/// Element-wise concatenation of a base path and a subpath.
pub fn join(base: &[Segment], sub: &[Segment]) -> Vec<Segment> {
    let mut out = Vec::with_capacity(base.len() + sub.len());
    out.extend_from_slice(base);
    out.extend_from_slice(sub);
    out
}

/// Returns `true` iff `a` is an element-wise prefix of `b`.
pub fn prefix_of(a: &[Segment], b: &[Segment]) -> bool {
    a.len() <= b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Whether a mutation at `event` can affect a listener watching `listener`.
///
/// True iff one path is a prefix of the other: a coarser listener sees
/// changes below it, and a finer listener sees a container swap above it.
pub fn may_impact(listener: &[Segment], event: &[Segment]) -> bool {
    prefix_of(listener, event) || prefix_of(event, listener)
}

/// Decode a JSON array of path elements into canonical segments.
///
/// Accepts string and non-negative integer elements (the wire form of
/// JSON0 `p` fields). Anything else is an [`ModelError::InvalidPath`].
pub fn segments_from_value(value: &Value) -> Result<Vec<Segment>, ModelError> {
    let arr = value
        .as_array()
        .ok_or_else(|| ModelError::InvalidPath(value.to_string()))?;
    let mut out = Vec::with_capacity(arr.len());
    for elem in arr {
        match elem {
            Value::String(s) => out.push(coerce(s)),
            Value::Number(n) => match n.as_u64() {
                Some(i) => out.push(Segment::Index(i as usize)),
                None => return Err(ModelError::InvalidPath(elem.to_string())),
            },
            _ => return Err(ModelError::InvalidPath(elem.to_string())),
        }
    }
    Ok(out)
}

/// Encode canonical segments as a JSON array (the JSON0 `p` field shape).
pub fn segments_to_value(segments: &[Segment]) -> Value {
    Value::Array(
        segments
            .iter()
            .map(|seg| match seg {
                Segment::Key(k) => Value::String(k.clone()),
                Segment::Index(i) => Value::from(*i),
            })
            .collect(),
    )
}

/// Subpath arguments accepted by handle methods.
///
/// `()` means "this handle's own path"; strings parse as dotted paths;
/// a number is a single index segment; segment slices are used as-is;
/// a handle contributes its absolute path (see the impl in `model`).
pub trait AsSubpath {
    fn to_segments(&self) -> Vec<Segment>;
}

impl AsSubpath for () {
    fn to_segments(&self) -> Vec<Segment> {
        Vec::new()
    }
}

impl AsSubpath for &str {
    fn to_segments(&self) -> Vec<Segment> {
        parse_path(self)
    }
}

impl AsSubpath for String {
    fn to_segments(&self) -> Vec<Segment> {
        parse_path(self)
    }
}

impl AsSubpath for usize {
    fn to_segments(&self) -> Vec<Segment> {
        vec![Segment::Index(*self)]
    }
}

impl AsSubpath for &[Segment] {
    fn to_segments(&self) -> Vec<Segment> {
        self.to_vec()
    }
}

impl AsSubpath for Vec<Segment> {
    fn to_segments(&self) -> Vec<Segment> {
        self.clone()
    }
}

impl AsSubpath for &String {
    fn to_segments(&self) -> Vec<Segment> {
        parse_path(self)
    }
}

impl AsSubpath for &Vec<Segment> {
    fn to_segments(&self) -> Vec<Segment> {
        (**self).clone()
    }
}
