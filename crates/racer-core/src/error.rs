use thiserror::Error;

/// Errors surfaced by the model engine.
///
/// Synchronous API misuse returns these directly; failures of asynchronous
/// work (loads, op submission) are delivered to the operation's callback,
/// falling back to the model's error sink when no callback was given.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("invalid path segment: {0}")]
    InvalidPath(String),
    #[error("cannot write through non-container value at {0}")]
    PathTypeMismatch(String),
    #[error("array index {index} out of range (len {len}) at {path}")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },
    #[error("value at {0} is not an array")]
    NotAnArray(String),
    #[error("value at {0} is not a number")]
    NotANumber(String),
    #[error("value is not an object: {0}")]
    NotAnObject(String),
    #[error("path {0} does not address a document")]
    MissingDoc(String),
    #[error("load cancelled: {0}")]
    Cancelled(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("corrupt bundle: {0}")]
    CorruptBundle(String),
}
