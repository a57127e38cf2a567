use thiserror::Error;

/// Errors produced by type operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid source id {value:?}: {reason}")]
    InvalidSourceId { value: String, reason: &'static str },

    #[error("invalid original id: {0}")]
    InvalidOriginalId(&'static str),
}
