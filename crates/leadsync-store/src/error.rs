use std::time::Duration;

/// Errors from store bookkeeping (reads, listing, dead-letter persistence).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend is read-only or otherwise refusing writes.
    #[error("store is read-only")]
    ReadOnly,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// How a failed write should be handled by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Infrastructure hiccup; the same write may succeed later.
    Transient,
    /// Retrying the same write cannot succeed.
    Permanent,
}

/// Failure of a canonical upsert.
///
/// Write conflicts are not represented here: concurrent writers to one id
/// are resolved by the store's commit order and never surface as errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The write did not complete within its deadline.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The store could not be reached or is temporarily down.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store is shedding load.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The service is not allowed to write this document.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The document was rejected by the store's schema.
    #[error("schema violation: {0}")]
    Schema(String),
}

impl WriteError {
    /// Classify this error for the retry controller.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout(_) | Self::Unavailable(_) | Self::RateLimited { .. } => {
                FailureClass::Transient
            }
            Self::PermissionDenied(_) | Self::Schema(_) => FailureClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// Server-provided minimum delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
