use std::path::PathBuf;

use leadsync_fabric::{EventKind, FabricError};
use leadsync_store::StoreError;
use leadsync_types::{SourceId, TypeError};
use thiserror::Error;

use crate::retry::AttemptState;

/// Errors raised while building or running pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("illegal sync attempt transition {from:?} -> {to:?}")]
    IllegalTransition { from: AttemptState, to: AttemptState },

    #[error("fabric error: {0}")]
    Fabric(#[from] FabricError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Why a source adapter refused to produce an envelope.
///
/// Every variant is terminal for the delivery: the event is dropped and
/// logged, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Only creation events are synchronized.
    #[error("{0} events are not synchronized")]
    UnsupportedKind(EventKind),

    #[error("event from {actual} delivered to the {expected} adapter")]
    SourceMismatch { expected: SourceId, actual: SourceId },

    #[error("invalid record id: {0}")]
    InvalidRecordId(TypeError),

    #[error("malformed source record: {0}")]
    MalformedBody(String),
}

impl AdapterError {
    /// Structural defects in the delivered record, as opposed to events this
    /// adapter is simply not interested in.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::UnsupportedKind(_))
    }
}
