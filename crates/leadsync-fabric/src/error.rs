use std::io;

/// Errors produced by the event fabric.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// I/O error during WAL or file operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The fabric has been shut down and cannot accept events.
    #[error("fabric is shut down")]
    Shutdown,
}

/// Convenience alias used throughout the fabric crate.
pub type Result<T> = std::result::Result<T, FabricError>;
