//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while persisting or restoring checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists for the requested identifier
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Backend storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Checkpoint content is structurally invalid or corrupt
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// I/O error from a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
