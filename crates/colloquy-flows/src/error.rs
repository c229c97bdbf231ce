//! Error types for the flow store

use colloquy_core::CoreError;
use thiserror::Error;

/// Errors that can occur during flow store operations
#[derive(Error, Debug)]
pub enum FlowStoreError {
    /// Flow file not found
    #[error("Flow not found: {0}")]
    NotFound(String),

    /// A flow with this name already exists
    #[error("Flow already exists: {0}")]
    AlreadyExists(String),

    /// Flow file does not describe a valid flow
    #[error("Invalid flow {file}: {reason}")]
    InvalidFlow {
        /// Offending file
        file: String,
        /// What is wrong with it
        reason: String,
    },

    /// Flow is being edited by someone else
    #[error("Flow {flow} is currently locked by {owner}")]
    Locked {
        /// Locked flow
        flow: String,
        /// Editor holding the lock
        owner: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Storage backend error
    #[error("Storage backend error: {0}")]
    BackendError(#[from] CoreError),
}

/// Result type for flow store operations
pub type FlowStoreResult<T> = Result<T, FlowStoreError>;

impl From<FlowStoreError> for CoreError {
    fn from(err: FlowStoreError) -> Self {
        match err {
            FlowStoreError::NotFound(name) => CoreError::FlowNotFound(name),
            FlowStoreError::Locked { .. } => CoreError::MutexError(err.to_string()),
            FlowStoreError::AlreadyExists(_) | FlowStoreError::InvalidFlow { .. } => {
                CoreError::ValidationError(err.to_string())
            }
            FlowStoreError::SerializationError(e) => CoreError::SerializationError(e.to_string()),
            FlowStoreError::BackendError(e) => e,
        }
    }
}
