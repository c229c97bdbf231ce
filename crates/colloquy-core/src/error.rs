use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An instruction failed while the engine was dispatching it.
///
/// Processing errors never escape a turn. The engine rewinds the session
/// queue and hands this record to the registered error handler.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Error processing instruction '{instruction}' at {flow_name}/{node_name} (bot {bot_id}): {message}")]
pub struct ProcessingError {
    /// Bot the session belongs to
    pub bot_id: String,
    /// Flow the session was in
    pub flow_name: String,
    /// Node the session was in
    pub node_name: String,
    /// Text of the failing instruction
    pub instruction: String,
    /// Underlying error message
    pub message: String,
}

/// Core error type for the Colloquy runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Flow definition not found
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Node not found inside a flow
    #[error("Node not found: {node} (flow {flow})")]
    NodeNotFound {
        /// Flow that was searched
        flow: String,
        /// Missing node name
        node: String,
    },

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Destination token could not be resolved
    #[error("Navigation error: {0}")]
    NavigationError(String),

    /// Flow is locked by another editor
    #[error("Mutex error: {0}")]
    MutexError(String),

    /// Instruction dispatch failed
    #[error(transparent)]
    ProcessingError(ProcessingError),

    /// The same node was visited too many times in one turn
    #[error("Infinite loop detected: {0}")]
    InfiniteLoopError(String),

    /// No timeout node could be resolved for a session
    #[error("Timeout node not found: {0}")]
    TimeoutNodeNotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    IOError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Expression evaluation error
    #[error("Expression evaluation error: {0}")]
    ExpressionError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Shorthand for a missing node
    pub fn node_not_found(flow: impl Into<String>, node: impl Into<String>) -> Self {
        CoreError::NodeNotFound {
            flow: flow.into(),
            node: node.into(),
        }
    }
}

impl From<ProcessingError> for CoreError {
    fn from(err: ProcessingError) -> Self {
        CoreError::ProcessingError(err)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::IOError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
