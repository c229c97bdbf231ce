//! Contracts of the systems the engine drives but does not own: content
//! rendering, message delivery, action execution and error reporting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::session::{DialogEvent, DialogState, EventDestination};
use crate::error::ProcessingError;
use crate::CoreError;

/// A message produced by the content renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message type, e.g. `text`
    #[serde(rename = "type")]
    pub message_type: String,
    /// Channel payload
    pub payload: Value,
}

/// Renders content templates into outbound messages
#[async_trait]
pub trait ContentRenderer: Send + Sync {
    /// Render `template_id` with `args` for `destination`
    async fn render(
        &self,
        template_id: &str,
        args: &Value,
        destination: &EventDestination,
    ) -> Result<Vec<OutboundMessage>, CoreError>;
}

/// Sends outbound messages
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    /// Deliver `messages` to `destination`
    async fn deliver(
        &self,
        destination: &EventDestination,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), CoreError>;
}

/// A request to run a named action
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Action name
    pub name: String,
    /// Remote executor, when the action does not run locally
    pub server_id: Option<String>,
    /// Event being processed
    pub event: DialogEvent,
    /// State before the action runs
    pub state: DialogState,
    /// Arguments with templates already resolved
    pub args: Value,
}

/// What an action left behind
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    /// State after the action ran
    pub state: DialogState,
}

/// An action failed inside the runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ActionFailure {
    /// Error type, e.g. `TypeError`
    pub kind: String,
    /// Error message
    pub message: String,
    /// Stack trace, when available
    pub stack: Option<String>,
}

impl ActionFailure {
    /// Failure without a stack trace
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: None,
        }
    }
}

/// Runs actions in an isolated runtime
#[async_trait]
pub trait ActionRuntime: Send + Sync {
    /// Run an action
    async fn run(&self, request: ActionRequest) -> Result<ActionOutcome, ActionFailure>;
}

/// Receives processing errors contained by the engine
#[async_trait]
pub trait ProcessingErrorHandler: Send + Sync {
    /// Called once per contained error
    async fn on_processing_error(&self, error: &ProcessingError);
}

/// Error handler that only logs
#[derive(Debug, Default, Clone)]
pub struct LoggingErrorHandler;

#[async_trait]
impl ProcessingErrorHandler for LoggingErrorHandler {
    async fn on_processing_error(&self, error: &ProcessingError) {
        tracing::error!(
            bot_id = %error.bot_id,
            flow = %error.flow_name,
            node = %error.node_name,
            instruction = %error.instruction,
            "{}",
            error.message
        );
    }
}
