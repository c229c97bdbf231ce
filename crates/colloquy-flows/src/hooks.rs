//! Notifications around flow edits: hooks for modules that keep derived
//! data, and the change record broadcast to realtime listeners.

use async_trait::async_trait;
use colloquy_core::{BotId, FlowDefinition};
use serde::{Deserialize, Serialize};

/// Called after flows are edited
#[async_trait]
pub trait FlowHooks: Send + Sync {
    /// An existing flow was saved
    async fn on_flow_changed(&self, _bot_id: &BotId, _flow: &FlowDefinition) {}

    /// A flow was renamed
    async fn on_flow_renamed(&self, _bot_id: &BotId, _from: &str, _to: &str) {}

    /// A flow was deleted
    async fn on_flow_deleted(&self, _bot_id: &BotId, _name: &str) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl FlowHooks for NoopHooks {}

/// Kind of edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationKind {
    /// New flow
    Create,
    /// Existing flow saved
    Update,
    /// Flow deleted
    Delete,
    /// Flow renamed
    Rename,
}

/// A flow edit, as seen by realtime listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowModification {
    /// Bot owning the flow
    pub bot_id: BotId,
    /// Flow name before the edit
    pub name: String,
    /// What happened
    pub modification: ModificationKind,
    /// Editor who made the change
    pub editor: String,
    /// New name, for renames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    /// Saved flow with its lock, for creates and updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<FlowDefinition>,
}

/// A flow or layout file changed outside the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowInvalidation {
    /// Bot owning the file
    pub bot_id: BotId,
    /// File name relative to the flow directory
    pub file: String,
}
