use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Unique identifier for a dialog session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

/// Identifier of the bot a flow or session belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BotId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inbound event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogEvent {
    /// Event id
    pub id: String,
    /// Bot receiving the event
    pub bot_id: BotId,
    /// Channel the event arrived on
    pub channel: String,
    /// Target (user) on that channel
    pub target: String,
    /// Conversation thread, when the channel has threads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Event type, e.g. `text`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Raw payload
    #[serde(default)]
    pub payload: Value,
    /// NLU output attached upstream
    #[serde(default)]
    pub nlu: Value,
}

impl DialogEvent {
    /// Create a text event with a fresh id
    pub fn text(bot_id: BotId, channel: &str, target: &str, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bot_id,
            channel: channel.to_string(),
            target: target.to_string(),
            thread_id: None,
            event_type: "text".to_string(),
            payload: json!({ "type": "text", "text": text }),
            nlu: Value::Null,
        }
    }

    /// Attach NLU output
    pub fn with_nlu(mut self, nlu: Value) -> Self {
        self.nlu = nlu;
        self
    }

    /// Name of the detected intent, if any
    pub fn intent_name(&self) -> Option<&str> {
        self.nlu.get("intent").and_then(|i| i.get("name")).and_then(Value::as_str)
    }

    /// Where replies to this event go
    pub fn destination(&self) -> EventDestination {
        EventDestination {
            bot_id: self.bot_id.clone(),
            channel: self.channel.clone(),
            target: self.target.clone(),
            thread_id: self.thread_id.clone(),
        }
    }
}

/// Where outbound messages are delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDestination {
    /// Bot sending the messages
    pub bot_id: BotId,
    /// Channel to deliver on
    pub channel: String,
    /// Recipient
    pub target: String,
    /// Thread, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// One entry of the per-turn execution trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Flow name
    pub flow: String,
    /// Node name
    pub node: String,
}

impl StackFrame {
    /// Create a frame
    pub fn new(flow: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            node: node.into(),
        }
    }
}

/// Details of the last failed action, visible to the error flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionErrorRecord {
    /// Error type reported by the runtime
    #[serde(rename = "type")]
    pub kind: String,
    /// Error message
    pub message: String,
    /// Stack trace, when the runtime has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Action that failed
    pub action_name: String,
    /// Arguments the action was called with
    #[serde(default)]
    pub action_args: Value,
}

/// Variable bag visible to actions and conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogState {
    /// Per-user variables
    #[serde(default = "empty_object")]
    pub user: Value,
    /// Per-session variables
    #[serde(default = "empty_object")]
    pub session: Value,
    /// Per-flow scratch variables
    #[serde(default = "empty_object")]
    pub temp: Value,
    /// Bot-wide variables
    #[serde(default = "empty_object")]
    pub bot: Value,
    /// Positions visited during the current turn
    #[serde(default)]
    pub stacktrace: Vec<StackFrame>,
    /// Last action failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ActionErrorRecord>,
}

fn empty_object() -> Value {
    json!({})
}

impl Default for DialogState {
    fn default() -> Self {
        Self {
            user: empty_object(),
            session: empty_object(),
            temp: empty_object(),
            bot: empty_object(),
            stacktrace: Vec::new(),
            last_error: None,
        }
    }
}

impl DialogState {
    /// `{event, user, session, temp, bot}` as seen by actions and templates
    pub fn snapshot(&self, event: &DialogEvent) -> Value {
        json!({
            "event": event,
            "user": self.user,
            "session": self.session,
            "temp": self.temp,
            "bot": self.bot,
        })
    }

    /// `{event, user, session, temp}` as seen by transition conditions
    pub fn condition_scope(&self, event: &DialogEvent) -> Value {
        json!({
            "event": event,
            "user": self.user,
            "session": self.session,
            "temp": self.temp,
        })
    }
}

/// Execution position of a session, persisted between turns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogContext {
    /// Flow currently executing
    pub current_flow: String,
    /// Node currently executing
    pub current_node: String,
    /// Caller flow, or the flow left by the last cross-flow transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_flow: Option<String>,
    /// Caller node, or the node left by the last cross-flow transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_node: Option<String>,
    /// Serialized pending instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Set when the session just returned to the skill-call node that invoked a subflow
    #[serde(default)]
    pub returning_from_subflow: bool,
}

impl DialogContext {
    /// Context anchored at a position
    pub fn at(flow: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            current_flow: flow.into(),
            current_node: node.into(),
            previous_flow: None,
            previous_node: None,
            queue: None,
            returning_from_subflow: false,
        }
    }

    /// Record the current position as the previous one
    pub fn remember_current(&mut self) {
        self.previous_flow = Some(self.current_flow.clone());
        self.previous_node = Some(self.current_node.clone());
    }

    /// Move to a new position and drop any pending queue
    pub fn move_to(&mut self, flow: impl Into<String>, node: impl Into<String>) {
        self.current_flow = flow.into();
        self.current_node = node.into();
        self.queue = None;
    }
}

/// Persisted execution position and variables of one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogSession {
    /// Session id
    pub id: SessionId,
    /// Bot the session belongs to
    pub bot_id: BotId,
    /// Variables
    pub state: DialogState,
    /// Execution position
    pub context: DialogContext,
    /// Last inbound event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<DialogEvent>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

impl DialogSession {
    /// Create a session at a position
    pub fn new(id: SessionId, bot_id: BotId, context: DialogContext) -> Self {
        let now = Utc::now();
        Self {
            id,
            bot_id,
            state: DialogState::default(),
            context,
            event: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp the session as modified
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
