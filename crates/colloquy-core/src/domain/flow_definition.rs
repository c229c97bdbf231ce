use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// File suffix every flow name carries
pub const FLOW_SUFFIX: &str = ".flow.json";

/// Represents a parsed flow: a named graph of nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    /// Unique name of the flow, e.g. `main.flow.json`
    #[serde(default)]
    pub name: String,

    /// Format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Description of the flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Name of the node a new visit of this flow starts at
    pub start_node: String,

    /// Rules shared by every node of the flow
    #[serde(default)]
    pub catch_all: CatchAll,

    /// Node to run when a session in this flow times out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_node: Option<String>,

    /// The nodes in this flow
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,

    /// Editor links between nodes, kept opaque
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<serde_json::Value>,

    /// Editing lock snapshot, attached when the flow is parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_mutex: Option<FlowMutex>,
}

fn default_version() -> String {
    "0.0.1".to_string()
}

/// Flow-level `onReceive` and `next` rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchAll {
    /// Instructions run after every node's wait, before the node's own
    #[serde(default)]
    pub on_receive: Vec<String>,

    /// Transitions evaluated before every node's own
    #[serde(default)]
    pub next: Vec<TransitionRule>,
}

/// One step of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Stable identifier used by the layout file
    #[serde(default)]
    pub id: String,

    /// Name of the node, unique within its flow
    pub name: String,

    /// Kind of node
    #[serde(rename = "type", default)]
    pub kind: NodeKind,

    /// Instructions run once on arrival
    #[serde(default)]
    pub on_enter: Vec<String>,

    /// Instructions run after waiting for input. `None` means the node never waits.
    #[serde(default)]
    pub on_receive: Option<Vec<String>>,

    /// Ordered transition rules, first match wins
    #[serde(default)]
    pub next: Vec<TransitionRule>,

    /// Subflow invoked by a skill-call node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,

    /// Inline content of a say-something node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<NodeContent>,

    /// Node of the same flow to run when the session times out here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Horizontal position in the editor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,

    /// Vertical position in the editor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// Kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeKind {
    /// Plain node
    #[default]
    #[serde(rename = "standard")]
    Standard,

    /// Delegates to another flow and returns when it ends
    #[serde(rename = "skill-call")]
    SkillCall,

    /// Renders inline content on entry
    #[serde(rename = "say_something", alias = "say-something")]
    SaySomething,

    /// Any kind the engine does not know; executed like a standard node
    #[serde(other, rename = "other")]
    Other,
}

/// A `condition -> destination` rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Condition source
    pub condition: String,

    /// Destination token
    #[serde(rename = "node", alias = "destination", default)]
    pub destination: String,
}

impl TransitionRule {
    /// Create a rule
    pub fn new(condition: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            destination: destination.into(),
        }
    }
}

/// Content rendered by a say-something node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeContent {
    /// Content type, e.g. `builtin_text`
    pub content_type: String,

    /// Payload handed to the renderer
    #[serde(default)]
    pub form_data: serde_json::Value,
}

/// Snapshot of the editing lock held on a flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMutex {
    /// Editor holding the lock
    pub last_modified_by: String,

    /// When the lock was last acquired or refreshed
    pub last_modified_at: DateTime<Utc>,

    /// Seconds until the lock expires, computed when the snapshot is taken
    #[serde(default)]
    pub remaining_seconds: u64,
}

impl FlowMutex {
    /// Whether the lock has expired at `now`; a lock with no time left is expired
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.compute_remaining(now, ttl) == 0
    }

    /// `max(0, ceil(lastModifiedAt + ttl - now))` in seconds
    pub fn compute_remaining(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> u64 {
        let remaining_ms = (self.last_modified_at + ttl - now).num_milliseconds();
        if remaining_ms <= 0 {
            0
        } else {
            ((remaining_ms + 999) / 1000) as u64
        }
    }
}

/// Adds the flow suffix to a bare flow name
pub fn canonical_flow_name(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(FLOW_SUFFIX) {
        name.to_string()
    } else {
        format!("{}{}", name, FLOW_SUFFIX)
    }
}

/// Case-insensitive flow lookup; the suffix is optional
pub fn find_flow<'a>(flows: &'a [FlowDefinition], name: &str) -> Option<&'a FlowDefinition> {
    let wanted = canonical_flow_name(name);
    flows.iter().find(|f| f.name.eq_ignore_ascii_case(&wanted))
}

impl FlowDefinition {
    /// Create an empty flow with a single start node
    pub fn new(name: impl Into<String>, start_node: NodeDefinition) -> Self {
        Self {
            name: canonical_flow_name(&name.into()),
            version: default_version(),
            label: None,
            description: None,
            start_node: start_node.name.clone(),
            catch_all: CatchAll::default(),
            timeout_node: None,
            nodes: vec![start_node],
            links: Vec::new(),
            current_mutex: None,
        }
    }

    /// Find a node by name
    pub fn node(&self, name: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Find a node by name or fail with [`CoreError::NodeNotFound`]
    pub fn require_node(&self, name: &str) -> Result<&NodeDefinition, CoreError> {
        self.node(name)
            .ok_or_else(|| CoreError::node_not_found(&self.name, name))
    }

    /// The start node
    pub fn start(&self) -> Result<&NodeDefinition, CoreError> {
        self.require_node(&self.start_node)
    }

    /// Validate the flow definition
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.nodes.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "Flow {} must have at least one node",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "Flow {} has a node without a name",
                    self.name
                )));
            }
            if !names.insert(node.name.as_str()) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate node name in flow {}: {}",
                    self.name, node.name
                )));
            }
            if node.kind == NodeKind::SkillCall && node.flow.as_deref().unwrap_or("").is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "Skill-call node {} in flow {} does not name a flow",
                    node.name, self.name
                )));
            }
        }

        if !names.contains(self.start_node.as_str()) {
            return Err(CoreError::ValidationError(format!(
                "Start node {} does not exist in flow {}",
                self.start_node, self.name
            )));
        }

        Ok(())
    }
}

impl NodeDefinition {
    /// Create a standard node with no instructions
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            kind: NodeKind::Standard,
            on_enter: Vec::new(),
            on_receive: None,
            next: Vec::new(),
            flow: None,
            content: None,
            timeout: None,
            x: None,
            y: None,
        }
    }

    /// Whether the node has been placed on the editor canvas
    pub fn is_placed(&self) -> bool {
        self.x.is_some() && self.y.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_flow_file_format() {
        let flow: FlowDefinition = serde_json::from_value(json!({
            "version": "0.0.1",
            "startNode": "entry",
            "catchAll": { "next": [{ "condition": "true", "node": "help" }] },
            "nodes": [
                { "id": "n1", "name": "entry", "onEnter": ["greet {}"], "onReceive": null,
                  "next": [{ "condition": "true", "node": "END" }] },
                { "id": "n2", "name": "help", "type": "skill-call", "flow": "help.flow.json" },
                { "id": "n3", "name": "hello", "type": "say_something",
                  "content": { "contentType": "builtin_text", "formData": { "text": "hi" } } },
                { "id": "n4", "name": "custom", "type": "listener" }
            ]
        }))
        .unwrap();

        assert_eq!(flow.start_node, "entry");
        assert_eq!(flow.catch_all.next[0].destination, "help");
        assert!(flow.catch_all.on_receive.is_empty());
        assert_eq!(flow.nodes[0].on_receive, None);
        assert_eq!(flow.nodes[1].kind, NodeKind::SkillCall);
        assert_eq!(flow.nodes[2].kind, NodeKind::SaySomething);
        assert_eq!(flow.nodes[3].kind, NodeKind::Other);
    }

    #[test]
    fn test_on_receive_empty_list_means_wait() {
        let node: NodeDefinition =
            serde_json::from_value(json!({ "name": "ask", "onReceive": [] })).unwrap();
        assert_eq!(node.on_receive, Some(vec![]));
    }

    #[test]
    fn test_find_flow_is_case_insensitive_and_suffix_optional() {
        let flows = vec![FlowDefinition::new("Main", NodeDefinition::new("entry"))];
        assert_eq!(flows[0].name, "Main.flow.json");
        assert!(find_flow(&flows, "main").is_some());
        assert!(find_flow(&flows, "MAIN.flow.json").is_some());
        assert!(find_flow(&flows, "other").is_none());
    }

    #[test]
    fn test_validate() {
        let mut flow = FlowDefinition::new("main", NodeDefinition::new("entry"));
        assert!(flow.validate().is_ok());

        flow.start_node = "missing".to_string();
        assert!(matches!(flow.validate(), Err(CoreError::ValidationError(_))));

        flow.start_node = "entry".to_string();
        flow.nodes.push(NodeDefinition::new("entry"));
        assert!(matches!(flow.validate(), Err(CoreError::ValidationError(_))));

        flow.nodes.pop();
        let mut call = NodeDefinition::new("call");
        call.kind = NodeKind::SkillCall;
        flow.nodes.push(call);
        assert!(matches!(flow.validate(), Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_mutex_remaining_seconds() {
        let at = Utc::now();
        let mutex = FlowMutex {
            last_modified_by: "alice".to_string(),
            last_modified_at: at,
            remaining_seconds: 0,
        };
        let ttl = chrono::Duration::seconds(30);

        assert_eq!(mutex.compute_remaining(at, ttl), 30);
        assert_eq!(mutex.compute_remaining(at + chrono::Duration::milliseconds(10_500), ttl), 20);
        assert_eq!(mutex.compute_remaining(at + chrono::Duration::seconds(45), ttl), 0);
        assert!(!mutex.is_expired(at + ttl - chrono::Duration::milliseconds(1), ttl));
        assert!(mutex.is_expired(at + ttl, ttl));
        assert!(mutex.is_expired(at + ttl + chrono::Duration::seconds(1), ttl));
    }
}
