use crate::domain::flow_definition::{find_flow, FlowDefinition, FLOW_SUFFIX};
use crate::CoreError;

/// Where a session stands when a destination token is resolved
#[derive(Debug, Clone, Copy)]
pub struct NavigationArgs<'a> {
    /// Current flow name
    pub current_flow: &'a str,
    /// Current node name
    pub current_node: &'a str,
    /// Recorded previous flow
    pub previous_flow: Option<&'a str>,
    /// Recorded previous node
    pub previous_node: Option<&'a str>,
    /// All flows of the bot
    pub flows: &'a [FlowDefinition],
}

/// A resolved `(flow, node)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationPosition {
    /// Canonical flow name
    pub flow: String,
    /// Node name
    pub node: String,
}

/// Resolves destination tokens.
///
/// | token | target |
/// |---|---|
/// | `##` or `#` | previous flow and node |
/// | `#name` | node `name` of the previous flow |
/// | `other.flow.json` | start node of that flow |
/// | `other.flow.json#name` | node `name` of that flow |
/// | `name` | node `name` of the current flow |
///
/// `END` is handled by the engine and never reaches the navigator.
#[derive(Debug, Default, Clone)]
pub struct FlowNavigator;

impl FlowNavigator {
    /// Create a navigator
    pub fn new() -> Self {
        Self
    }

    /// Resolve `token`; every failure is a [`CoreError::NavigationError`]
    pub fn resolve(
        &self,
        token: &str,
        args: &NavigationArgs<'_>,
    ) -> Result<NavigationPosition, CoreError> {
        let token = token.trim();

        if token == "##" || token == "#" {
            let (flow, node) = match (args.previous_flow, args.previous_node) {
                (Some(flow), Some(node)) => (flow, node),
                _ => {
                    return Err(CoreError::NavigationError(format!(
                        "Cannot return with '{}' from {}/{}: no previous position",
                        token, args.current_flow, args.current_node
                    )))
                }
            };
            return Self::position(args.flows, flow, Some(node), token);
        }

        if let Some(node) = token.strip_prefix('#') {
            let flow = args.previous_flow.ok_or_else(|| {
                CoreError::NavigationError(format!(
                    "Cannot resolve '{}' from {}/{}: no previous flow",
                    token, args.current_flow, args.current_node
                ))
            })?;
            return Self::position(args.flows, flow, Some(node), token);
        }

        if token.to_ascii_lowercase().contains(FLOW_SUFFIX) {
            let (flow, node) = match token.split_once('#') {
                Some((flow, node)) if !node.is_empty() => (flow, Some(node)),
                Some((flow, _)) => (flow, None),
                None => (token, None),
            };
            return Self::position(args.flows, flow, node, token);
        }

        Self::position(args.flows, args.current_flow, Some(token), token)
    }

    fn position(
        flows: &[FlowDefinition],
        flow_name: &str,
        node_name: Option<&str>,
        token: &str,
    ) -> Result<NavigationPosition, CoreError> {
        let flow = find_flow(flows, flow_name).ok_or_else(|| {
            CoreError::NavigationError(format!("Flow not found for '{}': {}", token, flow_name))
        })?;
        let node_name = node_name.unwrap_or(flow.start_node.as_str());
        let node = flow.node(node_name).ok_or_else(|| {
            CoreError::NavigationError(format!(
                "Node not found for '{}': {} (flow {})",
                token, node_name, flow.name
            ))
        })?;

        Ok(NavigationPosition {
            flow: flow.name.clone(),
            node: node.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow_definition::NodeDefinition;

    fn flows() -> Vec<FlowDefinition> {
        let mut main = FlowDefinition::new("main", NodeDefinition::new("entry"));
        main.nodes.push(NodeDefinition::new("call-help"));
        main.nodes.push(NodeDefinition::new("done"));
        let mut help = FlowDefinition::new("help", NodeDefinition::new("start"));
        help.nodes.push(NodeDefinition::new("faq"));
        vec![main, help]
    }

    fn pos(flow: &str, node: &str) -> NavigationPosition {
        NavigationPosition {
            flow: flow.to_string(),
            node: node.to_string(),
        }
    }

    #[test]
    fn test_addressing_modes() {
        let flows = flows();
        let args = NavigationArgs {
            current_flow: "help.flow.json",
            current_node: "faq",
            previous_flow: Some("main.flow.json"),
            previous_node: Some("call-help"),
            flows: &flows,
        };
        let navigator = FlowNavigator::new();

        assert_eq!(navigator.resolve("##", &args).unwrap(), pos("main.flow.json", "call-help"));
        assert_eq!(navigator.resolve("#", &args).unwrap(), pos("main.flow.json", "call-help"));
        assert_eq!(navigator.resolve("#done", &args).unwrap(), pos("main.flow.json", "done"));
        assert_eq!(navigator.resolve("main.flow.json", &args).unwrap(), pos("main.flow.json", "entry"));
        assert_eq!(navigator.resolve("main.flow.json#done", &args).unwrap(), pos("main.flow.json", "done"));
        assert_eq!(navigator.resolve("start", &args).unwrap(), pos("help.flow.json", "start"));
    }

    #[test]
    fn test_failures_are_navigation_errors() {
        let flows = flows();
        let args = NavigationArgs {
            current_flow: "main.flow.json",
            current_node: "entry",
            previous_flow: None,
            previous_node: None,
            flows: &flows,
        };
        let navigator = FlowNavigator::new();

        for token in ["##", "#done", "missing.flow.json", "main.flow.json#nope", "nowhere"] {
            assert!(
                matches!(navigator.resolve(token, &args), Err(CoreError::NavigationError(_))),
                "token {}",
                token
            );
        }
    }
}
