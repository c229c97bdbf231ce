//! Configuration for the dialog engine
//!
//! Defaults match the conventional flow names of a bot. Every field can be
//! overridden from the environment through [`EngineConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// How the queue is rebuilt after an instruction fails.
///
/// The classic rule recompiles the whole node when the failing instruction
/// was an `on-enter` one and skips entry instructions otherwise; that is
/// [`ErrorRebuildPolicy::ReplayFailedOnEnter`]. The default never replays
/// entry instructions, so a failing entry action does not run again on the
/// next turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRebuildPolicy {
    /// Always rebuild without entry instructions, so a failing entry action
    /// is not replayed on the next turn
    #[default]
    SkipOnEnter,
    /// Rebuild the whole node when an entry instruction failed, and skip
    /// entry instructions otherwise
    ReplayFailedOnEnter,
}

/// Dialog engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Flow a new session starts in
    #[serde(default = "default_flow")]
    pub default_flow: String,

    /// Flow an action failure transitions to when `temp.onErrorFlowTo` is unset
    #[serde(default = "default_error_flow")]
    pub error_flow: String,

    /// Fallback flow for session timeouts
    #[serde(default = "default_timeout_flow")]
    pub timeout_flow: String,

    /// Conventional name of a flow-local timeout node
    #[serde(default = "default_timeout_node")]
    pub timeout_node: String,

    /// Visits of one (flow, node) pair in a single turn that count as a loop
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: usize,

    /// Budget for one condition expression, in milliseconds
    #[serde(default = "default_expression_timeout_ms")]
    pub expression_timeout_ms: u64,

    /// Queue rebuild policy after a contained processing error
    #[serde(default)]
    pub error_rebuild: ErrorRebuildPolicy,
}

fn default_flow() -> String {
    "main.flow.json".to_string()
}

fn default_error_flow() -> String {
    "error.flow.json".to_string()
}

fn default_timeout_flow() -> String {
    "timeout.flow.json".to_string()
}

fn default_timeout_node() -> String {
    "timeout".to_string()
}

fn default_max_node_visits() -> usize {
    3
}

fn default_expression_timeout_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_flow: default_flow(),
            error_flow: default_error_flow(),
            timeout_flow: default_timeout_flow(),
            timeout_node: default_timeout_node(),
            max_node_visits: default_max_node_visits(),
            expression_timeout_ms: default_expression_timeout_ms(),
            error_rebuild: ErrorRebuildPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `COLLOQUY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(flow) = env::var("COLLOQUY_DEFAULT_FLOW") {
            config.default_flow = flow;
        }

        if let Ok(flow) = env::var("COLLOQUY_ERROR_FLOW") {
            config.error_flow = flow;
        }

        if let Ok(flow) = env::var("COLLOQUY_TIMEOUT_FLOW") {
            config.timeout_flow = flow;
        }

        if let Ok(visits) = env::var("COLLOQUY_MAX_NODE_VISITS") {
            match visits.parse::<usize>() {
                Ok(visits) if visits > 0 => config.max_node_visits = visits,
                _ => warn!("Invalid COLLOQUY_MAX_NODE_VISITS value: {}", visits),
            }
        }

        if let Ok(timeout) = env::var("COLLOQUY_EXPRESSION_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                config.expression_timeout_ms = timeout;
            } else {
                warn!("Invalid COLLOQUY_EXPRESSION_TIMEOUT_MS value: {}", timeout);
            }
        }

        if let Ok(policy) = env::var("COLLOQUY_ERROR_REBUILD") {
            match policy.as_str() {
                "skip_on_enter" => config.error_rebuild = ErrorRebuildPolicy::SkipOnEnter,
                "replay_failed_on_enter" => {
                    config.error_rebuild = ErrorRebuildPolicy::ReplayFailedOnEnter
                }
                other => warn!("Invalid COLLOQUY_ERROR_REBUILD value: {}", other),
            }
        }

        config
    }

    /// Expression budget as a [`Duration`]
    pub fn expression_timeout(&self) -> Duration {
        Duration::from_millis(self.expression_timeout_ms)
    }
}
