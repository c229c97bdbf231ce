//!
//! Colloquy - Flow-based dialog runner
//!
//! Wires the dialog engine to flows stored on disk and chats with one bot
//! over the console. Lines starting with `/` are commands:
//!
//! - `/timeout` runs the session's timeout handling
//! - `/jump <flow>[#node]` moves the session without running it
//! - `/reload <file>` re-reads one flow or layout file
//! - `/quit` leaves

use colloquy_core::domain::repository::memory::{MemoryKeyValueStore, MemorySessionRepository};
use colloquy_core::{
    default_strategies, BotId, CoreError, DialogEngine, DialogEvent, SessionId, TurnOutcome,
};
use colloquy_flows::{FlowInvalidation, FlowStore, FsFlowStorage};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Configuration module
pub mod config;

/// Console collaborators
pub mod console;

pub use config::AppConfig;
use console::{BuiltinActions, ConsoleDelivery, ConsoleRenderer};

const CHANNEL: &str = "console";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Plain text for the bot
    Say(String),
    /// Run the timeout handling
    Timeout,
    /// Move to a flow, optionally at a node
    Jump {
        /// Flow name
        flow: String,
        /// Node name
        node: Option<String>,
    },
    /// Re-read a flow or layout file
    Reload(String),
    /// Leave
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line; blank lines and unknown commands yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Some(ConsoleCommand::Say(line.to_string()));
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match (name, arg) {
            ("quit" | "exit", _) => Some(ConsoleCommand::Quit),
            ("timeout", _) => Some(ConsoleCommand::Timeout),
            ("jump", target) if !target.is_empty() => {
                let (flow, node) = match target.split_once('#') {
                    Some((flow, node)) if !node.is_empty() => (flow, Some(node.to_string())),
                    Some((flow, _)) => (flow, None),
                    None => (target, None),
                };
                Some(ConsoleCommand::Jump {
                    flow: flow.to_string(),
                    node,
                })
            }
            ("reload", file) if !file.is_empty() => Some(ConsoleCommand::Reload(file.to_string())),
            _ => None,
        }
    }
}

/// Initialize logging
pub fn init_logging(config: &AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the console chat until stdin closes or `/quit`
pub async fn run(config: AppConfig) -> Result<(), CoreError> {
    let bot_id = BotId(config.bot_id.clone());
    let session_id = SessionId(config.user.clone());

    let store = Arc::new(FlowStore::new(
        Arc::new(FsFlowStorage::new(&config.data_dir)),
        Arc::new(MemoryKeyValueStore::new()),
        config.flows.clone(),
    ));
    if store.load_all(&bot_id).await?.is_empty() {
        info!(bot_id = %bot_id, "No flows found, creating the main flow");
        store.create_main_flow(&bot_id).await?;
    }

    let (invalidations, notices) = mpsc::channel(16);
    let listener = store.clone().spawn_invalidation_listener(notices);

    let strategies = default_strategies(
        Arc::new(ConsoleRenderer::new()),
        Arc::new(ConsoleDelivery::stdout()),
        Arc::new(BuiltinActions),
        &config.engine,
    );
    let engine = DialogEngine::new(
        store,
        Arc::new(MemorySessionRepository::new()),
        strategies,
        config.engine.clone(),
    );

    info!(bot_id = %bot_id, user = %config.user, "Chat started");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = ConsoleCommand::parse(&line) else {
            continue;
        };
        let event = DialogEvent::text(bot_id.clone(), CHANNEL, &config.user, line.trim());

        let outcome = match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Say(_) => engine.process_event(&session_id, event).await,
            ConsoleCommand::Timeout => engine.process_timeout(&bot_id, &session_id, event).await,
            ConsoleCommand::Jump { flow, node } => engine
                .jump_to(&session_id, event, &flow, node.as_deref())
                .await
                .map(|_| TurnOutcome::Suspended),
            ConsoleCommand::Reload(file) => {
                let notice = FlowInvalidation {
                    bot_id: bot_id.clone(),
                    file,
                };
                if invalidations.send(notice).await.is_err() {
                    warn!("Flow invalidation listener is gone");
                }
                continue;
            }
        };

        match outcome {
            Ok(TurnOutcome::Terminated) => info!(session_id = %session_id, "Conversation ended"),
            Ok(TurnOutcome::Contained(error)) => warn!("Turn failed: {}", error),
            Ok(TurnOutcome::Suspended) => {}
            Err(e) => warn!(session_id = %session_id, "Turn aborted: {}", e),
        }
    }

    drop(invalidations);
    if let Err(e) = listener.await {
        warn!("Flow invalidation listener failed: {}", e);
    }
    info!("Chat closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("   "), None);
        assert_eq!(
            ConsoleCommand::parse(" hello there "),
            Some(ConsoleCommand::Say("hello there".to_string()))
        );
        assert_eq!(ConsoleCommand::parse("/quit"), Some(ConsoleCommand::Quit));
        assert_eq!(ConsoleCommand::parse("/timeout"), Some(ConsoleCommand::Timeout));
        assert_eq!(
            ConsoleCommand::parse("/jump help.flow.json#faq"),
            Some(ConsoleCommand::Jump {
                flow: "help.flow.json".to_string(),
                node: Some("faq".to_string()),
            })
        );
        assert_eq!(
            ConsoleCommand::parse("/jump help"),
            Some(ConsoleCommand::Jump {
                flow: "help".to_string(),
                node: None,
            })
        );
        assert_eq!(
            ConsoleCommand::parse("/reload main.ui.json"),
            Some(ConsoleCommand::Reload("main.ui.json".to_string()))
        );
        assert_eq!(ConsoleCommand::parse("/jump"), None);
        assert_eq!(ConsoleCommand::parse("/dance"), None);
    }
}
