//! The dialog execution loop.
//!
//! One call to [`DialogEngine::process_event`] is one conversational turn:
//! the session is loaded (or created), its queue is resumed or compiled,
//! and instructions are dispatched until the session suspends on a `wait`,
//! terminates, or an instruction fails and the failure is contained.
//!
//! The loop is iterative. A transition rewrites the session context and the
//! next iteration picks up the new position.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::collaborators::{LoggingErrorHandler, ProcessingErrorHandler};
use super::compiler::{compile, CompileOptions};
use super::navigator::{FlowNavigator, NavigationArgs};
use super::strategy::{FollowUpAction, ProcessingResult, StrategyMap};
use crate::config::{EngineConfig, ErrorRebuildPolicy};
use crate::domain::flow_definition::{find_flow, FlowDefinition, NodeDefinition, NodeKind};
use crate::domain::instruction::{Instruction, InstructionKind, InstructionQueue};
use crate::domain::repository::{FlowRepository, SessionRepository};
use crate::domain::session::{
    BotId, DialogContext, DialogEvent, DialogSession, SessionId, StackFrame,
};
use crate::error::ProcessingError;
use crate::CoreError;

/// Destination that ends the session
const END: &str = "END";

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Waiting for the next inbound event
    Suspended,
    /// Session deleted
    Terminated,
    /// An instruction failed; the session was rewound and kept
    Contained(ProcessingError),
}

/// Drives sessions through their flows
#[derive(Clone)]
pub struct DialogEngine {
    flows: Arc<dyn FlowRepository>,
    sessions: Arc<dyn SessionRepository>,
    strategies: StrategyMap,
    error_handler: Arc<dyn ProcessingErrorHandler>,
    navigator: FlowNavigator,
    config: EngineConfig,
}

impl DialogEngine {
    /// Create a new dialog engine
    pub fn new(
        flows: Arc<dyn FlowRepository>,
        sessions: Arc<dyn SessionRepository>,
        strategies: StrategyMap,
        config: EngineConfig,
    ) -> Self {
        Self {
            flows,
            sessions,
            strategies,
            error_handler: Arc::new(LoggingErrorHandler),
            navigator: FlowNavigator::new(),
            config,
        }
    }

    /// Replace the processing error handler
    pub fn with_error_handler(mut self, handler: Arc<dyn ProcessingErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one inbound event for a session
    pub async fn process_event(
        &self,
        session_id: &SessionId,
        event: DialogEvent,
    ) -> Result<TurnOutcome, CoreError> {
        let flows = self.flows.load_all(&event.bot_id).await?;

        let mut session = match self.sessions.get(session_id).await? {
            Some(session) => session,
            None => self.create_session(session_id, &event.bot_id, &flows).await?,
        };

        begin_turn(&mut session, &event);
        self.run_turn(session, &event, &flows).await
    }

    /// Force a session to a position without running it.
    ///
    /// `node` defaults to the start node of `flow`. The session is created
    /// if it does not exist.
    pub async fn jump_to(
        &self,
        session_id: &SessionId,
        event: DialogEvent,
        flow: &str,
        node: Option<&str>,
    ) -> Result<(), CoreError> {
        let flows = self.flows.load_all(&event.bot_id).await?;
        let target_flow = require_flow(&flows, flow)?;
        let target_node = match node {
            Some(node) => target_flow.require_node(node)?,
            None => target_flow.start()?,
        };

        let mut session = match self.sessions.get(session_id).await? {
            Some(mut session) => {
                session.context.remember_current();
                session
            }
            None => self.create_session(session_id, &event.bot_id, &flows).await?,
        };

        session.context.move_to(&target_flow.name, &target_node.name);
        session.context.returning_from_subflow = false;
        session.event = Some(event);
        session.state.stacktrace = vec![StackFrame::new(&target_flow.name, &target_node.name)];

        info!(
            session_id = %session_id,
            flow = %target_flow.name,
            node = %target_node.name,
            "Session jumped"
        );
        self.save(&mut session).await
    }

    /// Re-enter a session through its timeout node.
    ///
    /// The node is searched in order: the current node's `timeout` target,
    /// a node named `timeout` in the current flow, the flow's `timeoutNode`,
    /// and finally the start node of the timeout flow.
    pub async fn process_timeout(
        &self,
        bot_id: &BotId,
        session_id: &SessionId,
        event: DialogEvent,
    ) -> Result<TurnOutcome, CoreError> {
        let flows = self.flows.load_all(bot_id).await?;
        let mut session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::SessionNotFound(session_id.0.clone()))?;

        let current_flow = require_flow(&flows, &session.context.current_flow)?;
        let current_node = current_flow.node(&session.context.current_node);
        let (timeout_flow, timeout_node) = self
            .find_timeout_target(&flows, current_flow, current_node)
            .ok_or_else(|| {
                CoreError::TimeoutNodeNotFound(format!(
                    "No timeout node or flow for session {}",
                    session_id
                ))
            })?;

        info!(
            session_id = %session_id,
            flow = %timeout_flow.name,
            node = %timeout_node.name,
            "Processing session timeout"
        );

        session.context.remember_current();
        session.context.move_to(&timeout_flow.name, &timeout_node.name);
        session.context.returning_from_subflow = false;
        begin_turn(&mut session, &event);
        self.save(&mut session).await?;

        self.run_turn(session, &event, &flows).await
    }

    fn find_timeout_target<'a>(
        &self,
        flows: &'a [FlowDefinition],
        flow: &'a FlowDefinition,
        node: Option<&'a NodeDefinition>,
    ) -> Option<(&'a FlowDefinition, &'a NodeDefinition)> {
        if let Some(target) = node
            .and_then(|n| n.timeout.as_deref())
            .and_then(|name| flow.node(name))
        {
            return Some((flow, target));
        }

        if let Some(target) = flow.node(&self.config.timeout_node) {
            return Some((flow, target));
        }

        if let Some(target) = flow.timeout_node.as_deref().and_then(|name| flow.node(name)) {
            return Some((flow, target));
        }

        let fallback = find_flow(flows, &self.config.timeout_flow)?;
        fallback.node(&fallback.start_node).map(|start| (fallback, start))
    }

    async fn create_session(
        &self,
        session_id: &SessionId,
        bot_id: &BotId,
        flows: &[FlowDefinition],
    ) -> Result<DialogSession, CoreError> {
        let flow = require_flow(flows, &self.config.default_flow)?;
        let start = flow.start()?;

        let mut session = DialogSession::new(
            session_id.clone(),
            bot_id.clone(),
            DialogContext::at(&flow.name, &start.name),
        );
        // A flow may start by calling another one.
        if start.kind == NodeKind::SkillCall {
            enter_subflow(&mut session.context, flow, start, flows)?;
        }

        self.sessions.create(&session).await?;
        debug!(
            session_id = %session_id,
            bot_id = %bot_id,
            flow = %session.context.current_flow,
            node = %session.context.current_node,
            "Session created"
        );
        Ok(session)
    }

    async fn run_turn(
        &self,
        mut session: DialogSession,
        event: &DialogEvent,
        flows: &[FlowDefinition],
    ) -> Result<TurnOutcome, CoreError> {
        loop {
            let flow = require_flow(flows, &session.context.current_flow)?;
            let node = flow.require_node(&session.context.current_node)?;

            if node.kind == NodeKind::SkillCall && !session.context.returning_from_subflow {
                enter_subflow(&mut session.context, flow, node, flows)?;
                debug!(
                    session_id = %session.id,
                    caller = %node.name,
                    flow = %session.context.current_flow,
                    "Entering subflow"
                );
                self.record_position(&mut session).await?;
                self.save(&mut session).await?;
                continue;
            }

            let mut queue = match session.context.queue.take() {
                Some(raw) => InstructionQueue::deserialize(&raw)?,
                None => compile(node, flow, CompileOptions::full()),
            };

            let (destination, origin) = loop {
                let Some(instruction) = queue.dequeue() else {
                    debug!(
                        session_id = %session.id,
                        flow = %flow.name,
                        node = %node.name,
                        "No more instructions, ending session"
                    );
                    self.sessions.delete(&session.id).await?;
                    return Ok(TurnOutcome::Terminated);
                };
                session.context.queue = Some(queue.serialize()?);

                let result = match self.dispatch(&instruction, &session, event).await {
                    Ok(result) => result,
                    Err(err) => {
                        return self.contain(session, flow, node, &instruction, err).await;
                    }
                };

                let ProcessingResult { action, state } = result;
                match action {
                    FollowUpAction::None => self.save(&mut session).await?,
                    FollowUpAction::Update => {
                        if let Some(state) = state {
                            session.state = state;
                        }
                        self.save(&mut session).await?;
                        session = self
                            .sessions
                            .get(&session.id)
                            .await?
                            .ok_or_else(|| CoreError::SessionNotFound(session.id.0.clone()))?;
                    }
                    FollowUpAction::Wait => {
                        self.save(&mut session).await?;
                        debug!(
                            session_id = %session.id,
                            flow = %flow.name,
                            node = %node.name,
                            "Waiting for input"
                        );
                        return Ok(TurnOutcome::Suspended);
                    }
                    FollowUpAction::Transition(destination) => {
                        if let Some(state) = state {
                            session.state = state;
                        }
                        session.context.queue = None;
                        break (destination, instruction);
                    }
                }
            };

            let destination = destination.trim();
            if destination.is_empty() || destination == END {
                debug!(
                    session_id = %session.id,
                    flow = %flow.name,
                    node = %node.name,
                    "Flow ended"
                );
                self.sessions.delete(&session.id).await?;
                return Ok(TurnOutcome::Terminated);
            }

            if let Err(err) = self.apply_transition(&mut session, flows, destination) {
                // A failed action's fallback target is part of that failure.
                if origin.kind() != InstructionKind::Transition {
                    return self.contain(session, flow, node, &origin, err).await;
                }
                return Err(err);
            }
            self.record_position(&mut session).await?;
            self.save(&mut session).await?;
        }
    }

    async fn dispatch(
        &self,
        instruction: &Instruction,
        session: &DialogSession,
        event: &DialogEvent,
    ) -> Result<ProcessingResult, CoreError> {
        let strategy = self.strategies.get(&instruction.kind()).ok_or_else(|| {
            CoreError::ConfigurationError(format!(
                "No strategy registered for {:?} instructions",
                instruction.kind()
            ))
        })?;
        strategy.process(instruction, session, event).await
    }

    fn apply_transition(
        &self,
        session: &mut DialogSession,
        flows: &[FlowDefinition],
        destination: &str,
    ) -> Result<(), CoreError> {
        let context = &session.context;
        let target = self.navigator.resolve(
            destination,
            &NavigationArgs {
                current_flow: &context.current_flow,
                current_node: &context.current_node,
                previous_flow: context.previous_flow.as_deref(),
                previous_node: context.previous_node.as_deref(),
                flows,
            },
        )?;

        let returns_to_caller = destination.starts_with('#')
            && context.previous_flow.as_deref() == Some(target.flow.as_str());
        let at_call_site = returns_to_caller
            && context.previous_node.as_deref() == Some(target.node.as_str());
        let crosses_flow = target.flow != context.current_flow;

        // Returning must not replay the caller's entry and receive instructions.
        let queue = if returns_to_caller {
            let flow = require_flow(flows, &target.flow)?;
            let node = flow.require_node(&target.node)?;
            Some(compile(node, flow, CompileOptions::only_transitions()).serialize()?)
        } else {
            None
        };

        debug!(
            session_id = %session.id,
            from_flow = %session.context.current_flow,
            from_node = %session.context.current_node,
            flow = %target.flow,
            node = %target.node,
            "Transition"
        );

        let context = &mut session.context;
        if crosses_flow {
            context.remember_current();
        }
        context.move_to(target.flow, target.node);
        context.queue = queue;
        context.returning_from_subflow = at_call_site;
        Ok(())
    }

    async fn record_position(&self, session: &mut DialogSession) -> Result<(), CoreError> {
        let frame = StackFrame::new(&session.context.current_flow, &session.context.current_node);
        session.state.stacktrace.push(frame.clone());

        let visits = session
            .state
            .stacktrace
            .iter()
            .filter(|f| **f == frame)
            .count();
        if visits >= self.config.max_node_visits {
            let path = loop_path(&session.state.stacktrace, &frame);
            error!(
                session_id = %session.id,
                bot_id = %session.bot_id,
                flow = %frame.flow,
                node = %frame.node,
                "Infinite loop detected, ending session"
            );
            self.sessions.delete(&session.id).await?;
            return Err(CoreError::InfiniteLoopError(path));
        }
        Ok(())
    }

    async fn contain(
        &self,
        mut session: DialogSession,
        flow: &FlowDefinition,
        node: &NodeDefinition,
        instruction: &Instruction,
        err: CoreError,
    ) -> Result<TurnOutcome, CoreError> {
        let options = match (self.config.error_rebuild, instruction.kind()) {
            (ErrorRebuildPolicy::ReplayFailedOnEnter, InstructionKind::OnEnter) => {
                CompileOptions::full()
            }
            _ => CompileOptions::skip_on_enter(),
        };
        session.context.queue = Some(compile(node, flow, options).serialize()?);
        self.save(&mut session).await?;

        let error = ProcessingError {
            bot_id: session.bot_id.0.clone(),
            flow_name: flow.name.clone(),
            node_name: node.name.clone(),
            instruction: instruction.function().to_string(),
            message: err.to_string(),
        };
        warn!(
            session_id = %session.id,
            bot_id = %error.bot_id,
            flow = %error.flow_name,
            node = %error.node_name,
            instruction = %error.instruction,
            "Instruction failed: {}",
            error.message
        );
        self.error_handler.on_processing_error(&error).await;

        Ok(TurnOutcome::Contained(error))
    }

    async fn save(&self, session: &mut DialogSession) -> Result<(), CoreError> {
        session.touch();
        self.sessions.update(session).await
    }
}

fn begin_turn(session: &mut DialogSession, event: &DialogEvent) {
    session.event = Some(event.clone());
    session.state.stacktrace = vec![StackFrame::new(
        &session.context.current_flow,
        &session.context.current_node,
    )];
}

fn require_flow<'a>(flows: &'a [FlowDefinition], name: &str) -> Result<&'a FlowDefinition, CoreError> {
    find_flow(flows, name).ok_or_else(|| CoreError::FlowNotFound(name.to_string()))
}

/// Point `context` at the start of the subflow called by `caller`
fn enter_subflow(
    context: &mut DialogContext,
    caller_flow: &FlowDefinition,
    caller: &NodeDefinition,
    flows: &[FlowDefinition],
) -> Result<(), CoreError> {
    let name = caller.flow.as_deref().ok_or_else(|| {
        CoreError::ValidationError(format!(
            "Skill-call node {} in flow {} does not name a flow",
            caller.name, caller_flow.name
        ))
    })?;
    let subflow = require_flow(flows, name)?;
    let start = subflow.start()?;

    context.previous_flow = Some(caller_flow.name.clone());
    context.previous_node = Some(caller.name.clone());
    context.move_to(&subflow.name, &start.name);
    context.returning_from_subflow = false;
    Ok(())
}

/// `flow (node) --> ...` from the first visit of `frame` to its second
fn loop_path(stacktrace: &[StackFrame], frame: &StackFrame) -> String {
    let mut seen = 0;
    let mut path = Vec::new();
    for entry in stacktrace {
        if entry == frame {
            seen += 1;
        }
        if seen > 0 {
            path.push(format!("{} ({})", entry.flow, entry.node));
        }
        if seen == 2 {
            break;
        }
    }
    path.join(" --> ")
}
