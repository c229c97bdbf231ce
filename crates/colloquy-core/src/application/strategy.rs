//! Instruction strategies.
//!
//! Each strategy executes one instruction and tells the engine what to do
//! next through a [`FollowUpAction`]. The engine looks strategies up in a
//! [`StrategyMap`] injected at construction time.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::collaborators::{ActionRequest, ActionRuntime, ContentRenderer, MessageDelivery};
use super::expression::{Condition, EvaluationError, ExpressionEvaluator, JmesPathEvaluator};
use super::template::{PathTemplateRenderer, TemplateRenderer};
use crate::config::EngineConfig;
use crate::domain::instruction::{Instruction, InstructionKind};
use crate::domain::session::{ActionErrorRecord, DialogEvent, DialogSession, DialogState, StackFrame};
use crate::CoreError;

/// What the engine does after an instruction ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUpAction {
    /// Continue with the next instruction
    None,
    /// Persist the new state, re-read the session and continue
    Update,
    /// Suspend until the next inbound event
    Wait,
    /// Jump to a destination token
    Transition(String),
}

/// Outcome of one instruction
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    /// Follow-up for the engine
    pub action: FollowUpAction,
    /// New session state, when the instruction changed it
    pub state: Option<DialogState>,
}

impl ProcessingResult {
    /// Nothing to do
    pub fn none() -> Self {
        Self {
            action: FollowUpAction::None,
            state: None,
        }
    }

    /// Suspend
    pub fn wait() -> Self {
        Self {
            action: FollowUpAction::Wait,
            state: None,
        }
    }

    /// State changed
    pub fn update(state: DialogState) -> Self {
        Self {
            action: FollowUpAction::Update,
            state: Some(state),
        }
    }

    /// Jump, optionally carrying a new state
    pub fn transition(destination: impl Into<String>, state: Option<DialogState>) -> Self {
        Self {
            action: FollowUpAction::Transition(destination.into()),
            state,
        }
    }
}

/// Executes one kind of instruction
#[async_trait]
pub trait InstructionStrategy: Send + Sync {
    /// Execute `instruction` for `session` while processing `event`
    async fn process(
        &self,
        instruction: &Instruction,
        session: &DialogSession,
        event: &DialogEvent,
    ) -> Result<ProcessingResult, CoreError>;
}

/// Strategies keyed by the instruction they handle
pub type StrategyMap = HashMap<InstructionKind, Arc<dyn InstructionStrategy>>;

/// Build the standard strategy map
pub fn default_strategies(
    renderer: Arc<dyn ContentRenderer>,
    delivery: Arc<dyn MessageDelivery>,
    actions: Arc<dyn ActionRuntime>,
    config: &EngineConfig,
) -> StrategyMap {
    let action: Arc<dyn InstructionStrategy> = Arc::new(ActionStrategy::new(
        renderer,
        delivery,
        actions,
        Arc::new(PathTemplateRenderer::new()),
        config.error_flow.clone(),
    ));
    let transition: Arc<dyn InstructionStrategy> = Arc::new(TransitionStrategy::new(Arc::new(
        JmesPathEvaluator::new(config.expression_timeout()),
    )));

    let mut strategies: StrategyMap = HashMap::new();
    strategies.insert(InstructionKind::OnEnter, action.clone());
    strategies.insert(InstructionKind::OnReceive, action);
    strategies.insert(InstructionKind::Transition, transition);
    strategies.insert(InstructionKind::Wait, Arc::new(WaitStrategy));
    strategies
}

/// Runs `on-enter` and `on-receive` instructions: `say` directives and action calls
pub struct ActionStrategy {
    renderer: Arc<dyn ContentRenderer>,
    delivery: Arc<dyn MessageDelivery>,
    actions: Arc<dyn ActionRuntime>,
    templates: Arc<dyn TemplateRenderer>,
    error_flow: String,
}

impl ActionStrategy {
    /// Create an action strategy
    pub fn new(
        renderer: Arc<dyn ContentRenderer>,
        delivery: Arc<dyn MessageDelivery>,
        actions: Arc<dyn ActionRuntime>,
        templates: Arc<dyn TemplateRenderer>,
        error_flow: String,
    ) -> Self {
        Self {
            renderer,
            delivery,
            actions,
            templates,
            error_flow,
        }
    }

    async fn say(
        &self,
        directive: &str,
        session: &DialogSession,
        event: &DialogEvent,
    ) -> Result<ProcessingResult, CoreError> {
        let (template_id, raw_args) = split_head(directive);
        if template_id.is_empty() {
            return Err(CoreError::ValidationError(
                "say instruction without a content type".to_string(),
            ));
        }

        let mut args = match parse_say_args(raw_args)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(scope) = session.state.snapshot(event) {
            args.extend(scope);
        }
        let args = Value::Object(args);

        let destination = event.destination();
        let messages = self.renderer.render(template_id, &args, &destination).await?;
        debug!(
            bot_id = %event.bot_id,
            template = %template_id,
            count = messages.len(),
            "Delivering rendered content"
        );
        self.delivery.deliver(&destination, messages).await?;

        Ok(ProcessingResult::none())
    }

    async fn invoke(
        &self,
        call: &str,
        session: &DialogSession,
        event: &DialogEvent,
    ) -> Result<ProcessingResult, CoreError> {
        let (target, raw_args) = split_head(call);
        let (server_id, name) = match target.split_once(':') {
            Some((server, action)) if !server.is_empty() && !action.is_empty() => {
                (Some(server.to_string()), action)
            }
            _ => (None, target),
        };

        let args = if raw_args.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str::<Value>(raw_args).map_err(|e| {
                CoreError::SerializationError(format!("Invalid arguments for action {}: {}", name, e))
            })?
        };
        let args = self
            .templates
            .render_value(&args, &session.state.snapshot(event))?;

        let request = ActionRequest {
            name: name.to_string(),
            server_id,
            event: event.clone(),
            state: session.state.clone(),
            args: args.clone(),
        };

        match self.actions.run(request).await {
            Ok(outcome) if outcome.state != session.state => Ok(ProcessingResult::update(outcome.state)),
            Ok(_) => Ok(ProcessingResult::none()),
            Err(failure) => {
                let mut state = session.state.clone();
                let destination = state
                    .temp
                    .get("onErrorFlowTo")
                    .and_then(Value::as_str)
                    .filter(|flow| !flow.is_empty())
                    .unwrap_or(self.error_flow.as_str())
                    .to_string();

                warn!(
                    bot_id = %event.bot_id,
                    action = %name,
                    error = %failure,
                    destination = %destination,
                    "Action failed, transitioning to error flow"
                );

                state.last_error = Some(ActionErrorRecord {
                    kind: failure.kind,
                    message: failure.message,
                    stack: failure.stack,
                    action_name: name.to_string(),
                    action_args: args,
                });
                Ok(ProcessingResult::transition(destination, Some(state)))
            }
        }
    }
}

#[async_trait]
impl InstructionStrategy for ActionStrategy {
    async fn process(
        &self,
        instruction: &Instruction,
        session: &DialogSession,
        event: &DialogEvent,
    ) -> Result<ProcessingResult, CoreError> {
        let source = instruction.function().trim();
        match source.strip_prefix("say") {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                self.say(rest.trim_start(), session, event).await
            }
            _ => self.invoke(source, session, event).await,
        }
    }
}

/// Splits `head rest...` at the first whitespace
fn split_head(source: &str) -> (&str, &str) {
    match source.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (source, ""),
    }
}

/// `say` arguments are a JSON object or `key=value` pairs
fn parse_say_args(raw: &str) -> Result<Value, CoreError> {
    if raw.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    if raw.starts_with('{') {
        let value: Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(CoreError::ValidationError(
                "say arguments must be a JSON object".to_string(),
            ));
        }
        return Ok(value);
    }

    let mut args = Map::new();
    for pair in raw.split_whitespace() {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            CoreError::ValidationError(format!("Invalid say argument: {}", pair))
        })?;
        args.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(Value::Object(args))
}

/// Evaluates `transition` instructions
pub struct TransitionStrategy {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl TransitionStrategy {
    /// Create a transition strategy
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { evaluator }
    }

    async fn matches(
        &self,
        condition: Condition,
        session: &DialogSession,
        event: &DialogEvent,
    ) -> Result<bool, CoreError> {
        match condition {
            Condition::Always => Ok(true),
            Condition::LastNode(name) => Ok(last_node_is(&session.state.stacktrace, &name)),
            Condition::IntentIs(intent) => Ok(event.intent_name() == Some(intent.as_str())),
            Condition::Expression(source) => {
                let scope = session.state.condition_scope(event);
                match self.evaluator.evaluate(&source, &scope).await {
                    Ok(result) => Ok(result),
                    Err(EvaluationError::TypeError(message)) => {
                        debug!(condition = %source, %message, "Condition raised a type error");
                        Ok(false)
                    }
                    Err(e) => Err(CoreError::ExpressionError(format!("{}: {}", source, e))),
                }
            }
        }
    }
}

/// The entry before the current one, or the only entry of a one-frame trace
fn last_node_is(stacktrace: &[StackFrame], name: &str) -> bool {
    let entry = match stacktrace.len() {
        0 => return false,
        1 => &stacktrace[0],
        n => &stacktrace[n - 2],
    };
    entry.node == name
}

#[async_trait]
impl InstructionStrategy for TransitionStrategy {
    async fn process(
        &self,
        instruction: &Instruction,
        session: &DialogSession,
        event: &DialogEvent,
    ) -> Result<ProcessingResult, CoreError> {
        let Instruction::Transition {
            function,
            destination,
        } = instruction
        else {
            return Err(CoreError::Other(format!(
                "Transition strategy cannot process {:?}",
                instruction.kind()
            )));
        };

        if self.matches(Condition::parse(function), session, event).await? {
            Ok(ProcessingResult::transition(destination.clone(), None))
        } else {
            Ok(ProcessingResult::none())
        }
    }
}

/// Suspends the loop on `wait`
#[derive(Debug, Default, Clone)]
pub struct WaitStrategy;

#[async_trait]
impl InstructionStrategy for WaitStrategy {
    async fn process(
        &self,
        _instruction: &Instruction,
        _session: &DialogSession,
        _event: &DialogEvent,
    ) -> Result<ProcessingResult, CoreError> {
        Ok(ProcessingResult::wait())
    }
}
