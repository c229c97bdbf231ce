//!
//! Colloquy Core - Dialog execution engine for the Colloquy platform
//!
//! This crate defines the domain model of flow-based conversations, the
//! instruction compiler and queue, the pluggable instruction strategies,
//! the flow navigator and the dialog engine that drives a session from one
//! inbound event to the next suspension point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flows, sessions, instructions and repository contracts
pub mod domain;

/// Application services - compiler, strategies, navigator and engine
pub mod application;

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

// Re-export key types
pub use config::{EngineConfig, ErrorRebuildPolicy};
pub use error::{CoreError, ProcessingError};

pub use domain::flow_definition::{
    CatchAll, FlowDefinition, FlowMutex, NodeContent, NodeDefinition, NodeKind, TransitionRule,
};
pub use domain::instruction::{Instruction, InstructionKind, InstructionQueue};
pub use domain::repository::{FlowFileStorage, FlowRepository, KeyValueStore, SessionRepository};
pub use domain::session::{
    BotId, DialogContext, DialogEvent, DialogSession, DialogState, EventDestination, SessionId,
    StackFrame,
};

pub use application::collaborators::{
    ActionFailure, ActionOutcome, ActionRequest, ActionRuntime, ContentRenderer,
    LoggingErrorHandler, MessageDelivery, OutboundMessage, ProcessingErrorHandler,
};
pub use application::compiler::{compile, CompileOptions};
pub use application::dialog_engine::{DialogEngine, TurnOutcome};
pub use application::expression::{
    Condition, EvaluationError, ExpressionEvaluator, JmesPathEvaluator,
};
pub use application::navigator::{FlowNavigator, NavigationArgs, NavigationPosition};
pub use application::strategy::{
    default_strategies, ActionStrategy, FollowUpAction, InstructionStrategy, ProcessingResult,
    StrategyMap, TransitionStrategy, WaitStrategy,
};
pub use application::template::{PathTemplateRenderer, TemplateRenderer};
