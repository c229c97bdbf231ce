/// Node to instruction compilation
pub mod compiler;

/// Interfaces of the collaborators the engine drives
pub mod collaborators;

/// Condition parsing and expression evaluation
pub mod expression;

/// `{{path}}` template substitution
pub mod template;

/// Instruction strategies
pub mod strategy;

/// Destination token resolution
pub mod navigator;

/// The dialog execution loop
pub mod dialog_engine;
