/// Flow and node definitions
pub mod flow_definition;

/// Sessions, dialog context and inbound events
pub mod session;

/// Compiled instructions and the instruction queue
pub mod instruction;

/// Repository interfaces
pub mod repository;
