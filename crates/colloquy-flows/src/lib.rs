//!
//! Colloquy Flows - Flow definition store for the Colloquy platform
//!
//! Parses `.flow.json` files and their `.ui.json` layouts, caches the
//! parsed flows per bot, guards edits with expiring locks and notifies
//! listeners of every change. [`FlowStore`] implements the engine's
//! [`colloquy_core::FlowRepository`] contract.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Per-bot flow cache
pub mod cache;

/// Store configuration
pub mod config;

/// Error types
pub mod error;

/// Filesystem storage
pub mod file;

/// Edit hooks and change notifications
pub mod hooks;

/// Node placement and layout files
pub mod layout;

/// Editing locks
pub mod lock;

/// The flow store
pub mod store;

pub use cache::BotFlows;
pub use config::FlowStoreConfig;
pub use error::{FlowStoreError, FlowStoreResult};
pub use file::FsFlowStorage;
pub use hooks::{FlowHooks, FlowInvalidation, FlowModification, ModificationKind, NoopHooks};
pub use layout::{apply_layout, FlowLayout, NodeLayout, Position};
pub use lock::{mutex_key, Clock, FlowLock, ManualClock, SystemClock};
pub use store::FlowStore;
