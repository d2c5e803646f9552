//!
//! Parley Runtime - event-processing driver and action execution
//!
//! This crate drives conversations: it feeds events through the flow state
//! machine, runs the actions flows start as tokio tasks and reports back
//! the events the outside world has to see.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Action registry, invocation contract and remote execution
pub mod actions;

/// Runtime configuration
pub mod config;

/// Error types
pub mod error;

/// Tracing subscriber setup
pub mod logging;

/// Bookkeeping of running local actions
pub mod local;

/// The processing cycle
pub mod runtime;

/// Engine-owned actions
pub mod system_actions;

/// Event observers
pub mod watcher;

pub use actions::{
    ActionCapability, ActionDispatcher, ActionEventHandler, ActionHandler, ActionInvocation,
    ActionMeta, ActionResult, ExecutionStatus, FnAction, RemoteActionClient,
};
pub use config::{LoggingConfig, RuntimeConfig};
pub use error::{ActionError, RuntimeError, RuntimeResult};
pub use logging::init_logging;
pub use runtime::Runtime;
pub use system_actions::SystemAction;
pub use watcher::{EventWatcher, LoggingWatcher};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
