//! Action contract: capabilities, invocations, results and handlers.
//!
//! A handler declares up front which runtime values it needs through
//! [`ActionCapability`]; the runtime fills exactly those fields of the
//! [`ActionInvocation`] before calling it.

mod dispatcher;
mod event_handler;
mod remote;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{Action, Event};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RuntimeConfig;
use crate::error::ActionError;

pub use dispatcher::ActionDispatcher;
pub use event_handler::ActionEventHandler;
pub use remote::RemoteActionClient;

/// Runtime values a handler can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCapability {
    /// Snapshot of the recent event history
    Events,
    /// Bidirectional event channel with the flows
    EventHandler,
    /// The action record itself
    Action,
    /// Snapshot of the global context
    Context,
    /// The runtime configuration
    Config,
}

/// Registration metadata of an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMeta {
    /// Action name, ending in `Action`
    pub name: String,
    /// Never sent to the remote actions server
    #[serde(default)]
    pub is_system_action: bool,
    /// Runs in the background instead of blocking the cycle
    #[serde(default)]
    pub execute_async: bool,
    /// Values the handler needs
    #[serde(default)]
    pub capabilities: Vec<ActionCapability>,
}

impl ActionMeta {
    /// Synchronous, non-system action without capabilities
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_system_action: false,
            execute_async: false,
            capabilities: Vec::new(),
        }
    }

    /// Mark as system action
    pub fn system(mut self) -> Self {
        self.is_system_action = true;
        self
    }

    /// Mark as asynchronous
    pub fn asynchronous(mut self) -> Self {
        self.execute_async = true;
        self
    }

    /// Request a capability
    pub fn with_capability(mut self, capability: ActionCapability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Whether a capability was requested
    pub fn needs(&self, capability: ActionCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Outcome reported by the action registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The handler completed
    Success,
    /// The handler failed
    Failed,
}

impl ExecutionStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// Value an action finishes with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Reported as `return_value` of the finished event
    #[serde(default)]
    pub return_value: Value,
    /// Reported as `events` of the finished event
    #[serde(default)]
    pub events: Vec<Event>,
    /// Merged into the global context when the finished event is processed
    #[serde(default)]
    pub context_updates: Map<String, Value>,
}

impl ActionResult {
    /// Result carrying only a return value
    pub fn value(return_value: impl Into<Value>) -> Self {
        Self {
            return_value: return_value.into(),
            ..Self::default()
        }
    }

    /// Add a context update
    pub fn with_context_update(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context_updates.insert(key.into(), value.into());
        self
    }
}

/// Everything handed to a handler for one execution
#[derive(Debug)]
pub struct ActionInvocation {
    /// Action name
    pub action_name: String,
    /// Start arguments, `$name` references already resolved
    pub arguments: Map<String, Value>,
    /// Parameters registered on the runtime
    pub params: Map<String, Value>,
    /// Filled for [`ActionCapability::Events`]
    pub events: Option<Vec<Event>>,
    /// Filled for [`ActionCapability::EventHandler`]
    pub event_handler: Option<ActionEventHandler>,
    /// Filled for [`ActionCapability::Action`]
    pub action: Option<Action>,
    /// Filled for [`ActionCapability::Context`]
    pub context: Option<Map<String, Value>>,
    /// Filled for [`ActionCapability::Config`]
    pub config: Option<Arc<RuntimeConfig>>,
}

impl ActionInvocation {
    /// Invocation with arguments only
    pub fn new(action_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            action_name: action_name.into(),
            arguments,
            params: Map::new(),
            events: None,
            event_handler: None,
            action: None,
            context: None,
            config: None,
        }
    }

    /// A string argument
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    /// A string argument that must be present
    pub fn require_str(&self, key: &str) -> Result<&str, ActionError> {
        self.str_arg(key).ok_or_else(|| {
            ActionError::InvalidParameters(format!(
                "{} requires a string argument '{}'",
                self.action_name, key
            ))
        })
    }

    /// Take the event handler out of the invocation
    pub fn take_event_handler(&mut self) -> Result<ActionEventHandler, ActionError> {
        self.event_handler.take().ok_or_else(|| {
            ActionError::InvalidParameters(format!(
                "{} did not declare the event handler capability",
                self.action_name
            ))
        })
    }
}

/// An invocable action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action to completion
    async fn execute(&self, invocation: ActionInvocation) -> Result<ActionResult, ActionError>;
}

/// Adapter turning an async closure into an [`ActionHandler`]
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F, Fut> ActionHandler for FnAction<F>
where
    F: Fn(ActionInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionResult, ActionError>> + Send + 'static,
{
    async fn execute(&self, invocation: ActionInvocation) -> Result<ActionResult, ActionError> {
        (self.0)(invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_builder() {
        let meta = ActionMeta::new("CustomAsyncAction")
            .asynchronous()
            .with_capability(ActionCapability::EventHandler)
            .with_capability(ActionCapability::EventHandler);

        assert!(meta.execute_async);
        assert!(!meta.is_system_action);
        assert_eq!(meta.capabilities, vec![ActionCapability::EventHandler]);
        assert!(!meta.needs(ActionCapability::Context));
    }

    #[test]
    fn test_invocation_arguments() {
        let mut invocation = ActionInvocation::new(
            "GreetAction",
            parley_core::arguments(json!({"name": "Ada", "count": 2})),
        );

        assert_eq!(invocation.require_str("name").unwrap(), "Ada");
        assert!(matches!(
            invocation.require_str("count"),
            Err(ActionError::InvalidParameters(_))
        ));
        assert!(invocation.take_event_handler().is_err());
    }
}
