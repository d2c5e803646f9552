use std::fmt;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::domain::event::{internal_events, Event};

/// Core error type for the Parley runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A flow name starts with a reserved instruction keyword
    #[error("Flow '{name}' starts with keyword '{keyword}'")]
    ReservedKeyword {
        /// Offending flow name
        name: String,
        /// Keyword the name starts with
        keyword: String,
    },

    /// More than one non-override definition exists for a name
    #[error("Multiple non-overriding flows with name '{0}' detected")]
    DuplicateFlow(String),

    /// More than one override definition exists for a name
    #[error("Multiple override flows with name '{0}' detected")]
    DuplicateOverride(String),

    /// An override targets a name without a base definition
    #[error("Override flow with name '{0}' does not override any flow with that name")]
    OrphanOverride(String),

    /// A flow element is malformed
    #[error("Invalid element in flow '{flow_id}': {message}")]
    InvalidElement {
        /// Flow containing the element
        flow_id: String,
        /// What is wrong with it
        message: String,
    },

    /// Flow definition not found
    #[error("Flow definition not found: {0}")]
    FlowDefinitionNotFound(String),

    /// Flow instance not found
    #[error("Flow instance not found: {0}")]
    FlowInstanceNotFound(String),

    /// Error while parsing flow source text
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid wire-form event
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

/// Category of a fault raised while stepping flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A `$variable` reference could not be resolved
    MissingVariable,
    /// A flow was started that has no config
    UnknownFlow,
    /// A reference variable does not point at an action or flow instance
    InvalidReference,
    /// A value has the wrong shape for the instruction using it
    TypeMismatch,
    /// A head executed too many instructions without blocking
    SlideLimitExceeded,
    /// A single step produced too many internal events
    InternalEventLimitExceeded,
}

impl FaultKind {
    /// Name used for the `type` argument of the error event
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::MissingVariable => "MissingVariable",
            FaultKind::UnknownFlow => "UnknownFlow",
            FaultKind::InvalidReference => "InvalidReference",
            FaultKind::TypeMismatch => "TypeMismatch",
            FaultKind::SlideLimitExceeded => "SlideLimitExceeded",
            FaultKind::InternalEventLimitExceeded => "InternalEventLimitExceeded",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault raised by the stepper.
///
/// The stepper never swallows these. The driver turns them into a
/// `FlowRuntimeError` event and steps again with it so flows can match on it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct RuntimeFault {
    /// Fault category
    pub kind: FaultKind,
    /// Human readable description
    pub message: String,
    /// Flow that raised the fault, if any
    pub flow_id: Option<String>,
    /// Flow instance that raised the fault, if any
    pub flow_instance_uid: Option<String>,
}

impl RuntimeFault {
    /// Create a fault that is not tied to a flow instance
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            flow_id: None,
            flow_instance_uid: None,
        }
    }

    /// Attach the flow instance that raised the fault
    pub fn in_flow(mut self, flow_id: &str, flow_instance_uid: &str) -> Self {
        if self.flow_instance_uid.is_none() {
            self.flow_id = Some(flow_id.to_string());
            self.flow_instance_uid = Some(flow_instance_uid.to_string());
        }
        self
    }

    /// Build the internal error event fed back into the flow graph
    pub fn to_event(&self) -> Event {
        let mut arguments = Map::new();
        arguments.insert("type".into(), json!(self.kind.as_str()));
        arguments.insert("error".into(), json!(self.message));
        if let Some(flow_id) = &self.flow_id {
            arguments.insert("flow_id".into(), json!(flow_id));
        }
        if let Some(uid) = &self.flow_instance_uid {
            arguments.insert("flow_instance_uid".into(), Value::String(uid.clone()));
        }
        Event::internal(internal_events::FLOW_RUNTIME_ERROR, arguments)
    }
}

/// Result of a single stepper invocation
pub type StepResult = Result<(), RuntimeFault>;
