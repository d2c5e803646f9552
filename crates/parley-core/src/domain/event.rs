//! Events exchanged between the caller, the flows and the actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::ids::new_uid;

/// Names of the engine-only events
pub mod internal_events {
    /// Start a flow instance
    pub const START_FLOW: &str = "StartFlow";
    /// Stop a flow instance
    pub const STOP_FLOW: &str = "StopFlow";
    /// Pause a flow instance
    pub const PAUSE_FLOW: &str = "PauseFlow";
    /// Resume a paused flow instance
    pub const RESUME_FLOW: &str = "ResumeFlow";
    /// A flow instance started
    pub const FLOW_STARTED: &str = "FlowStarted";
    /// A flow instance ran to its end
    pub const FLOW_FINISHED: &str = "FlowFinished";
    /// A flow instance was stopped or aborted
    pub const FLOW_FAILED: &str = "FlowFailed";
    /// A stepper fault converted into an event
    pub const FLOW_RUNTIME_ERROR: &str = "FlowRuntimeError";

    /// Whether a name designates an internal event
    pub fn is_internal(name: &str) -> bool {
        matches!(
            name,
            START_FLOW
                | STOP_FLOW
                | PAUSE_FLOW
                | RESUME_FLOW
                | FLOW_STARTED
                | FLOW_FINISHED
                | FLOW_FAILED
                | FLOW_RUNTIME_ERROR
        )
    }
}

/// Marker event asking the driver to report the pending async action count
pub const CHECK_LOCAL_ASYNC: &str = "CheckLocalAsync";

/// Output event carrying the pending async action count
pub const LOCAL_ASYNC_COUNTER: &str = "LocalAsyncCounter";

/// Whether an event crosses the wire boundary or stays inside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Visible to the caller and to actions
    External,
    /// Engine-only signal
    Internal,
}

/// An immutable event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `UtteranceUserActionFinished`
    pub name: String,
    /// Event specific arguments
    pub arguments: Map<String, Value>,
    /// Unique id of the event
    pub uid: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Component that produced the event
    pub source_uid: Option<String>,
    /// External or internal
    pub kind: EventKind,
}

impl Event {
    /// Create a new external event
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            uid: new_uid(),
            created_at: Utc::now(),
            source_uid: None,
            kind: EventKind::External,
        }
    }

    /// Create a new internal event
    pub fn internal(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            kind: EventKind::Internal,
            ..Self::new(name, arguments)
        }
    }

    /// Set the producing component
    pub fn with_source(mut self, source_uid: impl Into<String>) -> Self {
        self.source_uid = Some(source_uid.into());
        self
    }

    /// Whether this is an engine-only event
    pub fn is_internal(&self) -> bool {
        self.kind == EventKind::Internal
    }

    /// Get a string argument
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    /// Get a boolean argument
    pub fn bool_arg(&self, key: &str) -> Option<bool> {
        self.arguments.get(key).and_then(Value::as_bool)
    }

    /// The `action_uid` correlation field, if any
    pub fn action_uid(&self) -> Option<&str> {
        self.str_arg("action_uid")
    }

    /// Convert to the wire form: an object with `type` plus the arguments
    pub fn to_wire(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String(self.name.clone()));
        object.insert("uid".into(), Value::String(self.uid.clone()));
        object.insert(
            "event_created_at".into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        if let Some(source_uid) = &self.source_uid {
            object.insert("source_uid".into(), Value::String(source_uid.clone()));
        }
        for (key, value) in &self.arguments {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    /// Parse the wire form. Missing `uid` and timestamp are generated.
    pub fn from_wire(value: Value) -> Result<Self, CoreError> {
        let Value::Object(mut object) = value else {
            return Err(CoreError::InvalidEvent(
                "event must be a JSON object".to_string(),
            ));
        };

        let name = match object.remove("type") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => {
                return Err(CoreError::InvalidEvent(
                    "event is missing a string 'type' field".to_string(),
                ))
            }
        };
        let uid = match object.remove("uid") {
            Some(Value::String(uid)) => uid,
            _ => new_uid(),
        };
        let created_at = match object.remove("event_created_at") {
            Some(Value::String(ts)) => DateTime::parse_from_rfc3339(&ts)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| CoreError::InvalidEvent(format!("invalid timestamp '{}': {}", ts, e)))?,
            _ => Utc::now(),
        };
        let source_uid = match object.remove("source_uid") {
            Some(Value::String(source_uid)) => Some(source_uid),
            _ => None,
        };

        Ok(Self {
            name,
            arguments: object,
            uid,
            created_at,
            source_uid,
            kind: EventKind::External,
        })
    }
}

/// Build an argument map from a `json!` object literal.
///
/// Non-object values yield an empty map.
pub fn arguments(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
