//! Action model and action event naming.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event::Event;
use crate::ids::new_uid;

lazy_static! {
    static ref START_ACTION: Regex = Regex::new(r"^Start(\w*Action)$").unwrap();
    static ref STOP_ACTION: Regex = Regex::new(r"^Stop(\w*Action)$").unwrap();
    static ref ACTION_STARTED: Regex = Regex::new(r"^(\w*Action)Started$").unwrap();
    static ref ACTION_UPDATED: Regex = Regex::new(r"^(\w*Action)Updated$").unwrap();
    static ref ACTION_FINISHED: Regex = Regex::new(r"^(\w*Action)Finished$").unwrap();
}

/// Lifecycle event of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionEventKind {
    /// `Start<X>Action`
    Start,
    /// `Stop<X>Action`
    Stop,
    /// `<X>ActionStarted`
    Started,
    /// `<X>ActionUpdated`
    Updated,
    /// `<X>ActionFinished`
    Finished,
}

/// Split an event name into its lifecycle kind and the action name
pub fn parse_action_event(name: &str) -> Option<(ActionEventKind, String)> {
    let patterns: [(&Regex, ActionEventKind); 5] = [
        (&*START_ACTION, ActionEventKind::Start),
        (&*STOP_ACTION, ActionEventKind::Stop),
        (&*ACTION_STARTED, ActionEventKind::Started),
        (&*ACTION_UPDATED, ActionEventKind::Updated),
        (&*ACTION_FINISHED, ActionEventKind::Finished),
    ];

    patterns.iter().find_map(|(regex, kind)| {
        regex
            .captures(name)
            .and_then(|captures| captures.get(1))
            .map(|action_name| (*kind, action_name.as_str().to_string()))
    })
}

/// Status of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Start event emitted, not yet acknowledged
    Created,
    /// The executor acknowledged the start
    Started,
    /// Completed successfully
    Finished,
    /// Completed with a failure
    Failed,
    /// Cancelled before completion
    Stopped,
}

impl ActionStatus {
    /// Whether the action reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Finished | ActionStatus::Failed | ActionStatus::Stopped
        )
    }
}

/// One invocation of a named capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique id
    pub uid: String,
    /// Action name, always ending in `Action`
    pub name: String,
    /// Flow instance that started the action
    pub flow_uid: Option<String>,
    /// Current lifecycle status
    pub status: ActionStatus,
    /// Arguments of the start event
    pub start_event_arguments: Map<String, Value>,
    /// Number of updated events seen
    pub updates: usize,
    /// Value the action finished with
    pub return_value: Option<Value>,
}

impl Action {
    /// Create a new action owned by a flow instance
    pub fn new(
        name: impl Into<String>,
        flow_uid: Option<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            uid: new_uid(),
            name: name.into(),
            flow_uid,
            status: ActionStatus::Created,
            start_event_arguments: arguments,
            updates: 0,
            return_value: None,
        }
    }

    /// Reconstruct an action from its `Start<X>Action` event
    pub fn from_start_event(event: &Event) -> Option<Self> {
        let (kind, name) = parse_action_event(&event.name)?;
        if kind != ActionEventKind::Start {
            return None;
        }
        let mut arguments = event.arguments.clone();
        let uid = match arguments.remove("action_uid") {
            Some(Value::String(uid)) => uid,
            _ => new_uid(),
        };
        Some(Self {
            uid,
            name,
            flow_uid: None,
            status: ActionStatus::Created,
            start_event_arguments: arguments,
            updates: 0,
            return_value: None,
        })
    }

    fn lifecycle_event(&self, name: String, arguments: Map<String, Value>) -> Event {
        let mut arguments = arguments;
        arguments.insert("action_uid".into(), Value::String(self.uid.clone()));
        Event::new(name, arguments)
    }

    /// `Start<X>Action` carrying the start arguments
    pub fn start_event(&self) -> Event {
        self.lifecycle_event(format!("Start{}", self.name), self.start_event_arguments.clone())
    }

    /// `Stop<X>Action`
    pub fn stop_event(&self) -> Event {
        self.lifecycle_event(format!("Stop{}", self.name), Map::new())
    }

    /// `<X>ActionStarted`
    pub fn started_event(&self, arguments: Map<String, Value>) -> Event {
        self.lifecycle_event(format!("{}Started", self.name), arguments)
    }

    /// `<X>ActionUpdated`
    pub fn updated_event(&self, arguments: Map<String, Value>) -> Event {
        self.lifecycle_event(format!("{}Updated", self.name), arguments)
    }

    /// `<X>ActionFinished`
    pub fn finished_event(&self, arguments: Map<String, Value>) -> Event {
        self.lifecycle_event(format!("{}Finished", self.name), arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::arguments;
    use serde_json::json;

    #[test]
    fn test_parse_action_event_names() {
        let cases = vec![
            ("StartUtteranceBotAction", Some((ActionEventKind::Start, "UtteranceBotAction"))),
            ("StopUtteranceBotAction", Some((ActionEventKind::Stop, "UtteranceBotAction"))),
            ("UtteranceBotActionStarted", Some((ActionEventKind::Started, "UtteranceBotAction"))),
            ("CustomAsyncTestActionUpdated", Some((ActionEventKind::Updated, "CustomAsyncTestAction"))),
            ("UtteranceBotActionFinished", Some((ActionEventKind::Finished, "UtteranceBotAction"))),
            ("StartFlow", None),
            ("UtteranceBotActionScriptUpdatedX", None),
        ];

        for (name, expected) in cases {
            let parsed = parse_action_event(name);
            assert_eq!(
                parsed,
                expected.map(|(kind, action)| (kind, action.to_string())),
                "unexpected parse for {}",
                name
            );
        }
    }

    #[test]
    fn test_from_start_event_uses_action_uid() {
        let event = Event::new(
            "StartUtteranceBotAction",
            arguments(json!({"action_uid": "a-1", "script": "Hello"})),
        );
        let action = Action::from_start_event(&event).unwrap();

        assert_eq!(action.uid, "a-1");
        assert_eq!(action.name, "UtteranceBotAction");
        assert_eq!(action.start_event_arguments["script"], "Hello");
        assert!(!action.start_event_arguments.contains_key("action_uid"));
    }

    #[test]
    fn test_lifecycle_event_names() {
        let action = Action::new("FetchNameAction", None, Map::new());

        assert_eq!(action.start_event().name, "StartFetchNameAction");
        assert_eq!(action.stop_event().name, "StopFetchNameAction");
        assert_eq!(action.started_event(Map::new()).name, "FetchNameActionStarted");
        assert_eq!(action.updated_event(Map::new()).name, "FetchNameActionUpdated");
        let finished = action.finished_event(Map::new());
        assert_eq!(finished.name, "FetchNameActionFinished");
        assert_eq!(finished.action_uid(), Some(action.uid.as_str()));
    }
}
