//! Live flow instances and their heads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::flow_config::Binding;
use crate::ids::new_uid;

/// Status of a flow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    /// Created but not yet started
    Waiting,
    /// Start event is being processed
    Starting,
    /// Heads are live
    Running,
    /// Heads are kept but do not match
    Paused,
    /// Ran to its end
    Finished,
    /// Aborted or stopped from outside
    Stopped,
}

impl FlowStatus {
    /// Finished or stopped
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowStatus::Finished | FlowStatus::Stopped)
    }
}

/// Status of a head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadStatus {
    /// Executing or blocked on a pattern
    Active,
    /// Parked after raising a fault
    Faulted,
}

/// A resolved pattern a head is blocked on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPattern {
    /// Event name
    pub event: String,
    /// Expected argument values, a subset of the event arguments
    pub arguments: Map<String, Value>,
    /// Required `action_uid`
    pub action_uid: Option<String>,
    /// Required `flow_instance_uid`
    pub flow_instance_uid: Option<String>,
    /// Where to store the match
    pub bind: Option<Binding>,
}

/// An instruction pointer inside a flow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowHead {
    /// Unique id
    pub uid: String,
    /// Index into the config's elements
    pub position: usize,
    /// Head status
    pub status: HeadStatus,
    /// Forks this head belongs to, innermost last
    pub fork_ids: Vec<String>,
    /// Fork this head is parked at, waiting for its siblings
    pub merging_on: Option<String>,
    /// Pattern the head waits for
    pub blocked_on: Option<EventPattern>,
    /// Actions the head started inside forks
    #[serde(default)]
    pub forked_actions: Vec<ForkedAction>,
}

/// An action started by a head while it belonged to forks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkedAction {
    /// Action uid
    pub action_uid: String,
    /// Forks the head belonged to when it started the action
    pub fork_ids: Vec<String>,
}

impl FlowHead {
    /// New head at a position
    pub fn new(position: usize) -> Self {
        Self {
            uid: new_uid(),
            position,
            status: HeadStatus::Active,
            fork_ids: Vec::new(),
            merging_on: None,
            blocked_on: None,
            forked_actions: Vec::new(),
        }
    }

    /// Whether the head can match events
    pub fn is_waiting(&self) -> bool {
        self.status == HeadStatus::Active && self.merging_on.is_none() && self.blocked_on.is_some()
    }
}

/// A live instantiation of a flow config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    /// Unique id
    pub uid: String,
    /// Config name
    pub flow_id: String,
    /// Instruction pointers
    pub heads: Vec<FlowHead>,
    /// Status
    pub status: FlowStatus,
    /// Local bindings
    pub context: Map<String, Value>,
    /// Arguments the flow was started with
    pub arguments: Map<String, Value>,
    /// Parent instance
    pub parent_uid: Option<String>,
    /// Child instances, in start order
    pub child_flow_uids: Vec<String>,
    /// Actions started by this instance
    pub action_uids: Vec<String>,
    /// Restart when finished
    pub activated: bool,
    /// Events matched so far
    pub matched_events: usize,
    /// Value reported when finished
    pub return_value: Option<Value>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub status_updated_at: DateTime<Utc>,
}

impl FlowState {
    /// Create a waiting instance
    pub fn new(uid: impl Into<String>, flow_id: impl Into<String>, parent_uid: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            uid: uid.into(),
            flow_id: flow_id.into(),
            heads: Vec::new(),
            status: FlowStatus::Waiting,
            context: Map::new(),
            arguments: Map::new(),
            parent_uid,
            child_flow_uids: Vec::new(),
            action_uids: Vec::new(),
            activated: false,
            matched_events: 0,
            return_value: None,
            created_at: now,
            status_updated_at: now,
        }
    }

    /// Change the status
    pub fn set_status(&mut self, status: FlowStatus) {
        if self.status != status {
            tracing::trace!(flow_id = %self.flow_id, flow_instance_uid = %self.uid, from = ?self.status, to = ?status, "Flow status changed");
            self.status = status;
            self.status_updated_at = Utc::now();
        }
    }

    /// Whether heads can match events
    pub fn is_matching(&self) -> bool {
        self.status == FlowStatus::Running
    }

    /// Look up a head
    pub fn head(&self, uid: &str) -> Option<&FlowHead> {
        self.heads.iter().find(|head| head.uid == uid)
    }

    /// Look up a head mutably
    pub fn head_mut(&mut self, uid: &str) -> Option<&mut FlowHead> {
        self.heads.iter_mut().find(|head| head.uid == uid)
    }

    /// Patterns the heads are currently blocked on
    pub fn blocking_patterns(&self) -> Vec<(&str, &EventPattern)> {
        self.heads
            .iter()
            .filter(|head| head.is_waiting())
            .filter_map(|head| head.blocked_on.as_ref().map(|p| (head.uid.as_str(), p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flow_state_is_waiting() {
        let state = FlowState::new("u1", "main", None);
        assert_eq!(state.status, FlowStatus::Waiting);
        assert!(!state.is_matching());
        assert!(state.heads.is_empty());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(FlowStatus::Finished.is_terminal());
        assert!(FlowStatus::Stopped.is_terminal());
        assert!(!FlowStatus::Paused.is_terminal());
    }

    #[test]
    fn test_blocking_patterns_skip_faulted_heads() {
        let mut state = FlowState::new("u1", "main", None);
        let pattern = EventPattern {
            event: "Ping".into(),
            arguments: Map::new(),
            action_uid: None,
            flow_instance_uid: None,
            bind: None,
        };

        let mut waiting = FlowHead::new(0);
        waiting.blocked_on = Some(pattern.clone());
        let mut faulted = FlowHead::new(1);
        faulted.blocked_on = Some(pattern);
        faulted.status = HeadStatus::Faulted;
        state.heads = vec![waiting.clone(), faulted];

        let patterns = state.blocking_patterns();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].0, waiting.uid);
    }
}
