use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::action::Action;
use super::event::{internal_events, Event, EventKind};
use super::flow_config::{FlowConfig, MAIN_FLOW_ID};
use super::flow_state::FlowState;
use crate::error::CoreError;
use crate::ids::new_readable_uid;

/// Default bound of the event history
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// Complete mutable snapshot passed between processing cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Flow id to config, in declaration order
    pub flow_configs: IndexMap<String, Arc<FlowConfig>>,
    /// Instance uid to instance, in creation order
    pub flow_states: IndexMap<String, FlowState>,
    /// Flow id to its instances, most recent last
    pub flow_id_states: IndexMap<String, Vec<String>>,
    /// Uid of the main flow instance
    pub main_flow_uid: String,
    /// Actions started in this conversation
    pub actions: IndexMap<String, Action>,
    /// Most recent processed events, oldest first
    pub last_events: Vec<Event>,
    /// Events produced by the current step
    pub outgoing_events: Vec<Event>,
    /// Cross-flow bindings
    pub context: Map<String, Value>,
    #[serde(skip)]
    pub(crate) internal_events: VecDeque<Event>,
}

impl State {
    /// Create a fresh state with a waiting main flow instance
    pub fn new(flow_configs: IndexMap<String, Arc<FlowConfig>>) -> Result<Self, CoreError> {
        if !flow_configs.contains_key(MAIN_FLOW_ID) {
            return Err(CoreError::FlowDefinitionNotFound(MAIN_FLOW_ID.to_string()));
        }

        let main_flow_uid = new_readable_uid(MAIN_FLOW_ID);
        let mut flow_states = IndexMap::new();
        flow_states.insert(
            main_flow_uid.clone(),
            FlowState::new(main_flow_uid.clone(), MAIN_FLOW_ID, None),
        );
        let mut flow_id_states = IndexMap::new();
        flow_id_states.insert(MAIN_FLOW_ID.to_string(), vec![main_flow_uid.clone()]);

        Ok(Self {
            flow_configs,
            flow_states,
            flow_id_states,
            main_flow_uid,
            actions: IndexMap::new(),
            last_events: Vec::new(),
            outgoing_events: Vec::new(),
            context: Map::new(),
            internal_events: VecDeque::new(),
        })
    }

    /// The main flow instance
    pub fn main_flow_state(&self) -> Result<&FlowState, CoreError> {
        self.flow_states
            .get(&self.main_flow_uid)
            .ok_or_else(|| CoreError::FlowInstanceNotFound(self.main_flow_uid.clone()))
    }

    /// Look up an instance
    pub fn flow_state(&self, uid: &str) -> Option<&FlowState> {
        self.flow_states.get(uid)
    }

    /// Instances of a flow, oldest first
    pub fn flow_instances(&self, flow_id: &str) -> Vec<&FlowState> {
        self.flow_id_states
            .get(flow_id)
            .map(|uids| uids.iter().filter_map(|uid| self.flow_states.get(uid)).collect())
            .unwrap_or_default()
    }

    /// Most recent instance of a flow
    pub fn latest_instance(&self, flow_id: &str) -> Option<&FlowState> {
        self.flow_instances(flow_id).into_iter().last()
    }

    /// Register a new instance
    pub fn insert_flow_state(&mut self, flow_state: FlowState) {
        self.flow_id_states
            .entry(flow_state.flow_id.clone())
            .or_default()
            .push(flow_state.uid.clone());
        self.flow_states.insert(flow_state.uid.clone(), flow_state);
    }

    /// Append a processed event to the history
    pub fn record_event(&mut self, event: Event) {
        self.last_events.push(event);
    }

    /// Keep only the most recent `limit` events
    pub fn truncate_history(&mut self, limit: usize) {
        if self.last_events.len() > limit {
            let excess = self.last_events.len() - limit;
            self.last_events.drain(..excess);
        }
    }

    /// Drain the events produced by the last step
    pub fn take_outgoing_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outgoing_events)
    }

    /// Queue an event produced while stepping.
    ///
    /// Internal events stay in the step, external ones leave through
    /// `outgoing_events`.
    pub fn emit(&mut self, event: Event) {
        if event.is_internal() || internal_events::is_internal(&event.name) {
            let mut event = event;
            event.kind = EventKind::Internal;
            self.internal_events.push_back(event);
        } else {
            self.outgoing_events.push(event);
        }
    }

    /// Add or replace a flow config
    pub fn add_flow_config(&mut self, config: FlowConfig) {
        self.flow_configs.insert(config.id.clone(), Arc::new(config));
    }

    /// Remove flow configs and all their instances
    pub fn remove_flows(&mut self, flow_ids: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        for flow_id in flow_ids {
            if flow_id == MAIN_FLOW_ID {
                warn!("The main flow cannot be removed");
                continue;
            }
            if self.flow_configs.shift_remove(flow_id).is_none() {
                continue;
            }
            if let Some(uids) = self.flow_id_states.shift_remove(flow_id) {
                for uid in uids {
                    self.flow_states.shift_remove(&uid);
                }
            }
            removed.push(flow_id.clone());
        }
        removed
    }

    /// Drop finished or stopped flow instances and actions.
    ///
    /// The `keep` most recent terminated instances and actions stay for
    /// diagnostics. Once the main flow is terminal every other instance goes.
    /// Returns the number of removed instances.
    pub fn prune_terminated(&mut self, keep: usize) -> usize {
        let main_done = self
            .flow_states
            .get(&self.main_flow_uid)
            .map_or(true, |main| main.status.is_terminal());

        let mut removable: Vec<String> = self
            .flow_states
            .values()
            .filter(|flow| flow.uid != self.main_flow_uid)
            .filter(|flow| main_done || flow.status.is_terminal())
            .map(|flow| flow.uid.clone())
            .collect();
        if !main_done {
            let excess = removable.len().saturating_sub(keep);
            removable.truncate(excess);
        }
        for uid in &removable {
            self.remove_flow_instance(uid);
        }

        let terminated: Vec<String> = self
            .actions
            .values()
            .filter(|action| action.status.is_terminal())
            .map(|action| action.uid.clone())
            .collect();
        let excess = terminated.len().saturating_sub(keep);
        for action_uid in &terminated[..excess] {
            if let Some(action) = self.actions.shift_remove(action_uid) {
                if let Some(flow) = action.flow_uid.and_then(|uid| self.flow_states.get_mut(&uid)) {
                    flow.action_uids.retain(|uid| uid != action_uid);
                }
            }
        }

        if !removable.is_empty() || excess > 0 {
            debug!(
                flow_instances = removable.len(),
                actions = excess,
                "Pruned terminated flow instances and actions"
            );
        }
        removable.len()
    }

    fn remove_flow_instance(&mut self, uid: &str) {
        let Some(flow) = self.flow_states.shift_remove(uid) else {
            return;
        };
        if let Some(uids) = self.flow_id_states.get_mut(&flow.flow_id) {
            uids.retain(|known| known != uid);
            if uids.is_empty() {
                self.flow_id_states.shift_remove(&flow.flow_id);
            }
        }
        if let Some(parent) = flow.parent_uid.and_then(|parent| self.flow_states.get_mut(&parent)) {
            parent.child_flow_uids.retain(|child| child != uid);
        }
    }

    /// Events waiting inside the current step
    pub fn pending_internal_events(&self) -> usize {
        self.internal_events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow_config::create_flow_configs;
    use crate::domain::action::ActionStatus;
    use crate::domain::flow_definition::{FlowDefinition, FlowElement};
    use crate::domain::flow_state::FlowStatus;

    fn configs() -> IndexMap<String, Arc<FlowConfig>> {
        create_flow_configs(&[
            FlowDefinition::new("main").element(FlowElement::send("Ping", Map::new())),
            FlowDefinition::new("greet").element(FlowElement::send("Hello", Map::new())),
        ])
        .unwrap()
    }

    #[test]
    fn test_new_state_requires_main() {
        let mut configs = configs();
        configs.shift_remove("main");
        assert_eq!(
            State::new(configs).unwrap_err(),
            CoreError::FlowDefinitionNotFound("main".to_string())
        );
    }

    #[test]
    fn test_new_state_has_waiting_main() {
        let state = State::new(configs()).unwrap();
        let main = state.main_flow_state().unwrap();
        assert_eq!(main.flow_id, "main");
        assert_eq!(state.flow_instances("main").len(), 1);
    }

    #[test]
    fn test_truncate_history_keeps_most_recent() {
        let mut state = State::new(configs()).unwrap();
        for index in 0..10 {
            state.record_event(Event::new(format!("E{}", index), Map::new()));
        }
        state.truncate_history(3);
        let names: Vec<&str> = state.last_events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["E7", "E8", "E9"]);
    }

    #[test]
    fn test_emit_routes_by_kind() {
        let mut state = State::new(configs()).unwrap();
        state.emit(Event::new("StartFlow", Map::new()));
        state.emit(Event::new("Ping", Map::new()));

        assert_eq!(state.pending_internal_events(), 1);
        assert_eq!(state.take_outgoing_events().len(), 1);
        assert!(state.outgoing_events.is_empty());
    }

    fn terminated_child(state: &mut State, flow_id: &str, status: FlowStatus) -> String {
        let uid = new_readable_uid(flow_id);
        let mut flow = FlowState::new(uid.clone(), flow_id, Some(state.main_flow_uid.clone()));
        flow.set_status(status);
        state.insert_flow_state(flow);
        let main_uid = state.main_flow_uid.clone();
        state.flow_states[&main_uid].child_flow_uids.push(uid.clone());
        uid
    }

    #[test]
    fn test_prune_keeps_recent_terminated_instances() {
        let mut state = State::new(configs()).unwrap();
        let main_uid = state.main_flow_uid.clone();
        state.flow_states[&main_uid].set_status(FlowStatus::Running);

        let finished: Vec<String> = (0..5)
            .map(|_| terminated_child(&mut state, "greet", FlowStatus::Finished))
            .collect();
        let running = terminated_child(&mut state, "greet", FlowStatus::Running);
        for index in 0..4 {
            let mut action = Action::new("PingAction", Some(main_uid.clone()), Map::new());
            if index < 3 {
                action.status = ActionStatus::Finished;
            }
            state.flow_states[&main_uid].action_uids.push(action.uid.clone());
            state.actions.insert(action.uid.clone(), action);
        }

        assert_eq!(state.prune_terminated(2), 3);

        let kept: Vec<&str> = state.flow_id_states["greet"].iter().map(String::as_str).collect();
        assert_eq!(kept, vec![finished[3].as_str(), finished[4].as_str(), running.as_str()]);
        assert!(!state.flow_states.contains_key(&finished[0]));
        assert_eq!(state.flow_states[&main_uid].child_flow_uids.len(), 3);
        assert_eq!(state.actions.len(), 3);
        assert_eq!(state.flow_states[&main_uid].action_uids.len(), 3);
        assert_eq!(
            state.actions.values().filter(|action| !action.status.is_terminal()).count(),
            1
        );
    }

    #[test]
    fn test_prune_after_main_finished_keeps_only_main() {
        let mut state = State::new(configs()).unwrap();
        let main_uid = state.main_flow_uid.clone();
        terminated_child(&mut state, "greet", FlowStatus::Running);
        terminated_child(&mut state, "greet", FlowStatus::Finished);
        state.flow_states[&main_uid].set_status(FlowStatus::Finished);

        assert_eq!(state.prune_terminated(10), 2);
        assert_eq!(state.flow_states.len(), 1);
        assert!(state.flow_instances("greet").is_empty());
        assert!(state.flow_states[&main_uid].child_flow_uids.is_empty());
        assert_eq!(state.latest_instance("main").unwrap().status, FlowStatus::Finished);
    }

    #[test]
    fn test_remove_flows_keeps_main() {
        let mut state = State::new(configs()).unwrap();
        let removed = state.remove_flows(&["greet".to_string(), "main".to_string(), "nope".to_string()]);
        assert_eq!(removed, vec!["greet".to_string()]);
        assert!(state.flow_configs.contains_key("main"));
    }
}
