//! The flow state machine.
//!
//! [`run_to_completion`] takes one event and advances every head blocked on
//! a matching pattern, then keeps processing the internal events this
//! produces until nothing else can move. External events produced on the way
//! are left in [`State::outgoing_events`] for the caller to drain.

mod matching;
mod slide;

use serde_json::{json, Map, Value};
use tracing::{debug, trace, warn};

use crate::domain::action::{parse_action_event, Action, ActionEventKind, ActionStatus};
use crate::domain::event::{internal_events, Event};
use crate::domain::flow_state::{FlowHead, FlowStatus, FlowState};
use crate::domain::state::State;
use crate::error::{FaultKind, RuntimeFault, StepResult};
use crate::ids::new_readable_uid;

pub use matching::{arguments_conform, pattern_matches, value_conforms};

/// Upper bound of internal events processed in one step
pub const MAX_INTERNAL_EVENTS_PER_STEP: usize = 10_000;

/// Upper bound of instructions a head executes without blocking
pub const MAX_SLIDE_STEPS: usize = 10_000;

/// Advance the flows on `event` until quiescence.
///
/// Internal events left over from a previously faulted step are processed
/// after `event`.
pub fn run_to_completion(state: &mut State, event: Event) -> StepResult {
    debug!(event = %event.name, "Processing event");
    state.internal_events.push_front(event);

    let mut processed = 0usize;
    while let Some(event) = state.internal_events.pop_front() {
        processed += 1;
        if processed > MAX_INTERNAL_EVENTS_PER_STEP {
            state.internal_events.clear();
            return Err(RuntimeFault::new(
                FaultKind::InternalEventLimitExceeded,
                format!(
                    "More than {} internal events in a single step",
                    MAX_INTERNAL_EVENTS_PER_STEP
                ),
            ));
        }
        process_event(state, &event)?;
    }
    Ok(())
}

fn process_event(state: &mut State, event: &Event) -> StepResult {
    trace!(event = %event.name, "Step event");

    match event.name.as_str() {
        internal_events::START_FLOW => start_flow(state, event)?,
        internal_events::STOP_FLOW => {
            if let Some(uid) = event.str_arg("flow_instance_uid") {
                let reason = event.str_arg("reason").map(str::to_string);
                terminate_flow(state, uid, Termination::Stopped(reason));
            }
        }
        internal_events::PAUSE_FLOW => set_paused(state, event, true),
        internal_events::RESUME_FLOW => set_paused(state, event, false),
        internal_events::FLOW_FAILED => propagate_child_failure(state, event),
        _ => track_action_event(state, event),
    }

    let matches = matching::find_matching_heads(state, event);
    let mut first_fault = None;
    for (flow_uid, head_uid) in matches {
        if let Err(fault) = advance_head(state, &flow_uid, &head_uid, event) {
            first_fault.get_or_insert(fault);
        }
    }
    match first_fault {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

fn start_flow(state: &mut State, event: &Event) -> StepResult {
    let flow_id = event.str_arg("flow_id").ok_or_else(|| {
        RuntimeFault::new(FaultKind::TypeMismatch, "StartFlow event without a 'flow_id'")
    })?;
    let config = state.flow_configs.get(flow_id).cloned().ok_or_else(|| {
        RuntimeFault::new(FaultKind::UnknownFlow, format!("Flow '{}' does not exist", flow_id))
    })?;

    let uid = event
        .str_arg("flow_instance_uid")
        .map(str::to_string)
        .unwrap_or_else(|| new_readable_uid(flow_id));
    let parent_uid = event.str_arg("source_flow_instance_uid").map(str::to_string);
    let activated = event.bool_arg("activated").unwrap_or(false);
    let arguments = match event.arguments.get("arguments") {
        Some(Value::Object(arguments)) => arguments.clone(),
        _ => Map::new(),
    };

    match state.flow_states.get(&uid) {
        Some(existing) if existing.status != FlowStatus::Waiting => {
            warn!(flow_id = %flow_id, flow_instance_uid = %uid, "Flow instance already started");
            return Ok(());
        }
        Some(_) => {}
        None => state.insert_flow_state(FlowState::new(uid.clone(), flow_id, parent_uid.clone())),
    }
    if let Some(parent) = parent_uid.as_deref().and_then(|p| state.flow_states.get_mut(p)) {
        parent.child_flow_uids.push(uid.clone());
    }

    let head = FlowHead::new(0);
    let head_uid = head.uid.clone();
    if let Some(flow) = state.flow_states.get_mut(&uid) {
        flow.set_status(FlowStatus::Starting);
        flow.activated = activated;
        for parameter in &config.parameters {
            let value = arguments
                .get(&parameter.name)
                .cloned()
                .or_else(|| parameter.default.clone())
                .unwrap_or(Value::Null);
            flow.context.insert(parameter.name.clone(), value);
        }
        for (key, value) in &arguments {
            flow.context.entry(key.clone()).or_insert_with(|| value.clone());
        }
        flow.arguments = arguments;
        flow.heads = vec![head];
    }

    debug!(flow_id = %flow_id, flow_instance_uid = %uid, "Flow started");
    let mut started = Map::new();
    started.insert("flow_id".into(), json!(flow_id));
    started.insert("flow_instance_uid".into(), json!(uid));
    if let Some(parent) = &parent_uid {
        started.insert("source_flow_instance_uid".into(), json!(parent));
    }
    state.emit(Event::internal(internal_events::FLOW_STARTED, started));

    if let Some(flow) = state.flow_states.get_mut(&uid) {
        flow.set_status(FlowStatus::Running);
    }
    slide::slide_heads(state, &uid, vec![head_uid])
}

/// How a flow instance ends
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Termination {
    Finished,
    Stopped(Option<String>),
}

/// Move a flow instance to a terminal status.
///
/// Running children get a `StopFlow`, unfinished actions a stop event.
pub(crate) fn terminate_flow(state: &mut State, uid: &str, termination: Termination) {
    let Some(flow) = state.flow_states.get_mut(uid) else {
        return;
    };
    if flow.status.is_terminal() {
        return;
    }

    let status = match termination {
        Termination::Finished => FlowStatus::Finished,
        Termination::Stopped(_) => FlowStatus::Stopped,
    };
    flow.set_status(status);
    flow.heads.clear();

    let flow_id = flow.flow_id.clone();
    let parent_uid = flow.parent_uid.clone();
    let children = flow.child_flow_uids.clone();
    let action_uids = flow.action_uids.clone();
    let restart = flow.activated && termination == Termination::Finished;
    let matched_events = flow.matched_events;
    let arguments = flow.arguments.clone();
    let return_value = flow.return_value.clone().unwrap_or(Value::Null);
    let return_members: Map<String, Value> = state
        .flow_configs
        .get(&flow_id)
        .map(|config| {
            config
                .return_members
                .iter()
                .map(|member| {
                    let value = flow.context.get(member).cloned().unwrap_or(Value::Null);
                    (member.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    for child in children {
        let running = state
            .flow_states
            .get(&child)
            .map_or(false, |child| !child.status.is_terminal());
        if running {
            let mut arguments = Map::new();
            arguments.insert("flow_instance_uid".into(), json!(child));
            state.emit(Event::internal(internal_events::STOP_FLOW, arguments));
        }
    }
    let stop_events: Vec<Event> = action_uids
        .iter()
        .filter_map(|action_uid| state.actions.get(action_uid))
        .filter(|action| !action.status.is_terminal())
        .map(Action::stop_event)
        .collect();
    for stop_event in stop_events {
        state.emit(stop_event);
    }

    let mut arguments_out = Map::new();
    arguments_out.insert("flow_id".into(), json!(flow_id));
    arguments_out.insert("flow_instance_uid".into(), json!(uid));
    if let Some(parent) = &parent_uid {
        arguments_out.insert("source_flow_instance_uid".into(), json!(parent));
    }
    match termination {
        Termination::Finished => {
            debug!(flow_id = %flow_id, flow_instance_uid = %uid, "Flow finished");
            arguments_out.insert("return_value".into(), return_value);
            arguments_out.insert("return_members".into(), Value::Object(return_members));
            state.emit(Event::internal(internal_events::FLOW_FINISHED, arguments_out));
        }
        Termination::Stopped(reason) => {
            debug!(flow_id = %flow_id, flow_instance_uid = %uid, "Flow stopped");
            if let Some(reason) = reason {
                arguments_out.insert("reason".into(), json!(reason));
            }
            state.emit(Event::internal(internal_events::FLOW_FAILED, arguments_out));
        }
    }

    if restart {
        if matched_events == 0 {
            warn!(flow_id = %flow_id, "Activated flow finished without matching any event, not restarting");
            return;
        }
        let mut start = Map::new();
        start.insert("flow_id".into(), json!(flow_id));
        start.insert("flow_instance_uid".into(), json!(new_readable_uid(&flow_id)));
        if let Some(parent) = &parent_uid {
            start.insert("source_flow_instance_uid".into(), json!(parent));
        }
        start.insert("activated".into(), json!(true));
        start.insert("arguments".into(), Value::Object(arguments));
        state.emit(Event::internal(internal_events::START_FLOW, start));
    }
}

fn set_paused(state: &mut State, event: &Event, paused: bool) {
    let Some(flow) = event
        .str_arg("flow_instance_uid")
        .and_then(|uid| state.flow_states.get_mut(uid))
    else {
        return;
    };
    match (paused, flow.status) {
        (true, FlowStatus::Running) => flow.set_status(FlowStatus::Paused),
        (false, FlowStatus::Paused) => flow.set_status(FlowStatus::Running),
        _ => {}
    }
}

/// Flows awaiting a failed child fail as well
fn propagate_child_failure(state: &mut State, event: &Event) {
    let Some(failed_uid) = event.str_arg("flow_instance_uid") else {
        return;
    };
    let awaiting: Vec<String> = state
        .flow_states
        .values()
        .filter(|flow| flow.is_matching())
        .filter(|flow| {
            flow.heads.iter().any(|head| {
                head.is_waiting()
                    && head.blocked_on.as_ref().map_or(false, |pattern| {
                        pattern.event == internal_events::FLOW_FINISHED
                            && pattern.flow_instance_uid.as_deref() == Some(failed_uid)
                    })
            })
        })
        .map(|flow| flow.uid.clone())
        .collect();

    for uid in awaiting {
        let reason = format!("Awaited flow instance '{}' failed", failed_uid);
        terminate_flow(state, &uid, Termination::Stopped(Some(reason)));
    }
}

/// Keep `State::actions` in sync with the action lifecycle events
fn track_action_event(state: &mut State, event: &Event) {
    let Some((kind, _)) = parse_action_event(&event.name) else {
        return;
    };
    let Some(action_uid) = event.action_uid() else {
        return;
    };

    if kind == ActionEventKind::Finished {
        if let Some(Value::Object(updates)) = event.arguments.get("context_updates") {
            for (key, value) in updates {
                state.context.insert(key.clone(), value.clone());
            }
        }
    }

    if kind == ActionEventKind::Start && !state.actions.contains_key(action_uid) {
        if let Some(action) = Action::from_start_event(event) {
            state.actions.insert(action.uid.clone(), action);
        }
        return;
    }

    let Some(action) = state.actions.get_mut(action_uid) else {
        return;
    };
    match kind {
        ActionEventKind::Started if action.status == ActionStatus::Created => {
            action.status = ActionStatus::Started;
        }
        ActionEventKind::Updated => action.updates += 1,
        ActionEventKind::Finished => {
            action.status = if event.bool_arg("was_stopped").unwrap_or(false) {
                ActionStatus::Stopped
            } else if event.bool_arg("is_success") == Some(false)
                || event.str_arg("status") == Some("failed")
            {
                ActionStatus::Failed
            } else {
                ActionStatus::Finished
            };
            action.return_value = event.arguments.get("return_value").cloned();
        }
        _ => {}
    }
}

fn advance_head(state: &mut State, flow_uid: &str, head_uid: &str, event: &Event) -> StepResult {
    let Some(flow) = state.flow_states.get_mut(flow_uid) else {
        return Ok(());
    };
    if !flow.is_matching() {
        return Ok(());
    }
    let Some(head) = flow.head_mut(head_uid) else {
        return Ok(());
    };
    let Some(pattern) = head.blocked_on.take() else {
        return Ok(());
    };
    head.position += 1;

    if let Some(binding) = pattern.bind {
        let value = match &binding.field {
            Some(field) => event.arguments.get(field).cloned().unwrap_or(Value::Null),
            None => Value::Object(event.arguments.clone()),
        };
        flow.context.insert(binding.variable, value);
    }
    flow.matched_events += 1;
    trace!(flow_id = %flow.flow_id, flow_instance_uid = %flow_uid, event = %event.name, "Head advanced");

    slide::slide_heads(state, flow_uid, vec![head_uid.to_string()])
}
