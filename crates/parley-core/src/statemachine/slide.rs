use std::collections::VecDeque;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::matching::resolve_pattern;
use super::{terminate_flow, Termination, MAX_SLIDE_STEPS};
use crate::domain::action::Action;
use crate::domain::event::{internal_events, Event};
use crate::domain::expression::{resolve_map, resolve_value, Scope};
use crate::domain::flow_config::{Element, FlowConfig, JoinMode};
use crate::domain::flow_state::{FlowHead, ForkedAction, HeadStatus};
use crate::domain::state::State;
use crate::error::{FaultKind, RuntimeFault, StepResult};
use crate::ids::new_readable_uid;

/// Run heads forward until each blocks, merges or ends its flow.
///
/// A head that faults is parked. The other heads still slide and the first
/// fault is returned.
pub(crate) fn slide_heads(state: &mut State, flow_uid: &str, heads: Vec<String>) -> StepResult {
    let mut worklist: VecDeque<String> = heads.into();
    let mut first_fault = None;

    while let Some(head_uid) = worklist.pop_front() {
        if let Err(fault) = slide_head(state, flow_uid, &head_uid, &mut worklist) {
            let fault = match state.flow_states.get_mut(flow_uid) {
                Some(flow) => {
                    if let Some(head) = flow.head_mut(&head_uid) {
                        head.status = HeadStatus::Faulted;
                    }
                    fault.in_flow(&flow.flow_id, flow_uid)
                }
                None => fault,
            };
            first_fault.get_or_insert(fault);
        }
    }

    match first_fault {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

fn scope<'a>(state: &'a State, flow_uid: &str, empty: &'a Map<String, Value>) -> Scope<'a> {
    let local = state.flow_states.get(flow_uid).map_or(empty, |flow| &flow.context);
    Scope::new(local, &state.context)
}

fn label_position(config: &FlowConfig, label: &str) -> Result<usize, RuntimeFault> {
    config.label_position(label).ok_or_else(|| {
        RuntimeFault::new(
            FaultKind::InvalidReference,
            format!("Label '{}' does not exist in flow '{}'", label, config.id),
        )
    })
}

fn set_position(state: &mut State, flow_uid: &str, head_uid: &str, position: usize) {
    if let Some(head) = state
        .flow_states
        .get_mut(flow_uid)
        .and_then(|flow| flow.head_mut(head_uid))
    {
        head.position = position;
    }
}

fn bind(state: &mut State, flow_uid: &str, variable: &str, value: Value) {
    if let Some(flow) = state.flow_states.get_mut(flow_uid) {
        flow.context.insert(variable.to_string(), value);
    }
}

fn slide_head(
    state: &mut State,
    flow_uid: &str,
    head_uid: &str,
    worklist: &mut VecDeque<String>,
) -> StepResult {
    let empty = Map::new();
    let config = match state.flow_states.get(flow_uid) {
        Some(flow) => state.flow_configs.get(&flow.flow_id).cloned().ok_or_else(|| {
            RuntimeFault::new(
                FaultKind::UnknownFlow,
                format!("Flow '{}' does not exist", flow.flow_id),
            )
        })?,
        None => return Ok(()),
    };

    for _ in 0..MAX_SLIDE_STEPS {
        let Some(flow) = state.flow_states.get(flow_uid) else {
            return Ok(());
        };
        if flow.status.is_terminal() {
            return Ok(());
        }
        let Some(head) = flow.head(head_uid) else {
            return Ok(());
        };
        let position = head.position;
        let next = position + 1;

        let Some(element) = config.elements.get(position) else {
            terminate_flow(state, flow_uid, Termination::Finished);
            return Ok(());
        };

        match element {
            Element::Match(element) => {
                let pattern = resolve_pattern(state, flow_uid, element)?;
                if let Some(head) = state
                    .flow_states
                    .get_mut(flow_uid)
                    .and_then(|flow| flow.head_mut(head_uid))
                {
                    head.blocked_on = Some(pattern);
                }
                return Ok(());
            }
            Element::Send { event, arguments } => {
                let arguments = resolve_map(arguments, &scope(state, flow_uid, &empty))?;
                state.emit(Event::new(event.clone(), arguments));
                set_position(state, flow_uid, head_uid, next);
            }
            Element::StartAction {
                action,
                arguments,
                reference,
            } => {
                let arguments = resolve_map(arguments, &scope(state, flow_uid, &empty))?;
                let action = Action::new(action.clone(), Some(flow_uid.to_string()), arguments);
                bind(state, flow_uid, reference, json!(action.uid));
                if let Some(flow) = state.flow_states.get_mut(flow_uid) {
                    flow.action_uids.push(action.uid.clone());
                    if let Some(head) = flow.head_mut(head_uid) {
                        if !head.fork_ids.is_empty() {
                            let actions = &state.actions;
                            head.forked_actions.retain(|forked| {
                                actions
                                    .get(&forked.action_uid)
                                    .map_or(false, |known| !known.status.is_terminal())
                            });
                            head.forked_actions.push(ForkedAction {
                                action_uid: action.uid.clone(),
                                fork_ids: head.fork_ids.clone(),
                            });
                        }
                    }
                }
                state.emit(action.start_event());
                state.actions.insert(action.uid.clone(), action);
                set_position(state, flow_uid, head_uid, next);
            }
            Element::StartFlow {
                flow_id,
                arguments,
                reference,
                activated,
            } => {
                if !state.flow_configs.contains_key(flow_id) {
                    return Err(RuntimeFault::new(
                        FaultKind::UnknownFlow,
                        format!("Flow '{}' does not exist", flow_id),
                    ));
                }
                let arguments = resolve_map(arguments, &scope(state, flow_uid, &empty))?;
                let child_uid = new_readable_uid(flow_id);
                if let Some(reference) = reference {
                    bind(state, flow_uid, reference, json!(child_uid));
                }

                let mut start = Map::new();
                start.insert("flow_id".into(), json!(flow_id));
                start.insert("flow_instance_uid".into(), json!(child_uid));
                start.insert("source_flow_instance_uid".into(), json!(flow_uid));
                start.insert("activated".into(), json!(activated));
                start.insert("arguments".into(), Value::Object(arguments));
                state.emit(Event::internal(internal_events::START_FLOW, start));
                set_position(state, flow_uid, head_uid, next);
            }
            Element::Stop { reference } => {
                let target = match scope(state, flow_uid, &empty).lookup(reference) {
                    Some(Value::String(uid)) => uid,
                    Some(other) => {
                        return Err(RuntimeFault::new(
                            FaultKind::TypeMismatch,
                            format!("Reference '${}' holds {} instead of a uid", reference, other),
                        ))
                    }
                    None => {
                        return Err(RuntimeFault::new(
                            FaultKind::MissingVariable,
                            format!("Variable '${}' is not defined", reference),
                        ))
                    }
                };

                let action_stop = state
                    .actions
                    .get(&target)
                    .map(|action| (!action.status.is_terminal()).then(|| action.stop_event()));
                if let Some(stop_event) = action_stop {
                    if let Some(stop_event) = stop_event {
                        state.emit(stop_event);
                    }
                } else if state.flow_states.contains_key(&target) {
                    let mut arguments = Map::new();
                    arguments.insert("flow_instance_uid".into(), json!(target));
                    state.emit(Event::internal(internal_events::STOP_FLOW, arguments));
                } else {
                    return Err(RuntimeFault::new(
                        FaultKind::InvalidReference,
                        format!("'${}' is neither an action nor a flow instance", reference),
                    ));
                }
                set_position(state, flow_uid, head_uid, next);
            }
            Element::Set { variable, value } => {
                let value = resolve_value(value, &scope(state, flow_uid, &empty))?;
                bind(state, flow_uid, variable, value);
                set_position(state, flow_uid, head_uid, next);
            }
            Element::Label(_) => set_position(state, flow_uid, head_uid, next),
            Element::Goto { label, condition } => {
                let jump = match condition {
                    Some(condition) => condition.evaluate(&scope(state, flow_uid, &empty))?,
                    None => true,
                };
                let target = if jump {
                    label_position(&config, label)?
                } else {
                    next
                };
                set_position(state, flow_uid, head_uid, target);
            }
            Element::Fork { fork_id, labels } => {
                let positions = labels
                    .iter()
                    .map(|label| label_position(&config, label))
                    .collect::<Result<Vec<_>, _>>()?;
                let Some(flow) = state.flow_states.get_mut(flow_uid) else {
                    return Ok(());
                };
                let Some(index) = flow.heads.iter().position(|head| head.uid == head_uid) else {
                    return Ok(());
                };

                let head = &mut flow.heads[index];
                head.fork_ids.push(fork_id.clone());
                head.position = positions[0];
                let fork_ids = head.fork_ids.clone();

                for (offset, position) in positions.iter().skip(1).enumerate() {
                    let mut branch = FlowHead::new(*position);
                    branch.fork_ids = fork_ids.clone();
                    worklist.push_back(branch.uid.clone());
                    flow.heads.insert(index + 1 + offset, branch);
                }
            }
            Element::Join {
                fork_id,
                mode,
                exit,
            } => {
                let exit_position = label_position(&config, exit)?;
                let Some(flow) = state.flow_states.get_mut(flow_uid) else {
                    return Ok(());
                };
                if *mode == JoinMode::All {
                    if let Some(head) = flow.head_mut(head_uid) {
                        head.merging_on = Some(fork_id.clone());
                    }
                    let outstanding = flow.heads.iter().any(|head| {
                        head.fork_ids.contains(fork_id)
                            && head.merging_on.as_deref() != Some(fork_id.as_str())
                    });
                    if outstanding {
                        return Ok(());
                    }
                }

                let (dropped, kept): (Vec<FlowHead>, Vec<FlowHead>) = std::mem::take(&mut flow.heads)
                    .into_iter()
                    .partition(|head| head.uid != head_uid && head.fork_ids.contains(fork_id));
                flow.heads = kept;

                // Actions of losing `any` branches are stopped, the rest stay tracked.
                let mut inherited = Vec::new();
                let mut abandoned = Vec::new();
                for forked in dropped.into_iter().flat_map(|head| head.forked_actions) {
                    if *mode == JoinMode::Any && forked.fork_ids.contains(fork_id) {
                        abandoned.push(forked.action_uid);
                    } else {
                        inherited.push(forked);
                    }
                }
                if let Some(head) = flow.head_mut(head_uid) {
                    head.merging_on = None;
                    head.fork_ids.retain(|id| id != fork_id);
                    head.position = exit_position;
                    head.forked_actions.extend(inherited);
                }

                let stop_events: Vec<Event> = abandoned
                    .iter()
                    .filter_map(|action_uid| state.actions.get(action_uid))
                    .filter(|action| !action.status.is_terminal())
                    .map(Action::stop_event)
                    .collect();
                for stop_event in stop_events {
                    debug!(flow_instance_uid = %flow_uid, event = %stop_event.name, "Stopping action of a dropped branch");
                    state.emit(stop_event);
                }
            }
            Element::Return { value } => {
                let value = match value {
                    Some(value) => Some(resolve_value(value, &scope(state, flow_uid, &empty))?),
                    None => None,
                };
                if let Some(flow) = state.flow_states.get_mut(flow_uid) {
                    flow.return_value = value;
                }
                terminate_flow(state, flow_uid, Termination::Finished);
                return Ok(());
            }
            Element::Abort { reason } => {
                let reason = reason.clone().or_else(|| Some("aborted".to_string()));
                terminate_flow(state, flow_uid, Termination::Stopped(reason));
                return Ok(());
            }
            Element::Log(message) => {
                let message = resolve_value(&json!(message), &scope(state, flow_uid, &empty))?;
                let message = match message {
                    Value::String(message) => message,
                    other => other.to_string(),
                };
                info!(flow_id = %config.id, flow_instance_uid = %flow_uid, "{}", message);
                set_position(state, flow_uid, head_uid, next);
            }
        }
    }

    Err(RuntimeFault::new(
        FaultKind::SlideLimitExceeded,
        format!(
            "Head did not block after {} instructions in flow '{}'",
            MAX_SLIDE_STEPS, config.id
        ),
    ))
}
