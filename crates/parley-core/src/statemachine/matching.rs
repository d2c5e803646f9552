use serde_json::{Map, Value};

use crate::domain::event::Event;
use crate::domain::expression::{resolve_map, Scope};
use crate::domain::flow_config::MatchElement;
use crate::domain::flow_state::EventPattern;
use crate::domain::state::State;
use crate::error::{FaultKind, RuntimeFault};

/// Whether `actual` contains everything `expected` asks for.
///
/// Objects match when every expected key conforms, everything else by equality.
pub fn value_conforms(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => arguments_conform(expected, actual),
        _ => expected == actual,
    }
}

/// Whether every expected argument is present and conforms
pub fn arguments_conform(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    expected.iter().all(|(key, value)| {
        actual
            .get(key)
            .map_or(false, |actual| value_conforms(value, actual))
    })
}

/// Whether an event satisfies a resolved pattern
pub fn pattern_matches(pattern: &EventPattern, event: &Event) -> bool {
    if pattern.event != event.name {
        return false;
    }
    if let Some(action_uid) = &pattern.action_uid {
        if event.action_uid() != Some(action_uid.as_str()) {
            return false;
        }
    }
    if let Some(flow_uid) = &pattern.flow_instance_uid {
        if event.str_arg("flow_instance_uid") != Some(flow_uid.as_str()) {
            return false;
        }
    }
    arguments_conform(&pattern.arguments, &event.arguments)
}

/// Heads that advance on this event, in flow creation then head order
pub(crate) fn find_matching_heads(state: &State, event: &Event) -> Vec<(String, String)> {
    state
        .flow_states
        .values()
        .filter(|flow| flow.is_matching())
        .flat_map(|flow| {
            flow.heads
                .iter()
                .filter(|head| head.is_waiting())
                .filter(|head| {
                    head.blocked_on
                        .as_ref()
                        .map_or(false, |pattern| pattern_matches(pattern, event))
                })
                .map(move |head| (flow.uid.clone(), head.uid.clone()))
        })
        .collect()
}

fn reference_uid(scope: &Scope<'_>, reference: &str) -> Result<String, RuntimeFault> {
    match scope.lookup(reference) {
        Some(Value::String(uid)) => Ok(uid),
        Some(other) => Err(RuntimeFault::new(
            FaultKind::TypeMismatch,
            format!("Reference '${}' holds {} instead of a uid", reference, other),
        )),
        None => Err(RuntimeFault::new(
            FaultKind::MissingVariable,
            format!("Variable '${}' is not defined", reference),
        )),
    }
}

/// Resolve a match instruction against the bindings of a flow instance
pub(crate) fn resolve_pattern(
    state: &State,
    flow_uid: &str,
    element: &MatchElement,
) -> Result<EventPattern, RuntimeFault> {
    let empty = Map::new();
    let local = state
        .flow_states
        .get(flow_uid)
        .map_or(&empty, |flow| &flow.context);
    let scope = Scope::new(local, &state.context);

    let action_uid = element
        .action_ref
        .as_deref()
        .map(|reference| reference_uid(&scope, reference))
        .transpose()?;
    let flow_instance_uid = element
        .flow_ref
        .as_deref()
        .map(|reference| reference_uid(&scope, reference))
        .transpose()?;

    Ok(EventPattern {
        event: element.event.clone(),
        arguments: resolve_map(&element.arguments, &scope)?,
        action_uid,
        flow_instance_uid,
        bind: element.bind.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::arguments;
    use serde_json::json;

    fn pattern(event: &str, args: Value) -> EventPattern {
        EventPattern {
            event: event.into(),
            arguments: arguments(args),
            action_uid: None,
            flow_instance_uid: None,
            bind: None,
        }
    }

    #[test]
    fn test_arguments_are_a_subset() {
        let event = Event::new(
            "UtteranceUserActionFinished",
            arguments(json!({"final_transcript": "hi", "is_success": true})),
        );

        assert!(pattern_matches(&pattern("UtteranceUserActionFinished", json!({})), &event));
        assert!(pattern_matches(
            &pattern("UtteranceUserActionFinished", json!({"final_transcript": "hi"})),
            &event
        ));
        assert!(!pattern_matches(
            &pattern("UtteranceUserActionFinished", json!({"final_transcript": "bye"})),
            &event
        ));
        assert!(!pattern_matches(
            &pattern("UtteranceUserActionFinished", json!({"missing": 1})),
            &event
        ));
        assert!(!pattern_matches(&pattern("Other", json!({})), &event));
    }

    #[test]
    fn test_nested_objects_conform_partially() {
        let expected = json!({"user": {"name": "John"}});
        let actual = json!({"user": {"name": "John", "age": 3}});
        assert!(value_conforms(&expected, &actual));
        assert!(!value_conforms(&actual, &expected));
    }

    #[test]
    fn test_action_uid_must_match() {
        let mut p = pattern("UtteranceBotActionFinished", json!({}));
        p.action_uid = Some("a-1".into());

        let matching = Event::new("UtteranceBotActionFinished", arguments(json!({"action_uid": "a-1"})));
        let other = Event::new("UtteranceBotActionFinished", arguments(json!({"action_uid": "a-2"})));

        assert!(pattern_matches(&p, &matching));
        assert!(!pattern_matches(&p, &other));
    }
}
