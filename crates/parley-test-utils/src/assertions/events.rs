//! Assertions on event streams.

use parley_core::statemachine::value_conforms;
use parley_core::Event;
use serde_json::Value;
use thiserror::Error;

/// Error type for event stream validation failures
#[derive(Debug, Error, PartialEq)]
pub enum EventAssertionError {
    #[error("Expected {expected} events, got {actual}: {names:?}")]
    CountMismatch {
        expected: usize,
        actual: usize,
        names: Vec<String>,
    },

    #[error("Event {index} does not conform: expected {expected}, got {actual}")]
    Mismatch {
        index: usize,
        expected: Value,
        actual: Value,
    },

    #[error("No event conforms to {0}")]
    Missing(Value),
}

/// Whether the wire form of `event` contains everything in `expected`.
///
/// `expected` is a partial wire object, e.g. `{"type": "StartUtteranceBotAction", "script": "Hi"}`.
pub fn event_conforms(expected: &Value, event: &Event) -> bool {
    value_conforms(expected, &event.to_wire())
}

/// Asserts that `events` conform one by one to `expected`, with nothing extra.
pub fn assert_events_conform(expected: &[Value], events: &[Event]) -> Result<(), EventAssertionError> {
    if expected.len() != events.len() {
        return Err(EventAssertionError::CountMismatch {
            expected: expected.len(),
            actual: events.len(),
            names: events.iter().map(|event| event.name.clone()).collect(),
        });
    }
    for (index, (expected, event)) in expected.iter().zip(events).enumerate() {
        if !event_conforms(expected, event) {
            return Err(EventAssertionError::Mismatch {
                index,
                expected: expected.clone(),
                actual: event.to_wire(),
            });
        }
    }
    Ok(())
}

/// Asserts that at least one of `events` conforms to `expected`, returning it.
pub fn assert_contains_event<'a>(
    expected: &Value,
    events: &'a [Event],
) -> Result<&'a Event, EventAssertionError> {
    events
        .iter()
        .find(|event| event_conforms(expected, event))
        .ok_or_else(|| EventAssertionError::Missing(expected.clone()))
}

/// Bot utterance scripts started in `events`, in order
pub fn bot_scripts(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter(|event| event.name == "StartUtteranceBotAction")
        .filter_map(|event| event.str_arg("script").map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::arguments;
    use serde_json::json;

    fn utterance(script: &str) -> Event {
        Event::new(
            "StartUtteranceBotAction",
            arguments(json!({"script": script, "action_uid": "a1"})),
        )
    }

    #[test]
    fn test_partial_conformance() {
        let event = utterance("Hello!");
        assert!(event_conforms(&json!({"type": "StartUtteranceBotAction"}), &event));
        assert!(event_conforms(&json!({"script": "Hello!"}), &event));
        assert!(!event_conforms(&json!({"script": "Bye!"}), &event));
    }

    #[test]
    fn test_sequence_errors() {
        let events = vec![utterance("Hello!"), utterance("How are you?")];

        assert!(assert_events_conform(
            &[json!({"script": "Hello!"}), json!({"script": "How are you?"})],
            &events
        )
        .is_ok());

        let err = assert_events_conform(&[json!({"script": "Hello!"})], &events).unwrap_err();
        assert!(matches!(err, EventAssertionError::CountMismatch { actual: 2, .. }));

        let err = assert_events_conform(
            &[json!({"script": "Hello!"}), json!({"script": "Bye!"})],
            &events,
        )
        .unwrap_err();
        assert!(matches!(err, EventAssertionError::Mismatch { index: 1, .. }));

        assert_eq!(bot_scripts(&events), vec!["Hello!", "How are you?"]);
        assert!(assert_contains_event(&json!({"script": "Nope"}), &events).is_err());
    }
}
