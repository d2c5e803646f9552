//! Canned actions for runtime tests.
//!
//! Each function registers one action on a dispatcher and returns it, so
//! they chain like the dispatcher's own builder methods.

use std::time::Duration;

use parley_core::arguments;
use parley_runtime::{ActionCapability, ActionDispatcher, ActionError, ActionMeta, ActionResult};
use serde_json::{json, Value};

/// `<name>` returning its `value` argument
pub fn echo_action(dispatcher: ActionDispatcher, name: &str) -> ActionDispatcher {
    dispatcher.register_fn(ActionMeta::new(name), |invocation| async move {
        let value = invocation.arguments.get("value").cloned().unwrap_or(Value::Null);
        Ok::<_, ActionError>(ActionResult::value(value))
    })
}

/// `<name>` that always fails
pub fn failing_action(dispatcher: ActionDispatcher, name: &str) -> ActionDispatcher {
    let action = name.to_string();
    dispatcher.register_fn(ActionMeta::new(name), move |_| {
        let action = action.clone();
        async move { Err::<ActionResult, _>(ActionError::failed(action, "canned failure")) }
    })
}

/// Background `<name>` that sleeps for `delay` before returning `"done"`
pub fn slow_action(dispatcher: ActionDispatcher, name: &str, delay: Duration) -> ActionDispatcher {
    dispatcher.register_fn(ActionMeta::new(name).asynchronous(), move |_| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, ActionError>(ActionResult::value("done"))
    })
}

/// Background `<name>` sending `Updated` events numbered 1 to `to`.
///
/// `to` comes from the action arguments. Returns the count and stores it in
/// the context under `counted`.
pub fn counting_action(dispatcher: ActionDispatcher, name: &str, interval: Duration) -> ActionDispatcher {
    let meta = ActionMeta::new(name)
        .asynchronous()
        .with_capability(ActionCapability::EventHandler);
    dispatcher.register_fn(meta, move |mut invocation| async move {
        let handler = invocation.take_event_handler()?;
        let to = invocation.arguments.get("to").and_then(Value::as_u64).unwrap_or(1);
        for number in 1..=to {
            handler
                .send_action_updated_event("Count", arguments(json!({ "number": number })))
                .await?;
            tokio::time::sleep(interval).await;
        }
        Ok::<_, ActionError>(ActionResult::value(to).with_context_update("counted", to))
    })
}

/// Background `<name>` that waits for an inbound `event_name` event and
/// returns its `value` argument, or null when `timeout` elapses first.
pub fn listening_action(
    dispatcher: ActionDispatcher,
    name: &str,
    event_name: &str,
    timeout: Duration,
) -> ActionDispatcher {
    let event_name = event_name.to_string();
    let meta = ActionMeta::new(name)
        .asynchronous()
        .with_capability(ActionCapability::EventHandler);
    dispatcher.register_fn(meta, move |mut invocation| {
        let event_name = event_name.clone();
        async move {
            let mut handler = invocation.take_event_handler()?;
            let events = handler.wait_for_events(Some(event_name.as_str()), Some(timeout)).await;
            let value = events
                .first()
                .and_then(|event| event.arguments.get("value").cloned())
                .unwrap_or(Value::Null);
            Ok::<_, ActionError>(ActionResult::value(value))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_runtime::ActionInvocation;
    use serde_json::Map;

    #[tokio::test]
    async fn test_canned_actions_register() {
        let dispatcher = echo_action(ActionDispatcher::new(), "EchoAction");
        let dispatcher = failing_action(dispatcher, "BrokenAction");
        let dispatcher = slow_action(dispatcher, "SlowAction", Duration::from_millis(1));

        let names: Vec<&str> = dispatcher.registered_actions().collect();
        assert_eq!(names, vec!["EchoAction", "BrokenAction", "SlowAction"]);
        assert!(dispatcher.meta("SlowAction").unwrap().execute_async);

        let invocation = ActionInvocation::new("EchoAction", arguments(json!({"value": 5})));
        let (result, status) = dispatcher.execute_action("EchoAction", invocation).await;
        assert_eq!(status, parley_runtime::ExecutionStatus::Success);
        assert_eq!(result.return_value, json!(5));

        let invocation = ActionInvocation::new("BrokenAction", Map::new());
        let (_, status) = dispatcher.execute_action("BrokenAction", invocation).await;
        assert_eq!(status, parley_runtime::ExecutionStatus::Failed);
    }
}
