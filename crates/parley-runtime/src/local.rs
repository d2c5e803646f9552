//! Bookkeeping of locally executed actions.
//!
//! Every running action is a tokio task. Besides its join handle the runtime
//! keeps an optional inbound queue per action and one outbound queue shared
//! by all actions of a main flow instance.

use futures::future::select_all;
use indexmap::IndexMap;
use parley_core::{Action, Event};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::actions::ActionResult;
use crate::error::ActionError;

/// What an action task resolves to
pub type ActionOutcome = Result<ActionResult, ActionError>;

/// Failure reason of actions that errored or panicked
pub const ACTION_EXCEPTION_REASON: &str = "Local action finished with an exception!";

/// Failure reason of cancelled actions
pub const ACTION_STOPPED_REASON: &str = "stopped";

/// One running action
#[derive(Debug)]
pub struct LocalActionData {
    /// The action being executed
    pub action: Action,
    /// Task executing it
    pub task: JoinHandle<ActionOutcome>,
    /// Inbound queue, present when the action asked for an event handler
    pub input_tx: Option<mpsc::Sender<Event>>,
}

impl LocalActionData {
    /// Queue an event for the action without waiting
    pub fn forward(&self, event: &Event) {
        let Some(input_tx) = &self.input_tx else {
            return;
        };
        if let Err(err) = input_tx.try_send(event.clone()) {
            match err {
                mpsc::error::TrySendError::Full(_) => warn!(
                    action_uid = %self.action.uid,
                    event = %event.name,
                    "Action event queue full, event dropped"
                ),
                mpsc::error::TrySendError::Closed(_) => {}
            }
        }
    }

    /// Cancel if this is the action a stop event targets
    pub fn cancel_if(&self, action_uid: &str, action_name: &str) -> bool {
        if self.action.uid == action_uid && self.action.name == action_name {
            info!(action_uid = %action_uid, action_name = %action_name, "Cancelling action");
            self.task.abort();
            true
        } else {
            false
        }
    }
}

/// Asynchronous actions of one main flow instance
#[derive(Debug)]
pub struct LocalActionGroup {
    /// Running asynchronous actions, by action uid in start order
    pub action_data: IndexMap<String, LocalActionData>,
    output_tx: mpsc::Sender<Event>,
    output_rx: mpsc::Receiver<Event>,
}

impl LocalActionGroup {
    /// Empty group whose queues hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (output_tx, output_rx) = mpsc::channel(capacity);
        Self {
            action_data: IndexMap::new(),
            output_tx,
            output_rx,
        }
    }

    /// Sender for the shared outbound queue
    pub fn output_sender(&self) -> mpsc::Sender<Event> {
        self.output_tx.clone()
    }

    /// Track a background action
    pub fn insert(&mut self, data: LocalActionData) {
        self.action_data.insert(data.action.uid.clone(), data);
    }

    /// Number of tracked actions
    pub fn len(&self) -> usize {
        self.action_data.len()
    }

    /// Whether no action is tracked
    pub fn is_empty(&self) -> bool {
        self.action_data.is_empty()
    }

    /// Events the actions pushed since the last call
    pub fn drain_action_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.output_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the next event pushed by an action
    pub async fn next_action_event(&mut self) -> Option<Event> {
        self.output_rx.recv().await
    }

    /// Finished events of the actions that completed, and how many are still running.
    ///
    /// Never blocks: only tasks already finished are collected.
    pub async fn harvest_finished(&mut self, source_uid: &str) -> (Vec<Event>, usize) {
        let finished: Vec<String> = self
            .action_data
            .iter()
            .filter(|(_, data)| data.task.is_finished())
            .map(|(uid, _)| uid.clone())
            .collect();

        let mut events = Vec::with_capacity(finished.len());
        for uid in finished {
            if let Some(data) = self.action_data.shift_remove(&uid) {
                let joined = data.task.await;
                events.push(completion_event(&data.action, joined, source_uid));
            }
        }
        if !events.is_empty() {
            info!(count = events.len(), "Async actions finished");
        }
        (events, self.action_data.len())
    }

    /// Abort every tracked action
    pub fn abort_all(&mut self) {
        for (_, data) in self.action_data.drain(..) {
            debug!(action_uid = %data.action.uid, "Aborting action");
            data.task.abort();
        }
    }
}

/// `<X>ActionFinished` with the default success fields, overridden by `arguments`
pub fn action_finished_event(
    action: &Action,
    arguments: Map<String, Value>,
    source_uid: &str,
) -> Event {
    let mut fields = Map::new();
    fields.insert("action_name".into(), json!(action.name));
    fields.insert("status".into(), json!("success"));
    fields.insert("is_success".into(), json!(true));
    fields.insert("return_value".into(), Value::Null);
    fields.insert("events".into(), json!([]));
    fields.extend(arguments);
    action.finished_event(fields).with_source(source_uid)
}

/// Failed `<X>ActionFinished` carrying `failure_reason`
pub fn action_failed_event(
    action: &Action,
    reason: &str,
    was_stopped: bool,
    source_uid: &str,
) -> Event {
    let mut arguments = Map::new();
    arguments.insert("status".into(), json!("failed"));
    arguments.insert("is_success".into(), json!(false));
    arguments.insert("failure_reason".into(), json!(reason));
    if was_stopped {
        arguments.insert("was_stopped".into(), json!(true));
    }
    action_finished_event(action, arguments, source_uid)
}

/// Finished event for a joined action task
pub fn completion_event(
    action: &Action,
    joined: Result<ActionOutcome, JoinError>,
    source_uid: &str,
) -> Event {
    match joined {
        Ok(Ok(result)) => {
            let mut arguments = Map::new();
            arguments.insert("return_value".into(), result.return_value);
            arguments.insert(
                "events".into(),
                Value::Array(result.events.iter().map(Event::to_wire).collect()),
            );
            arguments.insert("context_updates".into(), Value::Object(result.context_updates));
            action_finished_event(action, arguments, source_uid)
        }
        Ok(Err(err)) => {
            warn!(action_uid = %action.uid, action_name = %action.name, error = %err, "{}", ACTION_EXCEPTION_REASON);
            action_failed_event(action, ACTION_EXCEPTION_REASON, false, source_uid)
        }
        Err(err) if err.is_cancelled() => {
            debug!(action_uid = %action.uid, action_name = %action.name, "Action stopped");
            action_failed_event(action, ACTION_STOPPED_REASON, true, source_uid)
        }
        Err(err) => {
            warn!(action_uid = %action.uid, action_name = %action.name, error = %err, "{}", ACTION_EXCEPTION_REASON);
            action_failed_event(action, ACTION_EXCEPTION_REASON, false, source_uid)
        }
    }
}

/// Wait until at least one of `running` completes.
///
/// Returns the finished events of every action that completed by then and
/// removes those actions from `running`.
pub async fn wait_first_completed(running: &mut Vec<LocalActionData>, source_uid: &str) -> Vec<Event> {
    if running.is_empty() {
        return Vec::new();
    }

    let (joined, index, _) = select_all(running.iter_mut().map(|data| &mut data.task)).await;
    let first = running.remove(index);
    let mut events = vec![completion_event(&first.action, joined, source_uid)];

    let mut idx = 0;
    while idx < running.len() {
        if running[idx].task.is_finished() {
            let data = running.remove(idx);
            let joined = data.task.await;
            events.push(completion_event(&data.action, joined, source_uid));
        } else {
            idx += 1;
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spawn(name: &str, delay_ms: u64, outcome: ActionOutcome) -> LocalActionData {
        let action = Action::new(name, None, Map::new());
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            outcome
        });
        LocalActionData {
            action,
            task,
            input_tx: None,
        }
    }

    #[tokio::test]
    async fn test_completion_event_shapes() {
        let action = Action::new("GreetAction", None, Map::new());

        let success = completion_event(
            &action,
            Ok(Ok(ActionResult::value("hi").with_context_update("greeted", true))),
            "src",
        );
        assert_eq!(success.name, "GreetActionFinished");
        assert_eq!(success.str_arg("status"), Some("success"));
        assert_eq!(success.arguments["return_value"], json!("hi"));
        assert_eq!(success.arguments["context_updates"], json!({"greeted": true}));
        assert_eq!(success.source_uid.as_deref(), Some("src"));

        let failed = completion_event(&action, Ok(Err(ActionError::failed("GreetAction", "x"))), "src");
        assert_eq!(failed.bool_arg("is_success"), Some(false));
        assert_eq!(failed.str_arg("failure_reason"), Some(ACTION_EXCEPTION_REASON));
        assert_eq!(failed.bool_arg("was_stopped"), None);
    }

    #[tokio::test]
    async fn test_aborted_task_reports_stopped() {
        let data = spawn("SlowAction", 60_000, Ok(ActionResult::default()));
        assert!(data.cancel_if(&data.action.uid.clone(), "SlowAction"));

        let joined = data.task.await;
        let event = completion_event(&data.action, joined, "src");
        assert_eq!(event.bool_arg("was_stopped"), Some(true));
        assert_eq!(event.str_arg("failure_reason"), Some(ACTION_STOPPED_REASON));
    }

    #[tokio::test]
    async fn test_wait_first_completed() {
        let mut running = vec![
            spawn("SlowAction", 60_000, Ok(ActionResult::default())),
            spawn("FastAction", 1, Ok(ActionResult::value(1))),
        ];

        let events = wait_first_completed(&mut running, "src").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "FastActionFinished");
        assert_eq!(running.len(), 1);
        running[0].task.abort();
    }

    #[tokio::test]
    async fn test_group_harvest_and_pending_count() {
        let mut group = LocalActionGroup::new(8);
        group.insert(spawn("SlowAction", 60_000, Ok(ActionResult::default())));
        group.insert(spawn("FastAction", 0, Ok(ActionResult::value(1))));

        let mut finished = Vec::new();
        for _ in 0..100 {
            let (events, pending) = group.harvest_finished("src").await;
            finished.extend(events);
            if !finished.is_empty() {
                assert_eq!(pending, 1);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "FastActionFinished");

        group.output_sender().send(Event::new("Ping", Map::new())).await.unwrap();
        assert_eq!(group.drain_action_events().len(), 1);

        group.abort_all();
        assert!(group.is_empty());
    }
}
