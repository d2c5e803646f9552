use std::time::Duration;

use parley_core::{Action, Event};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::ActionError;

/// Event channel between a running action and the flows.
///
/// Outbound events go to the queue shared by all actions of a conversation
/// and are picked up by the next processing cycle. Inbound events are the
/// external events the runtime processes while the action runs.
#[derive(Debug)]
pub struct ActionEventHandler {
    action: Action,
    event_source_uid: String,
    inbound: mpsc::Receiver<Event>,
    outbound: mpsc::Sender<Event>,
}

impl ActionEventHandler {
    /// Create a handler for `action`
    pub fn new(
        action: Action,
        event_source_uid: impl Into<String>,
        inbound: mpsc::Receiver<Event>,
        outbound: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            action,
            event_source_uid: event_source_uid.into(),
            inbound,
            outbound,
        }
    }

    /// The action this handler belongs to
    pub fn action(&self) -> &Action {
        &self.action
    }

    async fn push(&self, event: Event) -> Result<(), ActionError> {
        self.outbound
            .send(event.with_source(self.event_source_uid.clone()))
            .await
            .map_err(|_| ActionError::QueueClosed)
    }

    /// Send an `<X>ActionUpdated` event with `event_parameter_name` set to `event_name`
    pub async fn send_action_updated_event(
        &self,
        event_name: &str,
        args: Map<String, Value>,
    ) -> Result<(), ActionError> {
        let mut arguments = Map::new();
        arguments.insert(
            "event_parameter_name".into(),
            Value::String(event_name.to_string()),
        );
        arguments.extend(args);
        self.push(self.action.updated_event(arguments)).await
    }

    /// Send any event
    pub async fn send_event(
        &self,
        event_name: &str,
        args: Map<String, Value>,
    ) -> Result<(), ActionError> {
        self.push(Event::new(event_name, args)).await
    }

    /// Wait for inbound events, optionally only those named `event_name`.
    ///
    /// Returns once at least one wanted event arrived, together with every
    /// other wanted event already queued. When `timeout` elapses or the
    /// runtime side is gone the events collected so far are returned, which
    /// may be none.
    pub async fn wait_for_events(
        &mut self,
        event_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Vec<Event> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut events = Vec::new();

        loop {
            let received = match deadline {
                Some(deadline) => match time::timeout_at(deadline, self.inbound.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        debug!(action_uid = %self.action.uid, "Timed out waiting for events");
                        return events;
                    }
                },
                None => self.inbound.recv().await,
            };
            let Some(first) = received else {
                return events;
            };

            let mut next = Some(first);
            while let Some(event) = next {
                if event_name.map_or(true, |name| event.name == name) {
                    events.push(event);
                }
                next = self.inbound.try_recv().ok();
            }
            if !events.is_empty() {
                return events;
            }
        }
    }
}
