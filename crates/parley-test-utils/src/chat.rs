//! A conversation harness standing in for the outside world.
//!
//! [`TestChat`] keeps the conversation state between turns and finishes bot
//! utterances the way a client would, so tests can talk to flows in plain
//! text.

use parley_core::{arguments, Event, State};
use parley_runtime::{Runtime, RuntimeResult};
use serde_json::json;

/// Events a client acknowledges on behalf of the bot
const BOT_UTTERANCE_START: &str = "StartUtteranceBotAction";

/// Upper bound of acknowledgement rounds per turn
const MAX_ROUNDS: usize = 100;

/// Conversation driven through a [`Runtime`]
pub struct TestChat {
    runtime: Runtime,
    state: Option<State>,
    instant_actions: Vec<String>,
    history: Vec<Event>,
}

impl TestChat {
    /// Start a conversation on `runtime`
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            state: None,
            instant_actions: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Finish `action_name` instantly instead of acknowledging it
    pub fn with_instant_action(mut self, action_name: impl Into<String>) -> Self {
        self.instant_actions.push(action_name.into());
        self
    }

    /// The runtime under test
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Conversation state after the last turn
    pub fn state(&self) -> Option<&State> {
        self.state.as_ref()
    }

    /// Every event output so far
    pub fn history(&self) -> &[Event] {
        &self.history
    }

    /// Process raw events and return the output, without acknowledging anything
    pub async fn send(&mut self, events: Vec<Event>) -> RuntimeResult<Vec<Event>> {
        let (output, state) = self
            .runtime
            .process_events(events, self.state.take(), true, &self.instant_actions)
            .await?;
        self.state = Some(state);
        self.history.extend(output.iter().cloned());
        Ok(output)
    }

    /// Start the conversation without user input, returning the bot's utterances
    pub async fn start(&mut self) -> RuntimeResult<Vec<String>> {
        self.converse(Vec::new()).await
    }

    /// Say `text` as the user, returning the bot's utterances
    pub async fn user_says(&mut self, text: &str) -> RuntimeResult<Vec<String>> {
        let said = Event::new(
            "UtteranceUserActionFinished",
            arguments(json!({ "final_transcript": text, "is_success": true })),
        );
        self.converse(vec![said]).await
    }

    /// Process `events`, then acknowledge every bot utterance until the flows settle
    async fn converse(&mut self, events: Vec<Event>) -> RuntimeResult<Vec<String>> {
        let mut scripts = Vec::new();
        let mut pending = events;
        let mut first = true;

        for _ in 0..MAX_ROUNDS {
            if pending.is_empty() && !first {
                break;
            }
            first = false;

            let output = self.send(std::mem::take(&mut pending)).await?;
            for event in output.iter().filter(|event| event.name == BOT_UTTERANCE_START) {
                let script = event.str_arg("script").unwrap_or_default().to_string();
                if !self.instant_actions.iter().any(|name| name == "UtteranceBotAction") {
                    pending.push(utterance_finished(event, &script));
                }
                scripts.push(script);
            }
        }
        Ok(scripts)
    }
}

fn utterance_finished(start: &Event, script: &str) -> Event {
    Event::new(
        "UtteranceBotActionFinished",
        arguments(json!({
            "action_uid": start.action_uid(),
            "final_script": script,
            "is_success": true,
            "status": "success",
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_generators::scripted_exchange_document;
    use parley_runtime::{ActionDispatcher, RuntimeConfig};
    use pretty_assertions::assert_eq;

    fn chat() -> TestChat {
        let configs = parley_dsl::load_flow_configs(&scripted_exchange_document()).unwrap();
        TestChat::new(Runtime::new(RuntimeConfig::default(), configs, ActionDispatcher::new()).unwrap())
    }

    #[tokio::test]
    async fn test_user_turns_are_acknowledged() {
        let mut chat = chat();
        assert!(chat.start().await.unwrap().is_empty());

        assert_eq!(chat.user_says("hi").await.unwrap(), vec!["Hello world!"]);
        assert_eq!(
            chat.user_says("how are you").await.unwrap(),
            vec!["Great!", "And you?"]
        );
        assert_eq!(chat.history().len(), 3);
    }

    #[tokio::test]
    async fn test_instant_utterances() {
        let mut chat = chat().with_instant_action("UtteranceBotAction");
        chat.start().await.unwrap();

        assert_eq!(chat.user_says("hi").await.unwrap(), vec!["Hello world!"]);
        let names: Vec<&str> = chat.history().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["StartUtteranceBotAction", "UtteranceBotActionFinished"]);
    }
}
