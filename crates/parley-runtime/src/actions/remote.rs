use std::time::Duration;

use parley_core::Event;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{ActionResult, ExecutionStatus};
use crate::error::{ActionError, RuntimeError};

/// Client of a remote actions server
#[derive(Debug, Clone)]
pub struct RemoteActionClient {
    client: Client,
    run_url: String,
}

impl RemoteActionClient {
    /// Create a client for the server at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RuntimeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RuntimeError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            run_url: format!("{}/v1/actions/run", base_url.trim_end_matches('/')),
        })
    }

    /// Endpoint actions are posted to
    pub fn run_url(&self) -> &str {
        &self.run_url
    }

    /// Run an action remotely.
    ///
    /// Transport failures and non-200 answers are returned as
    /// [`ActionError::Remote`]. A missing `status` counts as failed.
    pub async fn run_action(
        &self,
        action_name: &str,
        parameters: &Map<String, Value>,
    ) -> Result<(ActionResult, ExecutionStatus), ActionError> {
        let remote_error = |message: String| ActionError::Remote {
            action: action_name.to_string(),
            message,
        };

        debug!(action_name = %action_name, url = %self.run_url, "Calling actions server");
        let response = self
            .client
            .post(self.run_url.as_str())
            .json(&json!({
                "action_name": action_name,
                "action_parameters": parameters,
            }))
            .send()
            .await
            .map_err(|e| remote_error(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(remote_error(format!(
                "Got status code {} while getting response from {}",
                response.status().as_u16(),
                action_name
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| remote_error(e.to_string()))?;

        let status = match body.get("status").and_then(Value::as_str) {
            Some("success") => ExecutionStatus::Success,
            _ => ExecutionStatus::Failed,
        };
        let result = parse_result(body.get("result").cloned().unwrap_or_else(|| json!({})));
        info!(action_name = %action_name, status = status.as_str(), "Remote action finished");

        Ok((result, status))
    }
}

/// A structured result carries `return_value`; anything else is the return value itself
fn parse_result(result: Value) -> ActionResult {
    match result {
        Value::Object(mut object) if object.contains_key("return_value") => {
            let return_value = object.remove("return_value").unwrap_or(Value::Null);
            let context_updates = match object.remove("context_updates") {
                Some(Value::Object(updates)) => updates,
                _ => Map::new(),
            };
            let events = match object.remove("events") {
                Some(Value::Array(events)) => events
                    .into_iter()
                    .filter_map(|event| Event::from_wire(event).ok())
                    .collect(),
                _ => Vec::new(),
            };
            ActionResult {
                return_value,
                events,
                context_updates,
            }
        }
        other => ActionResult::value(other),
    }
}
