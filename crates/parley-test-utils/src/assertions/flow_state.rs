//! Assertions on flow instances.

use parley_core::{FlowStatus, State};
use thiserror::Error;

/// Error type for flow state validation failures
#[derive(Debug, Error, PartialEq)]
pub enum FlowStateAssertionError {
    #[error("Flow '{0}' has no instance")]
    NoInstance(String),

    #[error("Flow '{flow_id}': expected {expected:?}, got {actual:?}")]
    InvalidStatus {
        flow_id: String,
        expected: FlowStatus,
        actual: FlowStatus,
    },

    #[error("Context key '{0}' is not set")]
    MissingContextKey(String),
}

/// Asserts that the most recent instance of `flow_id` has `expected` status.
pub fn assert_flow_status(
    state: &State,
    flow_id: &str,
    expected: FlowStatus,
) -> Result<(), FlowStateAssertionError> {
    let instance = state
        .latest_instance(flow_id)
        .ok_or_else(|| FlowStateAssertionError::NoInstance(flow_id.to_string()))?;
    if instance.status != expected {
        return Err(FlowStateAssertionError::InvalidStatus {
            flow_id: flow_id.to_string(),
            expected,
            actual: instance.status,
        });
    }
    Ok(())
}

/// Asserts that the global context holds `key`, returning its value.
pub fn assert_context_value<'a>(
    state: &'a State,
    key: &str,
) -> Result<&'a serde_json::Value, FlowStateAssertionError> {
    state
        .context
        .get(key)
        .ok_or_else(|| FlowStateAssertionError::MissingContextKey(key.to_string()))
}
