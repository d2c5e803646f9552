//! Configuration for the Parley runtime
//!
//! Every field has a serde default so partial documents deserialize.
//! [`RuntimeConfig::from_env`] overlays `PARLEY_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use parley_core::{CoreError, DEFAULT_HISTORY_LIMIT};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Events processed per cycle before bailing out
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Size of the processed event history kept in the state, also the
    /// number of terminated flow instances and actions retained
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Run every local action synchronously
    #[serde(default)]
    pub disable_async_execution: bool,

    /// Base URL of a remote actions server
    #[serde(default)]
    pub actions_server_url: Option<String>,

    /// `source_uid` of the events generated by the runtime
    #[serde(default = "default_event_source_uid")]
    pub event_source_uid: String,

    /// Capacity of the action event queues
    #[serde(default = "default_action_queue_capacity")]
    pub action_queue_capacity: usize,

    /// Pause after each step so background actions can progress (milliseconds)
    #[serde(default = "default_async_yield_ms")]
    pub async_yield_ms: u64,

    /// Consecutive runtime faults converted for one input event
    #[serde(default = "default_max_fault_retries")]
    pub max_fault_retries: usize,

    /// Timeout of remote action requests (seconds)
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_max_events() -> usize {
    500
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_event_source_uid() -> String {
    "parley-runtime".to_string()
}

fn default_action_queue_capacity() -> usize {
    1024
}

fn default_async_yield_ms() -> u64 {
    1
}

fn default_max_fault_retries() -> usize {
    10
}

fn default_remote_timeout_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            history_limit: default_history_limit(),
            disable_async_execution: false,
            actions_server_url: None,
            event_source_uid: default_event_source_uid(),
            action_queue_capacity: default_action_queue_capacity(),
            async_yield_ms: default_async_yield_ms(),
            max_fault_retries: default_max_fault_retries(),
            remote_timeout_secs: default_remote_timeout_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = env::var(name) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Invalid {} value: {}", name, raw),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from defaults and `PARLEY_*` environment variables
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();

        parse_var("PARLEY_MAX_EVENTS", &mut config.max_events);
        parse_var("PARLEY_HISTORY_LIMIT", &mut config.history_limit);
        parse_var(
            "PARLEY_DISABLE_ASYNC_EXECUTION",
            &mut config.disable_async_execution,
        );
        parse_var("PARLEY_ACTION_QUEUE_CAPACITY", &mut config.action_queue_capacity);
        parse_var("PARLEY_ASYNC_YIELD_MS", &mut config.async_yield_ms);
        parse_var("PARLEY_MAX_FAULT_RETRIES", &mut config.max_fault_retries);
        parse_var("PARLEY_REMOTE_TIMEOUT_SECS", &mut config.remote_timeout_secs);
        parse_var("PARLEY_LOG_JSON", &mut config.logging.json);

        if let Ok(url) = env::var("PARLEY_ACTIONS_SERVER_URL") {
            config.actions_server_url = Some(url).filter(|url| !url.is_empty());
        }
        if let Ok(source_uid) = env::var("PARLEY_EVENT_SOURCE_UID") {
            config.event_source_uid = source_uid;
        }
        if let Ok(filter) = env::var("PARLEY_LOG") {
            config.logging.filter = filter;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_events == 0 {
            return Err(CoreError::ConfigurationError(
                "max_events must be greater than 0".to_string(),
            ));
        }
        if self.action_queue_capacity == 0 {
            return Err(CoreError::ConfigurationError(
                "action_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.event_source_uid.is_empty() {
            return Err(CoreError::ConfigurationError(
                "event_source_uid must not be empty".to_string(),
            ));
        }
        if let Some(url) = &self.actions_server_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CoreError::ConfigurationError(format!(
                    "actions_server_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        Ok(())
    }

    /// The micro-yield between steps
    pub fn async_yield(&self) -> Duration {
        Duration::from_millis(self.async_yield_ms)
    }

    /// Remote request timeout
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_events, 500);
        assert_eq!(config.history_limit, 500);
        assert_eq!(config.event_source_uid, "parley-runtime");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"max_events": 20, "logging": {"json": true}}"#).unwrap();
        assert_eq!(config.max_events, 20);
        assert_eq!(config.action_queue_capacity, 1024);
        assert_eq!(config.logging.filter, "info");
        assert!(config.logging.json);
    }

    #[test]
    fn test_validation() {
        let config = RuntimeConfig {
            actions_server_url: Some("localhost:8001".to_string()),
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::ConfigurationError(_))
        ));

        let config = RuntimeConfig {
            max_events: 0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
