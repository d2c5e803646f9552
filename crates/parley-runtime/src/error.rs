use parley_core::CoreError;
use thiserror::Error;

/// Failure of a single action invocation.
///
/// Never escapes a processing cycle; the driver turns it into a failed
/// `<X>ActionFinished` event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// No handler registered under this name
    #[error("Action '{0}' not found")]
    NotFound(String),

    /// The handler reported a failure
    #[error("Action '{action}' failed: {message}")]
    ExecutionFailed {
        /// Action name
        action: String,
        /// Failure description
        message: String,
    },

    /// The arguments do not fit the handler
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The remote actions server could not be reached or answered badly
    #[error("Failed to get response from {action} due to exception {message}")]
    Remote {
        /// Action name
        action: String,
        /// Transport or protocol failure
        message: String,
    },

    /// The engine side of an action queue is gone
    #[error("Action event queue closed")]
    QueueClosed,
}

impl ActionError {
    /// Shorthand for [`ActionError::ExecutionFailed`]
    pub fn failed(action: impl Into<String>, message: impl Into<String>) -> Self {
        ActionError::ExecutionFailed {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced to the caller of the runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Definition or state error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Invalid runtime setup
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
