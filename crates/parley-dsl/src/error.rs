use std::fmt;

use parley_core::CoreError;
use thiserror::Error;

use crate::validation::ValidationError;

/// All possible errors that can occur while loading flow documents
#[derive(Error, Debug)]
pub enum DslError {
    /// Errors that occur during YAML parsing
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A single validation error
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    /// Multiple validation errors
    #[error("{}", MultipleErrorsFormat(.0))]
    MultipleValidationErrors(Vec<ValidationError>),

    /// Unsupported DSL version
    #[error("Unsupported DSL version: {0}")]
    UnsupportedVersion(String),

    /// Flow configs could not be built
    #[error("Flow definition error: {0}")]
    DefinitionError(#[from] CoreError),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

struct MultipleErrorsFormat<'a>(&'a [ValidationError]);

impl fmt::Display for MultipleErrorsFormat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multiple validation errors ({} issues):", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, err)?;
        }
        Ok(())
    }
}

impl DslError {
    /// Create a DslError from a list of validation errors
    pub fn from_validation_errors(mut errors: Vec<ValidationError>) -> Self {
        match errors.len() {
            0 => DslError::InternalError(
                "Called from_validation_errors with empty vector".to_string(),
            ),
            1 => DslError::ValidationError(errors.remove(0)),
            _ => DslError::MultipleValidationErrors(errors),
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            DslError::YamlError(_) => "ERR_DSL_YAML_PARSE",
            DslError::ValidationError(err) => err.code,
            DslError::MultipleValidationErrors(_) => "ERR_DSL_VALIDATION_MULTIPLE",
            DslError::UnsupportedVersion(_) => "ERR_DSL_UNSUPPORTED_VERSION",
            DslError::DefinitionError(_) => "ERR_DSL_DEFINITION",
            DslError::InternalError(_) => "ERR_DSL_INTERNAL",
        }
    }
}

impl From<DslError> for CoreError {
    fn from(err: DslError) -> Self {
        match err {
            DslError::DefinitionError(err) => err,
            other => CoreError::ParseError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::error_codes;

    fn validation_error(message: &str) -> ValidationError {
        ValidationError {
            code: error_codes::INVALID_REFERENCE,
            message: message.to_string(),
            path: None,
        }
    }

    #[test]
    fn test_from_validation_errors() {
        let single = DslError::from_validation_errors(vec![validation_error("a")]);
        assert_eq!(single.error_code(), error_codes::INVALID_REFERENCE);

        let multiple =
            DslError::from_validation_errors(vec![validation_error("a"), validation_error("b")]);
        assert_eq!(multiple.error_code(), "ERR_DSL_VALIDATION_MULTIPLE");
        assert!(multiple.to_string().starts_with("Multiple validation errors (2 issues):"));

        let empty = DslError::from_validation_errors(Vec::new());
        assert_eq!(empty.error_code(), "ERR_DSL_INTERNAL");
    }

    #[test]
    fn test_definition_errors_convert_back_to_core() {
        let err: CoreError = DslError::DefinitionError(CoreError::DuplicateFlow("main".into())).into();
        assert_eq!(err, CoreError::DuplicateFlow("main".into()));

        let err: CoreError = DslError::UnsupportedVersion("9".into()).into();
        assert!(matches!(err, CoreError::ParseError(_)));
    }
}
