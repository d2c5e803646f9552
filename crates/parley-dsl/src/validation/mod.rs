use std::error::Error;
use std::fmt;

use crate::document::ParsedDocument;
use crate::error::DslError;

mod flow_validator;
mod reference;

pub use flow_validator::FlowValidator;
pub use reference::ReferenceValidator;

/// A problem found while validating a flow document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Error code (one of [`error_codes`])
    pub code: &'static str,

    /// Human-readable error message
    pub message: String,

    /// Optional path to the location of the error (e.g., "flows[0].elements[2]")
    pub path: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {} (at {})", self.code, self.message, path)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl Error for ValidationError {}

/// Validation error codes
pub mod error_codes {
    /// Unknown flow referenced
    pub const INVALID_REFERENCE: &str = "ERR_DSL_VALIDATION_INVALID_REFERENCE";

    /// Duplicate name found
    pub const DUPLICATE_ID: &str = "ERR_DSL_VALIDATION_DUPLICATE_ID";

    /// Missing required field
    pub const MISSING_REQUIRED_FIELD: &str = "ERR_DSL_VALIDATION_MISSING_REQUIRED_FIELD";

    /// Flow name starts with an instruction keyword
    pub const RESERVED_KEYWORD: &str = "ERR_DSL_VALIDATION_RESERVED_KEYWORD";

    /// Malformed instruction
    pub const INVALID_ELEMENT: &str = "ERR_DSL_VALIDATION_INVALID_ELEMENT";

    /// The document has no `main` flow
    pub const MISSING_MAIN_FLOW: &str = "ERR_DSL_VALIDATION_MISSING_MAIN_FLOW";
}

/// A check over one aspect of a flow document
pub trait Validator {
    /// Validate the document and return every problem found
    fn validate(&self, document: &ParsedDocument) -> Vec<ValidationError>;
}

fn run_validators(
    document: &ParsedDocument,
    validators: Vec<Box<dyn Validator>>,
) -> Result<(), DslError> {
    let errors: Vec<ValidationError> = validators
        .iter()
        .flat_map(|validator| validator.validate(document))
        .collect();

    if !errors.is_empty() {
        return Err(DslError::from_validation_errors(errors));
    }
    Ok(())
}

/// Validate a complete conversation document.
///
/// Every flow reference must resolve inside the document and a `main` flow
/// must exist.
pub fn validate_document(document: &ParsedDocument) -> Result<(), DslError> {
    run_validators(
        document,
        vec![
            Box::new(FlowValidator::new()),
            Box::new(ReferenceValidator::new()),
        ],
    )
}

/// Validate flows added to a running conversation.
///
/// References are not checked since the targets may live in the running
/// conversation.
pub fn validate_structure(document: &ParsedDocument) -> Result<(), DslError> {
    run_validators(document, vec![Box::new(FlowValidator::new())])
}
