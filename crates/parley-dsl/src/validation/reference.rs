use std::collections::HashSet;

use parley_core::domain::flow_config::undefined_flow_references;
use parley_core::MAIN_FLOW_ID;

use crate::document::ParsedDocument;
use crate::validation::{error_codes, ValidationError, Validator};

/// Validates that every started, awaited or activated flow is defined and
/// that the document has a `main` flow
#[derive(Debug, Default)]
pub struct ReferenceValidator;

impl ReferenceValidator {
    /// Create a new reference validator
    pub fn new() -> Self {
        ReferenceValidator
    }
}

impl Validator for ReferenceValidator {
    fn validate(&self, document: &ParsedDocument) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if document.flow(MAIN_FLOW_ID).is_none() {
            errors.push(ValidationError {
                code: error_codes::MISSING_MAIN_FLOW,
                message: format!("No '{}' flow defined", MAIN_FLOW_ID),
                path: Some("flows".to_string()),
            });
        }

        let available: Vec<String> = document
            .flows
            .iter()
            .map(|flow| format!("'{}'", flow.name))
            .collect();

        for (flow, target) in undefined_flow_references(&document.flows, &HashSet::new()) {
            let idx = document
                .flows
                .iter()
                .position(|candidate| candidate.name == flow)
                .unwrap_or_default();
            errors.push(ValidationError {
                code: error_codes::INVALID_REFERENCE,
                message: format!(
                    "Flow '{}' references undefined flow '{}'. Available flows: {}",
                    flow,
                    target,
                    available.join(", ")
                ),
                path: Some(format!("flows[{}].elements", idx)),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{FlowDefinition, FlowElement};
    use serde_json::Map;

    #[test]
    fn test_undefined_reference_and_missing_main() {
        let doc = ParsedDocument {
            dsl_version: "1.0".to_string(),
            flows: vec![FlowDefinition::new("greeting")
                .element(FlowElement::await_flow("bot say hi", Map::new()))],
        };

        let errors = ReferenceValidator::new().validate(&doc);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code, error_codes::MISSING_MAIN_FLOW);
        assert_eq!(errors[1].code, error_codes::INVALID_REFERENCE);
        assert!(errors[1].message.contains("'bot say hi'"));
    }
}
