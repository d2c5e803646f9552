use std::collections::HashSet;

use parley_core::domain::flow_config::{check_flow_name, OVERRIDE_DECORATOR};
use parley_core::{CoreError, FlowDefinition, FlowElement};

use crate::document::ParsedDocument;
use crate::validation::{error_codes, ValidationError, Validator};

/// Validates flow names, parameters and the shape of every instruction
#[derive(Debug, Default)]
pub struct FlowValidator;

impl FlowValidator {
    /// Create a new flow validator
    pub fn new() -> Self {
        FlowValidator
    }

    fn validate_name(&self, flow: &FlowDefinition, path: &str) -> Vec<ValidationError> {
        if flow.name.trim().is_empty() {
            return vec![ValidationError {
                code: error_codes::MISSING_REQUIRED_FIELD,
                message: "Flow name must not be empty".to_string(),
                path: Some(format!("{}.name", path)),
            }];
        }

        match check_flow_name(&flow.name) {
            Err(CoreError::ReservedKeyword { name, keyword }) => vec![ValidationError {
                code: error_codes::RESERVED_KEYWORD,
                message: format!("Flow '{}' starts with keyword '{}'", name, keyword),
                path: Some(format!("{}.name", path)),
            }],
            _ => Vec::new(),
        }
    }

    fn validate_unique_parameters(&self, flow: &FlowDefinition, path: &str) -> Vec<ValidationError> {
        let mut seen = HashSet::with_capacity(flow.parameters.len());
        flow.parameters
            .iter()
            .enumerate()
            .filter(|(_, parameter)| !seen.insert(parameter.name.as_str()))
            .map(|(idx, parameter)| ValidationError {
                code: error_codes::DUPLICATE_ID,
                message: format!(
                    "Duplicate parameter '{}' in flow '{}'",
                    parameter.name, flow.name
                ),
                path: Some(format!("{}.parameters[{}]", path, idx)),
            })
            .collect()
    }

    fn validate_elements(&self, elements: &[FlowElement], path: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (idx, element) in elements.iter().enumerate() {
            let element_path = format!("{}[{}]", path, idx);
            errors.extend(self.validate_element(element, &element_path));
        }
        errors
    }

    fn validate_element(&self, element: &FlowElement, path: &str) -> Vec<ValidationError> {
        match element {
            FlowElement::Match(spec) => required(&spec.event, "event", path),
            FlowElement::Send(spec) => required(&spec.event, "event", path),
            FlowElement::Start(spec) => {
                validate_target(spec.action.as_deref(), spec.flow.as_deref(), path)
            }
            FlowElement::Await(spec) => {
                validate_target(spec.action.as_deref(), spec.flow.as_deref(), path)
            }
            FlowElement::Stop(spec) => required(&spec.reference, "ref", path),
            FlowElement::Activate(spec) => required(&spec.flow, "flow", path),
            FlowElement::Set(spec) => required(&spec.variable, "variable", path),
            FlowElement::All(branches) | FlowElement::Any(branches) => {
                if branches.is_empty() {
                    return vec![ValidationError {
                        code: error_codes::INVALID_ELEMENT,
                        message: "Concurrent group needs at least one branch".to_string(),
                        path: Some(path.to_string()),
                    }];
                }
                branches
                    .iter()
                    .enumerate()
                    .flat_map(|(idx, branch)| {
                        self.validate_elements(branch, &format!("{}.branches[{}]", path, idx))
                    })
                    .collect()
            }
            FlowElement::If(spec) => {
                let mut errors = self.validate_elements(&spec.then, &format!("{}.then", path));
                errors.extend(self.validate_elements(&spec.otherwise, &format!("{}.else", path)));
                errors
            }
            FlowElement::While(spec) => self.validate_elements(&spec.body, &format!("{}.do", path)),
            FlowElement::Return(_) | FlowElement::Abort(_) | FlowElement::Log(_) => Vec::new(),
        }
    }
}

fn required(value: &str, field: &str, path: &str) -> Vec<ValidationError> {
    if value.trim().is_empty() {
        vec![ValidationError {
            code: error_codes::MISSING_REQUIRED_FIELD,
            message: format!("Field '{}' must not be empty", field),
            path: Some(format!("{}.{}", path, field)),
        }]
    } else {
        Vec::new()
    }
}

fn validate_target(action: Option<&str>, flow: Option<&str>, path: &str) -> Vec<ValidationError> {
    match (action, flow) {
        (Some(action), None) if !action.ends_with("Action") => vec![ValidationError {
            code: error_codes::INVALID_ELEMENT,
            message: format!("Action name '{}' must end with 'Action'", action),
            path: Some(format!("{}.action", path)),
        }],
        (Some(_), None) => Vec::new(),
        (None, Some(flow)) => required(flow, "flow", path),
        _ => vec![ValidationError {
            code: error_codes::INVALID_ELEMENT,
            message: "Exactly one of 'action' or 'flow' must be given".to_string(),
            path: Some(path.to_string()),
        }],
    }
}

impl Validator for FlowValidator {
    fn validate(&self, document: &ParsedDocument) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut names = HashSet::with_capacity(document.flows.len());

        for (idx, flow) in document.flows.iter().enumerate() {
            let path = format!("flows[{}]", idx);
            errors.extend(self.validate_name(flow, &path));
            errors.extend(self.validate_unique_parameters(flow, &path));
            errors.extend(self.validate_elements(&flow.elements, &format!("{}.elements", path)));

            let is_override = flow.decorators.iter().any(|d| d.name == OVERRIDE_DECORATOR);
            if !is_override && !names.insert(flow.name.as_str()) {
                errors.push(ValidationError {
                    code: error_codes::DUPLICATE_ID,
                    message: format!(
                        "Multiple non-overriding flows with name '{}' detected",
                        flow.name
                    ),
                    path: Some(format!("{}.name", path)),
                });
            }
        }

        errors
    }
}
