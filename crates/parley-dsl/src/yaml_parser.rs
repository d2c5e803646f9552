use lazy_static::lazy_static;
use parley_core::{CoreError, FlowDefinition, FlowSourceParser};
use regex::Regex;
use serde::Deserialize;

use crate::document::{ParsedDocument, SUPPORTED_DSL_VERSION};
use crate::error::DslError;
use crate::parser::{from_yaml_str, parse_flow_document};
use crate::validation::validate_structure;

lazy_static! {
    static ref FLOW_NAME: Regex =
        Regex::new(r#"(?m)^\s*-?\s*name:\s*["']?([^"'\n]+?)["']?\s*$"#).unwrap();
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlowSource {
    Many(Vec<FlowDefinition>),
    One(FlowDefinition),
}

/// [`FlowSourceParser`] for YAML flow sources.
///
/// Accepts a full document (with `dsl_version`), a list of flows or a single
/// flow. Only the structure is validated; references may point at flows of
/// the running conversation.
#[derive(Debug, Default, Clone)]
pub struct YamlFlowParser;

impl YamlFlowParser {
    /// Create a parser
    pub fn new() -> Self {
        YamlFlowParser
    }

    /// Parse and validate a flow source
    pub fn parse_source(&self, source: &str) -> Result<ParsedDocument, DslError> {
        let document = if source.contains("dsl_version") {
            parse_flow_document(source)?
        } else {
            let flows = match from_yaml_str::<FlowSource>(source)? {
                FlowSource::Many(flows) => flows,
                FlowSource::One(flow) => vec![flow],
            };
            let flows = flows
                .into_iter()
                .map(|mut flow| {
                    if flow.source_code.is_none() {
                        flow.source_code = Some(source.to_string());
                    }
                    flow
                })
                .collect();
            ParsedDocument {
                dsl_version: SUPPORTED_DSL_VERSION.to_string(),
                flows,
            }
        };

        validate_structure(&document)?;
        Ok(document)
    }
}

impl FlowSourceParser for YamlFlowParser {
    fn parse_flows(&self, source: &str) -> Result<Vec<FlowDefinition>, CoreError> {
        Ok(self.parse_source(source)?.flows)
    }

    fn flow_name_hint(&self, source: &str) -> Option<String> {
        FLOW_NAME
            .captures(source)
            .and_then(|captures| captures.get(1))
            .map(|name| name.as_str().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flow_and_list() {
        let parser = YamlFlowParser::new();

        let single = parser
            .parse_flows("name: bot greet\nelements:\n  - log: hi\n")
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].name, "bot greet");

        assert_eq!(single[0].elements, vec![parley_core::FlowElement::Log("hi".into())]);

        let many = parser
            .parse_flows("- name: first\n  elements:\n    - send:\n        event: Ping\n- name: second\n")
            .unwrap();
        let names: Vec<&str> = many.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(matches!(many[0].elements[0], parley_core::FlowElement::Send(_)));
    }

    #[test]
    fn test_invalid_source_keeps_name_hint() {
        let parser = YamlFlowParser::new();
        let source = "name: \"bot broken\"\nelements:\n  - start: {}\n";

        assert!(parser.parse_flows(source).is_err());
        assert_eq!(parser.flow_name_hint(source).as_deref(), Some("bot broken"));
        assert_eq!(parser.flow_name_hint("elements: []"), None);
    }
}
