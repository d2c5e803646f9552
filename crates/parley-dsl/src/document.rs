use parley_core::FlowDefinition;
use serde::{Deserialize, Serialize};

/// Supported document version
pub const SUPPORTED_DSL_VERSION: &str = "1.0";

/// A parsed flow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// Document format version
    pub dsl_version: String,
    /// Flows in declaration order
    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
}

impl ParsedDocument {
    /// Look up a flow by name
    pub fn flow(&self, name: &str) -> Option<&FlowDefinition> {
        self.flows.iter().find(|flow| flow.name == name)
    }
}
