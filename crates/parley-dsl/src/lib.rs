//! # Parley DSL
//!
//! YAML documents describing conversation flows. This crate parses them into
//! [`FlowDefinition`]s, validates names and references, and builds the flow
//! config map the runtime is started with.
//!
//! ## Example
//!
//! ```
//! use parley_dsl::load_flow_configs;
//!
//! let yaml = r#"
//! dsl_version: "1.0"
//! flows:
//!   - name: main
//!     elements:
//!       - activate:
//!           flow: greeting
//!   - name: greeting
//!     elements:
//!       - match:
//!           event: UtteranceUserActionFinished
//!           arguments:
//!             final_transcript: hi
//!       - await:
//!           action: UtteranceBotAction
//!           arguments:
//!             script: Hello there!
//! "#;
//!
//! let configs = load_flow_configs(yaml).unwrap();
//! assert_eq!(configs.keys().collect::<Vec<_>>(), vec!["main", "greeting"]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod parser;
mod yaml_parser;

pub mod validation;

use std::sync::Arc;

use indexmap::IndexMap;
use parley_core::{create_flow_configs, FlowConfig};

pub use document::{ParsedDocument, SUPPORTED_DSL_VERSION};
pub use error::DslError;
pub use parser::parse_flow_document;
pub use validation::ValidationError;
pub use yaml_parser::YamlFlowParser;

/// Parse and validate a flow document.
///
/// # Errors
///
/// * `DslError::YamlError` if the YAML is malformed
/// * `DslError::UnsupportedVersion` for any version other than `1.0`
/// * `DslError::ValidationError` / `MultipleValidationErrors` for invalid flows
pub fn parse_and_validate_flow_document(yaml_str: &str) -> Result<ParsedDocument, DslError> {
    let document = parse_flow_document(yaml_str)?;
    validation::validate_document(&document)?;
    tracing::debug!(flows = document.flows.len(), "Flow document validated");
    Ok(document)
}

/// Parse, validate and compile a flow document into the runtime config map.
///
/// Declaration order is kept; override flows replace their base in place.
pub fn load_flow_configs(yaml_str: &str) -> Result<IndexMap<String, Arc<FlowConfig>>, DslError> {
    let document = parse_and_validate_flow_document(yaml_str)?;
    Ok(create_flow_configs(&document.flows)?)
}

/// Version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
