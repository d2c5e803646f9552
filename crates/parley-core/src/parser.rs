use crate::domain::flow_definition::FlowDefinition;
use crate::error::CoreError;

/// Turns flow source text into flow definitions.
///
/// Used when flows are added to a running conversation.
pub trait FlowSourceParser: Send + Sync {
    /// Parse source text into definitions
    fn parse_flows(&self, source: &str) -> Result<Vec<FlowDefinition>, CoreError>;

    /// Best-effort name of the flow in a source that failed to parse
    fn flow_name_hint(&self, _source: &str) -> Option<String> {
        None
    }
}
