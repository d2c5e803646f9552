//! Actions executed by the runtime itself against the conversation state.

use parley_core::{
    arguments, FlowConfig, FlowDefinition, FlowElement, FlowSourceParser, State,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ActionError;

/// Adds flows to a running conversation
pub const ADD_FLOWS_ACTION: &str = "AddFlowsAction";

/// Removes flows from a running conversation
pub const REMOVE_FLOWS_ACTION: &str = "RemoveFlowsAction";

/// Engine-owned actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    /// `AddFlowsAction {config}`
    AddFlows,
    /// `RemoveFlowsAction {flow_ids}`
    RemoveFlows,
}

impl SystemAction {
    /// Look up by action name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            ADD_FLOWS_ACTION => Some(SystemAction::AddFlows),
            REMOVE_FLOWS_ACTION => Some(SystemAction::RemoveFlows),
            _ => None,
        }
    }

    /// Run against the state, returning the action's return value
    pub fn run(
        &self,
        state: &mut State,
        parser: Option<&dyn FlowSourceParser>,
        arguments: &serde_json::Map<String, Value>,
    ) -> Result<Value, ActionError> {
        match self {
            SystemAction::AddFlows => {
                let source = arguments.get("config").and_then(Value::as_str).ok_or_else(|| {
                    ActionError::InvalidParameters(
                        "Parameter 'config' in AddFlowsAction is not of type 'str'!".to_string(),
                    )
                })?;
                let parser = parser.ok_or_else(|| {
                    ActionError::failed(ADD_FLOWS_ACTION, "no flow parser configured")
                })?;
                Ok(json!(add_flows(state, parser, source)))
            }
            SystemAction::RemoveFlows => {
                let flow_ids: Vec<String> = match arguments.get("flow_ids") {
                    Some(Value::Array(ids)) => ids
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                    _ => {
                        return Err(ActionError::InvalidParameters(
                            "Parameter 'flow_ids' in RemoveFlowsAction must be a list".to_string(),
                        ))
                    }
                };
                info!(flow_ids = ?flow_ids, "Removing flows");
                Ok(json!(state.remove_flows(&flow_ids)))
            }
        }
    }
}

/// Flow reporting an internal error in place of one that failed to parse
fn error_stub_flow(name: &str) -> FlowDefinition {
    FlowDefinition::new(name).element(FlowElement::await_action(
        "UtteranceBotAction",
        arguments(json!({ "script": format!("Internal error on flow `{}`.", name) })),
    ))
}

/// Parse `source` and register its flows, returning the names added.
///
/// Unparsable sources are replaced by an error stub flow. A flow whose name
/// already exists stops the loading of the remaining flows.
pub fn add_flows(state: &mut State, parser: &dyn FlowSourceParser, source: &str) -> Vec<String> {
    info!("Adding flows");
    let definitions = match parser.parse_flows(source) {
        Ok(definitions) => definitions,
        Err(err) => {
            let name = parser
                .flow_name_hint(source)
                .unwrap_or_else(|| "unnamed flow".to_string());
            warn!(flow_id = %name, error = %err, "Failed parsing a generated flow, using an error flow instead");
            vec![error_stub_flow(&name)]
        }
    };

    let mut added = Vec::new();
    for definition in definitions {
        if state.flow_configs.contains_key(&definition.name) {
            warn!(flow_id = %definition.name, "Flow already exists! Not loaded!");
            break;
        }
        match FlowConfig::from_definition(&definition) {
            Ok(config) => {
                added.push(config.id.clone());
                state.add_flow_config(config);
            }
            Err(err) => {
                warn!(flow_id = %definition.name, error = %err, "Flow not loaded");
            }
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{create_flow_configs, CoreError, Element};

    struct LineParser;

    impl FlowSourceParser for LineParser {
        fn parse_flows(&self, source: &str) -> Result<Vec<FlowDefinition>, CoreError> {
            source
                .lines()
                .map(|line| match line.strip_prefix("flow ") {
                    Some(name) => Ok(FlowDefinition::new(name)),
                    None => Err(CoreError::ParseError(format!("bad line '{}'", line))),
                })
                .collect()
        }

        fn flow_name_hint(&self, source: &str) -> Option<String> {
            source.split_whitespace().nth(1).map(str::to_string)
        }
    }

    fn state() -> State {
        State::new(create_flow_configs(&[FlowDefinition::new("main")]).unwrap()).unwrap()
    }

    #[test]
    fn test_add_flows_stops_at_existing_name() {
        let mut state = state();
        let added = add_flows(&mut state, &LineParser, "flow a\nflow main\nflow b");

        assert_eq!(added, vec!["a".to_string()]);
        assert!(state.flow_configs.contains_key("a"));
        assert!(!state.flow_configs.contains_key("b"));
    }

    #[test]
    fn test_unparsable_source_becomes_error_flow() {
        let mut state = state();
        let added = add_flows(&mut state, &LineParser, "flw greeting\n  oops");

        assert_eq!(added, vec!["greeting".to_string()]);
        let config = &state.flow_configs["greeting"];
        match &config.elements[0] {
            Element::StartAction { action, arguments, .. } => {
                assert_eq!(action, "UtteranceBotAction");
                assert_eq!(arguments["script"], json!("Internal error on flow `greeting`."));
            }
            other => panic!("unexpected element {:?}", other),
        }
    }

    #[test]
    fn test_remove_flows_requires_list() {
        let mut state = state();
        let result = SystemAction::RemoveFlows.run(
            &mut state,
            None,
            &arguments(json!({"flow_ids": "main"})),
        );
        assert!(matches!(result, Err(ActionError::InvalidParameters(_))));

        let result = SystemAction::AddFlows.run(&mut state, None, &arguments(json!({"config": "flow a"})));
        assert!(matches!(result, Err(ActionError::ExecutionFailed { .. })));
    }
}
