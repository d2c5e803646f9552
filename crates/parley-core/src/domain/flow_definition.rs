//! Flow definitions as produced by a parser.
//!
//! These are the source-level instructions. They are lowered into the
//! runtime [`Element`](super::flow_config::Element) sequence when flow
//! configs are built.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::expression::Condition;

/// A decorator such as `active` or `override`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decorator {
    /// Decorator name
    pub name: String,
    /// Decorator parameters
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Decorator {
    /// Decorator without parameters
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Map::new(),
        }
    }
}

/// A declared flow parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowParameter {
    /// Parameter name, without `$`
    pub name: String,
    /// Value bound when the caller does not pass one
    #[serde(default)]
    pub default: Option<Value>,
}

/// A flow as returned by the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Flow name
    pub name: String,
    /// Ordered source instructions
    #[serde(default)]
    pub elements: Vec<FlowElement>,
    /// Declared parameters
    #[serde(default)]
    pub parameters: Vec<FlowParameter>,
    /// Variables reported back when the flow finishes
    #[serde(default)]
    pub return_members: Vec<String>,
    /// Decorators, same-named entries are merged
    #[serde(default)]
    pub decorators: Vec<Decorator>,
    /// Source text the flow was parsed from
    #[serde(default)]
    pub source_code: Option<String>,
    /// File the flow was parsed from
    #[serde(default)]
    pub source_file: Option<String>,
}

impl FlowDefinition {
    /// Create an empty definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: Vec::new(),
            parameters: Vec::new(),
            return_members: Vec::new(),
            decorators: Vec::new(),
            source_code: None,
            source_file: None,
        }
    }

    /// Append an element
    pub fn element(mut self, element: FlowElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Add a decorator
    pub fn decorator(mut self, name: impl Into<String>) -> Self {
        self.decorators.push(Decorator::named(name));
        self
    }

    /// Add a parameter
    pub fn parameter(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        self.parameters.push(FlowParameter {
            name: name.into(),
            default,
        });
        self
    }
}

/// Wait for an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Event name
    pub event: String,
    /// Expected argument values, may reference variables
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Bind the matched event arguments to this variable
    #[serde(default)]
    pub capture: Option<String>,
}

/// Emit an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendSpec {
    /// Event name
    pub event: String,
    /// Event arguments, may reference variables
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Start an action or a flow without waiting for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSpec {
    /// Action name
    #[serde(default)]
    pub action: Option<String>,
    /// Flow name
    #[serde(default)]
    pub flow: Option<String>,
    /// Arguments
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Variable receiving the reference
    #[serde(default, rename = "as")]
    pub reference: Option<String>,
}

/// Start an action or a flow and wait until it finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitSpec {
    /// Action name
    #[serde(default)]
    pub action: Option<String>,
    /// Flow name
    #[serde(default)]
    pub flow: Option<String>,
    /// Arguments
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Variable receiving the return value
    #[serde(default)]
    pub result: Option<String>,
}

/// Stop a referenced action or flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSpec {
    /// Variable holding the reference
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Start a flow that restarts whenever it finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateSpec {
    /// Flow name
    pub flow: String,
    /// Arguments
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Assign a variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetSpec {
    /// Variable name, without `$`
    pub variable: String,
    /// Value, may reference variables
    pub value: Value,
}

/// Conditional branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfSpec {
    /// Condition
    pub condition: Condition,
    /// Taken when the condition holds
    #[serde(default)]
    pub then: Vec<FlowElement>,
    /// Taken otherwise
    #[serde(default, rename = "else")]
    pub otherwise: Vec<FlowElement>,
}

/// Loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileSpec {
    /// Checked before every iteration
    pub condition: Condition,
    /// Loop body
    #[serde(default, rename = "do")]
    pub body: Vec<FlowElement>,
}

/// Finish the flow early
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSpec {
    /// Return value
    #[serde(default)]
    pub value: Option<Value>,
}

/// Fail the flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbortSpec {
    /// Failure reason
    #[serde(default)]
    pub reason: Option<String>,
}

/// Source-level flow instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowElement {
    /// Wait for a matching event
    Match(MatchSpec),
    /// Emit an event
    Send(SendSpec),
    /// Start an action or flow
    Start(StartSpec),
    /// Start an action or flow and wait for it
    Await(AwaitSpec),
    /// Stop an action or flow
    Stop(StopSpec),
    /// Activate a flow
    Activate(ActivateSpec),
    /// Assign a variable
    Set(SetSpec),
    /// Run branches concurrently, continue when all finished
    All(Vec<Vec<FlowElement>>),
    /// Run branches concurrently, continue when the first finished
    Any(Vec<Vec<FlowElement>>),
    /// Conditional
    If(IfSpec),
    /// Loop
    While(WhileSpec),
    /// Finish the flow
    Return(ReturnSpec),
    /// Fail the flow
    Abort(AbortSpec),
    /// Log a message
    Log(String),
}

impl FlowElement {
    /// `match` on an event name with expected arguments
    pub fn match_event(event: impl Into<String>, arguments: Map<String, Value>) -> Self {
        FlowElement::Match(MatchSpec {
            event: event.into(),
            arguments,
            capture: None,
        })
    }

    /// `send` an event
    pub fn send(event: impl Into<String>, arguments: Map<String, Value>) -> Self {
        FlowElement::Send(SendSpec {
            event: event.into(),
            arguments,
        })
    }

    /// `await` an action
    pub fn await_action(action: impl Into<String>, arguments: Map<String, Value>) -> Self {
        FlowElement::Await(AwaitSpec {
            action: Some(action.into()),
            flow: None,
            arguments,
            result: None,
        })
    }

    /// `await` a flow
    pub fn await_flow(flow: impl Into<String>, arguments: Map<String, Value>) -> Self {
        FlowElement::Await(AwaitSpec {
            action: None,
            flow: Some(flow.into()),
            arguments,
            result: None,
        })
    }

    /// Flow names this element starts, including nested elements
    pub fn referenced_flows(&self) -> Vec<&str> {
        match self {
            FlowElement::Start(spec) => spec.flow.as_deref().into_iter().collect(),
            FlowElement::Await(spec) => spec.flow.as_deref().into_iter().collect(),
            FlowElement::Activate(spec) => vec![spec.flow.as_str()],
            FlowElement::All(branches) | FlowElement::Any(branches) => branches
                .iter()
                .flatten()
                .flat_map(|element| element.referenced_flows())
                .collect(),
            FlowElement::If(spec) => spec
                .then
                .iter()
                .chain(spec.otherwise.iter())
                .flat_map(|element| element.referenced_flows())
                .collect(),
            FlowElement::While(spec) => spec
                .body
                .iter()
                .flat_map(|element| element.referenced_flows())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_deserializes_from_single_key_map() {
        let element: FlowElement = serde_json::from_value(json!({
            "await": {"action": "UtteranceBotAction", "arguments": {"script": "Hi"}, "result": "r"}
        }))
        .unwrap();

        match element {
            FlowElement::Await(spec) => {
                assert_eq!(spec.action.as_deref(), Some("UtteranceBotAction"));
                assert_eq!(spec.result.as_deref(), Some("r"));
            }
            other => panic!("unexpected element {:?}", other),
        }
    }

    #[test]
    fn test_referenced_flows_are_collected_recursively() {
        let element = FlowElement::Any(vec![
            vec![FlowElement::await_flow("user said hi", Map::new())],
            vec![FlowElement::While(WhileSpec {
                condition: Condition::Truthy(json!(true)),
                body: vec![FlowElement::Activate(ActivateSpec {
                    flow: "handle errors".into(),
                    arguments: Map::new(),
                })],
            })],
        ]);

        assert_eq!(element.referenced_flows(), vec!["user said hi", "handle errors"]);
    }
}
