//! Compiled flow configs.
//!
//! Building configs enforces the naming invariants (reserved keywords,
//! duplicates, overrides) and lowers the source instructions into a flat
//! element sequence with labels, jumps, forks and joins.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event::internal_events;
use super::expression::Condition;
use super::flow_definition::{Decorator, FlowDefinition, FlowElement, FlowParameter};
use crate::error::CoreError;

/// Instruction keywords a flow name may not start with
pub const RESERVED_KEYWORDS: [&str; 6] = ["send", "match", "start", "stop", "await", "activate"];

/// Decorator marking a flow as always on
pub const ACTIVE_DECORATOR: &str = "active";

/// Decorator replacing an existing flow with the same name
pub const OVERRIDE_DECORATOR: &str = "override";

/// Name of the root flow of a conversation
pub const MAIN_FLOW_ID: &str = "main";

/// Where a matched value is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Target variable
    pub variable: String,
    /// Event argument to store; the whole argument map when absent
    pub field: Option<String>,
}

/// A runtime `match` instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchElement {
    /// Event name
    pub event: String,
    /// Expected argument values
    pub arguments: Map<String, Value>,
    /// Variable holding the uid of the action the event must belong to
    pub action_ref: Option<String>,
    /// Variable holding the uid of the flow instance the event must belong to
    pub flow_ref: Option<String>,
    /// Where to store the match
    pub bind: Option<Binding>,
}

/// How a fork is joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinMode {
    /// Continue once every branch arrived
    All,
    /// Continue with the first branch, drop the others
    Any,
}

/// Runtime flow instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    /// Block until a matching event arrives
    Match(MatchElement),
    /// Emit an event
    Send {
        /// Event name
        event: String,
        /// Event arguments
        arguments: Map<String, Value>,
    },
    /// Create an action and emit its start event
    StartAction {
        /// Action name
        action: String,
        /// Start arguments
        arguments: Map<String, Value>,
        /// Variable receiving the action uid
        reference: String,
    },
    /// Emit a `StartFlow` event for a new child instance
    StartFlow {
        /// Flow to start
        flow_id: String,
        /// Flow arguments
        arguments: Map<String, Value>,
        /// Variable receiving the instance uid
        reference: Option<String>,
        /// Restart when finished
        activated: bool,
    },
    /// Stop the action or flow instance held by a variable
    Stop {
        /// Variable holding the uid
        reference: String,
    },
    /// Assign a variable
    Set {
        /// Variable name
        variable: String,
        /// Value
        value: Value,
    },
    /// Jump target
    Label(String),
    /// Jump, optionally only when a condition holds
    Goto {
        /// Target label
        label: String,
        /// Guard
        condition: Option<Condition>,
    },
    /// Split the current head into one head per label
    Fork {
        /// Fork identity shared with its joins
        fork_id: String,
        /// Branch entry labels
        labels: Vec<String>,
    },
    /// Merge the heads of a fork
    Join {
        /// Fork identity
        fork_id: String,
        /// Merge policy
        mode: JoinMode,
        /// Label to continue at
        exit: String,
    },
    /// Finish the flow
    Return {
        /// Return value
        value: Option<Value>,
    },
    /// Fail the flow
    Abort {
        /// Reason
        reason: Option<String>,
    },
    /// Log a message
    Log(String),
}

/// Static, compiled flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Flow name
    pub id: String,
    /// Flat element sequence
    pub elements: Vec<Element>,
    /// Label positions
    pub labels: HashMap<String, usize>,
    /// Declared parameters
    pub parameters: Vec<FlowParameter>,
    /// Variables reported when the flow finishes
    pub return_members: Vec<String>,
    /// Decorator name to merged parameters
    pub decorators: BTreeMap<String, Map<String, Value>>,
    /// Source text
    pub source_code: Option<String>,
    /// Source file
    pub source_file: Option<String>,
}

impl FlowConfig {
    /// Compile a definition
    pub fn from_definition(definition: &FlowDefinition) -> Result<Self, CoreError> {
        check_flow_name(&definition.name)?;

        let mut expander = Expander::new(&definition.name);
        expander.expand(&definition.elements)?;
        let elements = expander.elements;

        let labels = elements
            .iter()
            .enumerate()
            .filter_map(|(position, element)| match element {
                Element::Label(name) => Some((name.clone(), position)),
                _ => None,
            })
            .collect();

        Ok(Self {
            id: definition.name.clone(),
            elements,
            labels,
            parameters: definition.parameters.clone(),
            return_members: definition.return_members.clone(),
            decorators: decorators_to_map(&definition.decorators),
            source_code: definition.source_code.clone(),
            source_file: definition.source_file.clone(),
        })
    }

    /// Whether a decorator is present
    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.contains_key(name)
    }

    /// Decorated `active`
    pub fn is_active(&self) -> bool {
        self.has_decorator(ACTIVE_DECORATOR)
    }

    /// Decorated `override`
    pub fn is_override(&self) -> bool {
        self.has_decorator(OVERRIDE_DECORATOR)
    }

    /// Position of a label
    pub fn label_position(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }
}

/// Merge a decorator list into a name to parameters map
pub fn decorators_to_map(decorators: &[Decorator]) -> BTreeMap<String, Map<String, Value>> {
    let mut map: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for decorator in decorators {
        let entry = map.entry(decorator.name.clone()).or_default();
        for (key, value) in &decorator.parameters {
            entry.insert(key.clone(), value.clone());
        }
    }
    map
}

/// Reject names that start with an instruction keyword
pub fn check_flow_name(name: &str) -> Result<(), CoreError> {
    let first_word = name.split_whitespace().next().unwrap_or_default();
    match RESERVED_KEYWORDS.iter().find(|keyword| **keyword == first_word) {
        Some(keyword) => Err(CoreError::ReservedKeyword {
            name: name.to_string(),
            keyword: keyword.to_string(),
        }),
        None => Ok(()),
    }
}

/// Build the config map, preserving declaration order.
///
/// Overrides replace their base in place.
pub fn create_flow_configs(
    definitions: &[FlowDefinition],
) -> Result<IndexMap<String, Arc<FlowConfig>>, CoreError> {
    let mut bases: IndexMap<String, Arc<FlowConfig>> = IndexMap::new();
    let mut overrides: IndexMap<String, Arc<FlowConfig>> = IndexMap::new();

    for definition in definitions {
        let config = FlowConfig::from_definition(definition)?;
        if config.is_override() {
            if overrides.contains_key(&config.id) {
                return Err(CoreError::DuplicateOverride(config.id));
            }
            overrides.insert(config.id.clone(), Arc::new(config));
        } else {
            if bases.contains_key(&config.id) {
                return Err(CoreError::DuplicateFlow(config.id));
            }
            bases.insert(config.id.clone(), Arc::new(config));
        }
    }

    for (name, config) in overrides {
        match bases.get_mut(&name) {
            Some(base) => {
                tracing::debug!(flow_id = %name, "Flow overridden");
                *base = config;
            }
            None => return Err(CoreError::OrphanOverride(name)),
        }
    }

    Ok(bases)
}

/// Flow names referenced by a set of definitions that are not defined
pub fn undefined_flow_references<'a>(
    definitions: &'a [FlowDefinition],
    known: &HashSet<&str>,
) -> Vec<(&'a str, &'a str)> {
    let defined: HashSet<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
    definitions
        .iter()
        .flat_map(|definition| {
            definition
                .elements
                .iter()
                .flat_map(|element| element.referenced_flows())
                .map(move |target| (definition.name.as_str(), target))
        })
        .filter(|(_, target)| !defined.contains(target) && !known.contains(target))
        .collect()
}

struct Expander<'a> {
    flow_id: &'a str,
    counter: usize,
    elements: Vec<Element>,
}

impl<'a> Expander<'a> {
    fn new(flow_id: &'a str) -> Self {
        Self {
            flow_id,
            counter: 0,
            elements: Vec::new(),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("_{}_{}", prefix, self.counter)
    }

    fn invalid(&self, message: impl Into<String>) -> CoreError {
        CoreError::InvalidElement {
            flow_id: self.flow_id.to_string(),
            message: message.into(),
        }
    }

    fn check_action_name(&self, name: &str) -> Result<(), CoreError> {
        if name.len() > "Action".len() && name.ends_with("Action") {
            Ok(())
        } else {
            Err(self.invalid(format!("action name '{}' must end with 'Action'", name)))
        }
    }

    fn target<'s>(
        &self,
        action: &'s Option<String>,
        flow: &'s Option<String>,
    ) -> Result<Target<'s>, CoreError> {
        match (action, flow) {
            (Some(action), None) => {
                self.check_action_name(action)?;
                Ok(Target::Action(action))
            }
            (None, Some(flow)) => Ok(Target::Flow(flow)),
            _ => Err(self.invalid("exactly one of 'action' or 'flow' must be given")),
        }
    }

    fn expand(&mut self, elements: &[FlowElement]) -> Result<(), CoreError> {
        for element in elements {
            self.expand_element(element)?;
        }
        Ok(())
    }

    fn expand_element(&mut self, element: &FlowElement) -> Result<(), CoreError> {
        match element {
            FlowElement::Match(spec) => self.elements.push(Element::Match(MatchElement {
                event: spec.event.clone(),
                arguments: spec.arguments.clone(),
                action_ref: None,
                flow_ref: None,
                bind: spec.capture.clone().map(|variable| Binding {
                    variable,
                    field: None,
                }),
            })),
            FlowElement::Send(spec) => self.elements.push(Element::Send {
                event: spec.event.clone(),
                arguments: spec.arguments.clone(),
            }),
            FlowElement::Start(spec) => match self.target(&spec.action, &spec.flow)? {
                Target::Action(action) => {
                    let reference = match &spec.reference {
                        Some(reference) => reference.clone(),
                        None => self.next_id("action"),
                    };
                    self.elements.push(Element::StartAction {
                        action: action.to_string(),
                        arguments: spec.arguments.clone(),
                        reference,
                    });
                }
                Target::Flow(flow) => self.elements.push(Element::StartFlow {
                    flow_id: flow.to_string(),
                    arguments: spec.arguments.clone(),
                    reference: spec.reference.clone(),
                    activated: false,
                }),
            },
            FlowElement::Await(spec) => {
                let bind = spec.result.clone().map(|variable| Binding {
                    variable,
                    field: Some("return_value".to_string()),
                });
                match self.target(&spec.action, &spec.flow)? {
                    Target::Action(action) => {
                        let reference = self.next_id("action");
                        self.elements.push(Element::StartAction {
                            action: action.to_string(),
                            arguments: spec.arguments.clone(),
                            reference: reference.clone(),
                        });
                        self.elements.push(Element::Match(MatchElement {
                            event: format!("{}Finished", action),
                            arguments: Map::new(),
                            action_ref: Some(reference),
                            flow_ref: None,
                            bind,
                        }));
                    }
                    Target::Flow(flow) => {
                        let reference = self.next_id("flow");
                        self.elements.push(Element::StartFlow {
                            flow_id: flow.to_string(),
                            arguments: spec.arguments.clone(),
                            reference: Some(reference.clone()),
                            activated: false,
                        });
                        self.elements.push(Element::Match(MatchElement {
                            event: internal_events::FLOW_FINISHED.to_string(),
                            arguments: Map::new(),
                            action_ref: None,
                            flow_ref: Some(reference),
                            bind,
                        }));
                    }
                }
            }
            FlowElement::Stop(spec) => {
                if spec.reference.is_empty() {
                    return Err(self.invalid("'stop' needs a reference"));
                }
                self.elements.push(Element::Stop {
                    reference: spec.reference.trim_start_matches('$').to_string(),
                });
            }
            FlowElement::Activate(spec) => self.elements.push(Element::StartFlow {
                flow_id: spec.flow.clone(),
                arguments: spec.arguments.clone(),
                reference: None,
                activated: true,
            }),
            FlowElement::Set(spec) => self.elements.push(Element::Set {
                variable: spec.variable.trim_start_matches('$').to_string(),
                value: spec.value.clone(),
            }),
            FlowElement::All(branches) => self.expand_fork(branches, JoinMode::All)?,
            FlowElement::Any(branches) => self.expand_fork(branches, JoinMode::Any)?,
            FlowElement::If(spec) => {
                let else_label = self.next_id("else");
                let end_label = self.next_id("endif");
                self.elements.push(Element::Goto {
                    label: else_label.clone(),
                    condition: Some(Condition::Not(Box::new(spec.condition.clone()))),
                });
                self.expand(&spec.then)?;
                self.elements.push(Element::Goto {
                    label: end_label.clone(),
                    condition: None,
                });
                self.elements.push(Element::Label(else_label));
                self.expand(&spec.otherwise)?;
                self.elements.push(Element::Label(end_label));
            }
            FlowElement::While(spec) => {
                let start_label = self.next_id("while");
                let end_label = self.next_id("endwhile");
                self.elements.push(Element::Label(start_label.clone()));
                self.elements.push(Element::Goto {
                    label: end_label.clone(),
                    condition: Some(Condition::Not(Box::new(spec.condition.clone()))),
                });
                self.expand(&spec.body)?;
                self.elements.push(Element::Goto {
                    label: start_label,
                    condition: None,
                });
                self.elements.push(Element::Label(end_label));
            }
            FlowElement::Return(spec) => self.elements.push(Element::Return {
                value: spec.value.clone(),
            }),
            FlowElement::Abort(spec) => self.elements.push(Element::Abort {
                reason: spec.reason.clone(),
            }),
            FlowElement::Log(message) => self.elements.push(Element::Log(message.clone())),
        }
        Ok(())
    }

    fn expand_fork(&mut self, branches: &[Vec<FlowElement>], mode: JoinMode) -> Result<(), CoreError> {
        if branches.is_empty() {
            return Err(self.invalid("'all' and 'any' need at least one branch"));
        }
        let fork_id = self.next_id("fork");
        let exit = format!("{}_exit", fork_id);
        let labels: Vec<String> = (0..branches.len())
            .map(|index| format!("{}_branch_{}", fork_id, index))
            .collect();

        self.elements.push(Element::Fork {
            fork_id: fork_id.clone(),
            labels: labels.clone(),
        });
        for (branch, label) in branches.iter().zip(labels) {
            self.elements.push(Element::Label(label));
            self.expand(branch)?;
            self.elements.push(Element::Join {
                fork_id: fork_id.clone(),
                mode,
                exit: exit.clone(),
            });
        }
        self.elements.push(Element::Label(exit));
        Ok(())
    }
}

enum Target<'s> {
    Action(&'s str),
    Flow(&'s str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::arguments;
    use crate::domain::flow_definition::{AwaitSpec, IfSpec};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn flow(name: &str) -> FlowDefinition {
        FlowDefinition::new(name).element(FlowElement::send("Ping", Map::new()))
    }

    #[test]
    fn test_reserved_keyword_is_rejected() {
        for name in ["send greeting", "match user", "await something", "activate all"] {
            let result = create_flow_configs(&[flow(name)]);
            assert!(
                matches!(result, Err(CoreError::ReservedKeyword { .. })),
                "{} should be rejected",
                name
            );
        }

        assert!(create_flow_configs(&[flow("sender check")]).is_ok());
    }

    #[test]
    fn test_duplicate_non_override_is_rejected() {
        let result = create_flow_configs(&[flow("greet"), flow("greet")]);
        assert_eq!(result.unwrap_err(), CoreError::DuplicateFlow("greet".to_string()));
    }

    #[test]
    fn test_single_override_replaces_base_in_place() {
        let overriding = FlowDefinition::new("greet")
            .decorator(OVERRIDE_DECORATOR)
            .element(FlowElement::send("Hello", Map::new()));

        let configs =
            create_flow_configs(&[overriding, flow("main"), flow("greet")]).unwrap();

        let names: Vec<&str> = configs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["main", "greet"]);
        assert!(configs["greet"].is_override());
    }

    #[test]
    fn test_two_overrides_are_rejected() {
        let overriding = FlowDefinition::new("greet").decorator(OVERRIDE_DECORATOR);
        let result = create_flow_configs(&[flow("greet"), overriding.clone(), overriding]);
        assert_eq!(result.unwrap_err(), CoreError::DuplicateOverride("greet".to_string()));
    }

    #[test]
    fn test_override_without_base_is_rejected() {
        let overriding = FlowDefinition::new("greet").decorator(OVERRIDE_DECORATOR);
        let result = create_flow_configs(&[flow("main"), overriding]);
        assert_eq!(result.unwrap_err(), CoreError::OrphanOverride("greet".to_string()));
    }

    #[test]
    fn test_decorators_are_merged() {
        let definition = FlowDefinition {
            decorators: vec![
                Decorator {
                    name: "meta".into(),
                    parameters: arguments(json!({"a": 1})),
                },
                Decorator {
                    name: "meta".into(),
                    parameters: arguments(json!({"b": 2})),
                },
            ],
            ..FlowDefinition::new("main")
        };

        let config = FlowConfig::from_definition(&definition).unwrap();
        assert_eq!(config.decorators["meta"], arguments(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_await_action_expands_to_start_and_match() {
        let definition = FlowDefinition::new("bot greet").element(FlowElement::Await(AwaitSpec {
            action: Some("UtteranceBotAction".into()),
            flow: None,
            arguments: arguments(json!({"script": "Hi"})),
            result: Some("answer".into()),
        }));

        let config = FlowConfig::from_definition(&definition).unwrap();
        assert_eq!(config.elements.len(), 2);
        match (&config.elements[0], &config.elements[1]) {
            (Element::StartAction { action, reference, .. }, Element::Match(pattern)) => {
                assert_eq!(action, "UtteranceBotAction");
                assert_eq!(pattern.event, "UtteranceBotActionFinished");
                assert_eq!(pattern.action_ref.as_ref(), Some(reference));
                assert_eq!(
                    pattern.bind,
                    Some(Binding {
                        variable: "answer".into(),
                        field: Some("return_value".into())
                    })
                );
            }
            other => panic!("unexpected expansion {:?}", other),
        }
    }

    #[test]
    fn test_start_requires_exactly_one_target() {
        let definition = FlowDefinition::new("broken").element(FlowElement::Await(AwaitSpec {
            action: Some("UtteranceBotAction".into()),
            flow: Some("other".into()),
            arguments: Map::new(),
            result: None,
        }));
        assert!(matches!(
            FlowConfig::from_definition(&definition),
            Err(CoreError::InvalidElement { .. })
        ));

        let definition = FlowDefinition::new("broken")
            .element(FlowElement::await_action("Utterance", Map::new()));
        assert!(FlowConfig::from_definition(&definition).is_err());
    }

    #[test]
    fn test_if_and_fork_labels_are_resolvable() {
        let definition = FlowDefinition::new("branching")
            .element(FlowElement::If(IfSpec {
                condition: Condition::Truthy(json!("$flag")),
                then: vec![FlowElement::send("A", Map::new())],
                otherwise: vec![FlowElement::send("B", Map::new())],
            }))
            .element(FlowElement::All(vec![
                vec![FlowElement::match_event("X", Map::new())],
                vec![FlowElement::match_event("Y", Map::new())],
            ]));

        let config = FlowConfig::from_definition(&definition).unwrap();
        for element in &config.elements {
            match element {
                Element::Goto { label, .. } => assert!(config.label_position(label).is_some()),
                Element::Fork { labels, .. } => {
                    assert_eq!(labels.len(), 2);
                    assert!(labels.iter().all(|l| config.label_position(l).is_some()));
                }
                Element::Join { exit, .. } => assert!(config.label_position(exit).is_some()),
                _ => {}
            }
        }
    }

    #[test]
    fn test_undefined_flow_references() {
        let definitions = vec![
            FlowDefinition::new("main")
                .element(FlowElement::await_flow("greet", Map::new()))
                .element(FlowElement::await_flow("missing", Map::new())),
            flow("greet"),
        ];
        let known = HashSet::new();
        assert_eq!(
            undefined_flow_references(&definitions, &known),
            vec![("main", "missing")]
        );
    }
}
