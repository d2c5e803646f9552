//!
//! Parley Core - flow data model and state machine
//!
//! This crate holds the conversation data model (events, actions, flow
//! configs, flow instances and the state passed between processing cycles)
//! and the stepper that advances flow instances on events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - events, actions, flows and state
pub mod domain;

/// Error types
pub mod error;

/// Uid generation
pub mod ids;

/// Parser collaborator contract
pub mod parser;

/// Flow state machine
pub mod statemachine;

pub use domain::action::{parse_action_event, Action, ActionEventKind, ActionStatus};
pub use domain::event::{
    arguments, internal_events, Event, EventKind, CHECK_LOCAL_ASYNC, LOCAL_ASYNC_COUNTER,
};
pub use domain::expression::{Condition, Scope};
pub use domain::flow_config::{
    create_flow_configs, Element, FlowConfig, JoinMode, ACTIVE_DECORATOR, MAIN_FLOW_ID,
    OVERRIDE_DECORATOR,
};
pub use domain::flow_definition::{Decorator, FlowDefinition, FlowElement, FlowParameter};
pub use domain::flow_state::{
    EventPattern, FlowHead, FlowState, FlowStatus, ForkedAction, HeadStatus,
};
pub use domain::state::{State, DEFAULT_HISTORY_LIMIT};
pub use error::{CoreError, FaultKind, RuntimeFault, StepResult};
pub use parser::FlowSourceParser;
pub use statemachine::run_to_completion;
