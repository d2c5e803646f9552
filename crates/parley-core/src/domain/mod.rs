/// Actions and action event naming
pub mod action;

/// Events
pub mod event;

/// Value resolution and conditions
pub mod expression;

/// Compiled flow configs
pub mod flow_config;

/// Parser output
pub mod flow_definition;

/// Live flow instances
pub mod flow_state;

/// Conversation state
pub mod state;
