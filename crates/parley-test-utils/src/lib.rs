//! Testing utilities for the Parley runtime.
//!
//! This crate provides a conversation harness that plays the role of the
//! outside world, assertion helpers for event streams and flow states,
//! canned actions, flow document generators and test logging setup.

pub mod actions;
pub mod assertions;
pub mod chat;
pub mod data_generators;
pub mod logging;

/// Re-export commonly used types for convenience
pub use mockall;

pub use chat::TestChat;
pub use logging::init_test_logging;
