//! Assertion utilities for event streams and conversation state.
//!
//! The helpers return `Result`s so tests can either `unwrap()` them or
//! inspect the failure.

mod events;
mod flow_state;

pub use events::*;
pub use flow_state::*;
