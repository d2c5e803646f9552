//! Parley - an event-driven runtime for declarative conversational flows.
//!
//! This facade re-exports the workspace crates:
//!
//! * [`parley_core`]: events, actions, flow configs, state and the flow state machine
//! * [`parley_dsl`]: the YAML flow document format
//! * [`parley_runtime`]: the processing cycle and action execution
//!
//! ```
//! use parley::parley_runtime::{ActionDispatcher, Runtime, RuntimeConfig};
//!
//! let yaml = r#"
//! dsl_version: "1.0"
//! flows:
//!   - name: main
//!     elements:
//!       - await:
//!           action: UtteranceBotAction
//!           arguments:
//!             script: Welcome!
//! "#;
//!
//! let configs = parley::parley_dsl::load_flow_configs(yaml).unwrap();
//! let runtime = Runtime::new(RuntimeConfig::default(), configs, ActionDispatcher::new()).unwrap();
//! assert!(runtime.flow_configs().contains_key("main"));
//! ```

pub use parley_core;
pub use parley_dsl;
pub use parley_runtime;

pub use parley_core::{Event, State};
pub use parley_runtime::{Runtime, RuntimeConfig};
