use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{info, warn};

use super::{
    ActionHandler, ActionInvocation, ActionMeta, ActionResult, ExecutionStatus, FnAction,
};
use crate::error::ActionError;

struct RegisteredAction {
    meta: ActionMeta,
    handler: Arc<dyn ActionHandler>,
}

/// Registry of the locally invocable actions.
///
/// Built once and handed to the runtime.
#[derive(Default)]
pub struct ActionDispatcher {
    actions: IndexMap<String, RegisteredAction>,
}

impl ActionDispatcher {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn register(mut self, meta: ActionMeta, handler: Arc<dyn ActionHandler>) -> Self {
        if self.actions.contains_key(&meta.name) {
            warn!(action_name = %meta.name, "Replacing registered action");
        }
        self.actions
            .insert(meta.name.clone(), RegisteredAction { meta, handler });
        self
    }

    /// Register an async closure
    pub fn register_fn<F, Fut>(self, meta: ActionMeta, f: F) -> Self
    where
        F: Fn(ActionInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult, ActionError>> + Send + 'static,
    {
        self.register(meta, Arc::new(FnAction(f)))
    }

    /// Whether an action is registered
    pub fn has_registered(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Metadata of a registered action
    pub fn meta(&self, name: &str) -> Option<&ActionMeta> {
        self.actions.get(name).map(|action| &action.meta)
    }

    /// Handler of a registered action
    pub fn handler(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions.get(name).map(|action| action.handler.clone())
    }

    /// Registered names, in registration order
    pub fn registered_actions(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Run an action.
    ///
    /// Handler errors are logged and reported as [`ExecutionStatus::Failed`].
    pub async fn execute_action(
        &self,
        name: &str,
        invocation: ActionInvocation,
    ) -> (ActionResult, ExecutionStatus) {
        let Some(handler) = self.handler(name) else {
            warn!(action_name = %name, "{}", ActionError::NotFound(name.to_string()));
            return (ActionResult::default(), ExecutionStatus::Failed);
        };

        info!(action_name = %name, "Running action");
        match handler.execute(invocation).await {
            Ok(result) => (result, ExecutionStatus::Success),
            Err(err) => {
                warn!(action_name = %name, error = %err, "Action failed");
                (ActionResult::default(), ExecutionStatus::Failed)
            }
        }
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new()
            .register_fn(ActionMeta::new("EchoAction"), |invocation| async move {
                invocation
                    .require_str("text")
                    .map(|text| ActionResult::value(text.to_string()))
            })
            .register_fn(ActionMeta::new("BrokenAction").system(), |_| async move {
                Err::<ActionResult, _>(ActionError::failed("BrokenAction", "boom"))
            })
    }

    #[tokio::test]
    async fn test_execute_registered_action() {
        let dispatcher = dispatcher();
        let invocation = ActionInvocation::new(
            "EchoAction",
            parley_core::arguments(json!({"text": "hello"})),
        );

        let (result, status) = dispatcher.execute_action("EchoAction", invocation).await;
        assert_eq!(status, ExecutionStatus::Success);
        assert_eq!(result.return_value, json!("hello"));
    }

    #[tokio::test]
    async fn test_failures_become_failed_status() {
        let dispatcher = dispatcher();

        let (_, status) = dispatcher
            .execute_action("BrokenAction", ActionInvocation::new("BrokenAction", Map::new()))
            .await;
        assert_eq!(status, ExecutionStatus::Failed);

        let (_, status) = dispatcher
            .execute_action("MissingAction", ActionInvocation::new("MissingAction", Map::new()))
            .await;
        assert_eq!(status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_registry_lookup() {
        let dispatcher = dispatcher();
        assert!(dispatcher.has_registered("EchoAction"));
        assert!(dispatcher.meta("BrokenAction").unwrap().is_system_action);
        assert_eq!(
            dispatcher.registered_actions().collect::<Vec<_>>(),
            vec!["EchoAction", "BrokenAction"]
        );
    }
}
