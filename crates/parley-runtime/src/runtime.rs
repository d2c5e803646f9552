//! The event-processing driver.
//!
//! [`Runtime::process_events`] runs one processing cycle: it feeds the
//! caller's events and everything they cause through the stepper, executes
//! the actions the flows start and returns the external events together with
//! the new state.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parley_core::ids::new_readable_uid;
use parley_core::{
    arguments, internal_events, parse_action_event, run_to_completion, Action, ActionEventKind,
    CoreError, Event, FlowConfig, FlowSourceParser, FlowStatus, State, CHECK_LOCAL_ASYNC,
    LOCAL_ASYNC_COUNTER, MAIN_FLOW_ID,
};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::actions::{
    ActionCapability, ActionDispatcher, ActionEventHandler, ActionInvocation, ActionMeta,
    ExecutionStatus, RemoteActionClient,
};
use crate::config::RuntimeConfig;
use crate::error::{ActionError, RuntimeResult};
use crate::local::{
    action_failed_event, action_finished_event, wait_first_completed, LocalActionData,
    LocalActionGroup, ACTION_EXCEPTION_REASON,
};
use crate::system_actions::SystemAction;
use crate::watcher::EventWatcher;

/// Runs processing cycles for conversations over one set of flows.
///
/// Everything a cycle consults (flows, actions, watchers) is fixed at
/// construction. The conversation state itself is owned by the caller and
/// handed in and out of every [`process_events`](Runtime::process_events)
/// call. Background actions are tracked per main flow instance between
/// cycles.
pub struct Runtime {
    config: Arc<RuntimeConfig>,
    flow_configs: IndexMap<String, Arc<FlowConfig>>,
    dispatcher: Arc<ActionDispatcher>,
    remote: Option<RemoteActionClient>,
    parser: Option<Arc<dyn FlowSourceParser>>,
    watchers: Vec<Arc<dyn EventWatcher>>,
    action_params: Map<String, Value>,
    local_actions: DashMap<String, LocalActionGroup>,
}

impl Runtime {
    /// Create a runtime.
    ///
    /// Fails when the configuration is invalid or no `main` flow exists.
    pub fn new(
        config: RuntimeConfig,
        flow_configs: IndexMap<String, Arc<FlowConfig>>,
        dispatcher: ActionDispatcher,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        if !flow_configs.contains_key(MAIN_FLOW_ID) {
            return Err(CoreError::FlowDefinitionNotFound(MAIN_FLOW_ID.to_string()).into());
        }

        let remote = match &config.actions_server_url {
            Some(url) => {
                info!(url = %url, "Using remote actions server");
                Some(RemoteActionClient::new(url, config.remote_timeout())?)
            }
            None => None,
        };

        info!(
            flows = flow_configs.len(),
            actions = dispatcher.registered_actions().count(),
            "Runtime created"
        );
        Ok(Self {
            config: Arc::new(config),
            flow_configs,
            dispatcher: Arc::new(dispatcher),
            remote,
            parser: None,
            watchers: Vec::new(),
            action_params: Map::new(),
            local_actions: DashMap::new(),
        })
    }

    /// Parser used by `AddFlowsAction`
    pub fn with_parser(mut self, parser: Arc<dyn FlowSourceParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Add a watcher notified of every processed event
    pub fn with_watcher(mut self, watcher: Arc<dyn EventWatcher>) -> Self {
        self.watchers.push(watcher);
        self
    }

    /// Register a named value handed to every action invocation
    pub fn with_action_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.action_params.insert(name.into(), value.into());
        self
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Flow configs new conversations start from
    pub fn flow_configs(&self) -> &IndexMap<String, Arc<FlowConfig>> {
        &self.flow_configs
    }

    /// Registered actions
    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Fresh state for a new conversation
    pub fn new_state(&self) -> RuntimeResult<State> {
        Ok(State::new(self.flow_configs.clone())?)
    }

    /// Background actions tracked for a main flow instance
    pub fn pending_async_actions(&self, main_flow_uid: &str) -> usize {
        self.local_actions
            .get(main_flow_uid)
            .map_or(0, |group| group.len())
    }

    /// Process a batch of events.
    ///
    /// Without a `state` a new conversation is started. With `blocking` set
    /// every action started in this cycle is waited for before returning.
    /// Actions named in `instant_actions` are not executed; they finish as
    /// soon as they start.
    ///
    /// Returns the external events produced by the cycle, without the
    /// lifecycle events of actions the runtime executes itself.
    pub async fn process_events(
        &self,
        events: Vec<Event>,
        state: Option<State>,
        blocking: bool,
        instant_actions: &[String],
    ) -> RuntimeResult<(Vec<Event>, State)> {
        let mut state = match state {
            Some(state) => state,
            None => self.new_state()?,
        };
        let main_flow_uid = state.main_flow_uid.clone();

        let group = self
            .local_actions
            .remove(&main_flow_uid)
            .map(|(_, group)| group)
            .unwrap_or_else(|| LocalActionGroup::new(self.config.action_queue_capacity));
        let mut cycle = Cycle {
            runtime: self,
            queue: VecDeque::new(),
            output: Vec::new(),
            running: Vec::new(),
            group,
            blocking,
            instant_actions,
            check_local_async: false,
        };

        if state.main_flow_state()?.status == FlowStatus::Waiting {
            info!(main_flow_uid = %main_flow_uid, "Start of story!");
            cycle.queue.extend(self.bootstrap_events(&state));
        }

        cycle.harvest().await;
        cycle.push_events(events, false);

        let mut events_counter = 0usize;
        while !cycle.queue.is_empty() || !cycle.running.is_empty() {
            while let Some(event) = cycle.queue.pop_front() {
                events_counter += 1;
                if events_counter > self.config.max_events {
                    error!(
                        max_events = self.config.max_events,
                        main_flow_uid = %main_flow_uid,
                        "Maximum number of events reached!"
                    );
                    cycle.detach_running();
                    return Ok(self.finish(cycle, state));
                }

                if event.name == CHECK_LOCAL_ASYNC {
                    cycle.check_local_async = true;
                    continue;
                }
                for watcher in &self.watchers {
                    watcher.on_event(&event);
                }
                state.record_event(event.clone());

                if !event.is_internal() {
                    match parse_action_event(&event.name) {
                        Some((ActionEventKind::Start, action_name)) => {
                            cycle.start_action(&mut state, &event, &action_name)
                        }
                        Some((ActionEventKind::Stop, action_name)) => {
                            cycle.stop_action(&event, &action_name)
                        }
                        _ => {}
                    }
                }

                self.step(&mut state, event).await;

                cycle.harvest().await;
                let outgoing = state.take_outgoing_events();
                cycle.push_events(outgoing, true);
            }

            if !cycle.running.is_empty() {
                debug!(count = cycle.running.len(), "Waiting for local actions to finish");
                let source_uid = self.config.event_source_uid.as_str();
                tokio::select! {
                    biased;
                    Some(event) = cycle.group.next_action_event() => {
                        cycle.push_events(vec![event], true);
                    }
                    finished = wait_first_completed(&mut cycle.running, source_uid) => {
                        cycle.push_events(finished, false);
                    }
                }
            }
        }

        if cycle.check_local_async {
            let mut counter = Map::new();
            counter.insert("counter".into(), json!(cycle.group.len()));
            let event = Event::new(LOCAL_ASYNC_COUNTER, counter)
                .with_source(self.config.event_source_uid.clone());
            cycle.output.push(event);
        }

        Ok(self.finish(cycle, state))
    }

    /// Wire-form variant of [`process_events`](Runtime::process_events)
    pub async fn process_wire_events(
        &self,
        events: Vec<Value>,
        state: Option<State>,
        blocking: bool,
        instant_actions: &[String],
    ) -> RuntimeResult<(Vec<Value>, State)> {
        let events = events
            .into_iter()
            .map(Event::from_wire)
            .collect::<Result<Vec<_>, _>>()?;
        let (output, state) = self
            .process_events(events, state, blocking, instant_actions)
            .await?;
        Ok((output.iter().map(Event::to_wire).collect(), state))
    }

    fn bootstrap_events(&self, state: &State) -> Vec<Event> {
        let mut events = vec![Event::internal(
            internal_events::START_FLOW,
            arguments(json!({
                "flow_id": MAIN_FLOW_ID,
                "flow_instance_uid": state.main_flow_uid,
            })),
        )];
        for config in state
            .flow_configs
            .values()
            .filter(|config| config.id != MAIN_FLOW_ID && config.is_active())
        {
            debug!(flow_id = %config.id, "Activating flow");
            events.push(Event::internal(
                internal_events::START_FLOW,
                arguments(json!({
                    "flow_id": config.id,
                    "flow_instance_uid": new_readable_uid(&config.id),
                    "source_flow_instance_uid": state.main_flow_uid,
                    "activated": true,
                })),
            ));
        }
        events
    }

    /// Step on `event`, feeding faults back as `FlowRuntimeError` events
    async fn step(&self, state: &mut State, event: Event) {
        let mut next = Some(event);
        let mut faults = 0usize;
        while let Some(event) = next.take() {
            if let Err(fault) = run_to_completion(state, event) {
                faults += 1;
                warn!(
                    kind = fault.kind.as_str(),
                    flow_id = ?fault.flow_id,
                    flow_instance_uid = ?fault.flow_instance_uid,
                    error = %fault.message,
                    "Flow runtime error"
                );
                if faults > self.config.max_fault_retries {
                    error!(faults, "Too many consecutive flow runtime errors, giving up on event");
                } else {
                    next = Some(fault.to_event());
                }
            }
            self.yield_to_actions().await;
        }
    }

    async fn yield_to_actions(&self) {
        if self.config.async_yield_ms == 0 {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.async_yield()).await;
        }
    }

    fn finish(&self, cycle: Cycle<'_>, mut state: State) -> (Vec<Event>, State) {
        let Cycle {
            output, mut group, ..
        } = cycle;

        state.truncate_history(self.config.history_limit);
        state.prune_terminated(self.config.history_limit);

        let main_done = state
            .main_flow_state()
            .map_or(true, |main| main.status.is_terminal());
        if main_done {
            info!(main_flow_uid = %state.main_flow_uid, "End of story!");
            group.abort_all();
        } else {
            self.local_actions.insert(state.main_flow_uid.clone(), group);
        }

        let output = output
            .into_iter()
            .filter(|event| !self.is_engine_owned(event))
            .collect();
        (output, state)
    }

    /// Lifecycle events of actions the runtime executes itself
    fn is_engine_owned(&self, event: &Event) -> bool {
        if event.action_uid().is_none() {
            return false;
        }
        match parse_action_event(&event.name) {
            Some((ActionEventKind::Updated, _)) | None => false,
            Some((_, action_name)) => {
                self.dispatcher.has_registered(&action_name)
                    || SystemAction::from_name(&action_name).is_some()
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("flows", &self.flow_configs.keys().collect::<Vec<_>>())
            .field("dispatcher", &self.dispatcher)
            .field("remote", &self.remote)
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

/// Working set of one `process_events` call
struct Cycle<'a> {
    runtime: &'a Runtime,
    queue: VecDeque<Event>,
    output: Vec<Event>,
    running: Vec<LocalActionData>,
    group: LocalActionGroup,
    blocking: bool,
    instant_actions: &'a [String],
    check_local_async: bool,
}

impl<'a> Cycle<'a> {
    fn source_uid(&self) -> &'a str {
        self.runtime.config.event_source_uid.as_str()
    }

    /// Queue events, routing external ones to the running actions
    fn push_events(&mut self, events: Vec<Event>, to_output: bool) {
        for event in events {
            if !event.is_internal() && event.name != CHECK_LOCAL_ASYNC {
                for data in self.group.action_data.values().chain(self.running.iter()) {
                    data.forward(&event);
                }
            }
            if to_output {
                self.output.push(event.clone());
            }
            self.queue.push_back(event);
        }
    }

    /// Collect what the background actions produced so far
    async fn harvest(&mut self) {
        let action_events = self.group.drain_action_events();
        self.push_events(action_events, true);

        let (finished, _) = self.group.harvest_finished(self.source_uid()).await;
        self.push_events(finished, true);
    }

    /// Hand synchronous actions over to the group so a later cycle reports them
    fn detach_running(&mut self) {
        for data in self.running.drain(..) {
            self.group.insert(data);
        }
    }

    fn start_action(&mut self, state: &mut State, event: &Event, action_name: &str) {
        let Some(mut action) = Action::from_start_event(event) else {
            return;
        };
        if let Some(known) = state.actions.get(&action.uid) {
            action.flow_uid = known.flow_uid.clone();
        }
        let source_uid = self.source_uid();

        if self.instant_actions.iter().any(|name| name == action_name) {
            debug!(action_uid = %action.uid, action_name = %action_name, "Finishing instant action");
            let mut arguments = Map::new();
            if let Some(script) = event.arguments.get("script") {
                arguments.insert("final_script".into(), script.clone());
            }
            let finished = action_finished_event(&action, arguments, source_uid);
            self.push_events(vec![finished], true);
            return;
        }

        if let Some(system_action) = SystemAction::from_name(action_name) {
            let arguments = resolve_parameters(&action.start_event_arguments, &state.context);
            let finished = match system_action.run(state, self.runtime.parser.as_deref(), &arguments) {
                Ok(return_value) => {
                    let mut arguments = Map::new();
                    arguments.insert("return_value".into(), return_value);
                    action_finished_event(&action, arguments, source_uid)
                }
                Err(err) => {
                    warn!(action_uid = %action.uid, action_name = %action_name, error = %err, "System action failed");
                    action_failed_event(&action, ACTION_EXCEPTION_REASON, false, source_uid)
                }
            };
            self.push_events(vec![finished], true);
            return;
        }

        let Some(meta) = self.runtime.dispatcher.meta(action_name).cloned() else {
            debug!(action_name = %action_name, "No local handler, leaving action to the caller");
            return;
        };

        let data = self.spawn_action(state, action.clone(), &meta);
        let started = action.started_event(Map::new()).with_source(source_uid);
        self.push_events(vec![started], true);

        let in_background =
            meta.execute_async && !self.runtime.config.disable_async_execution && !self.blocking;
        if in_background {
            info!(action_uid = %action.uid, action_name = %action_name, "Running action in background");
            self.group.insert(data);
        } else {
            self.running.push(data);
        }
    }

    fn spawn_action(&self, state: &State, action: Action, meta: &ActionMeta) -> LocalActionData {
        let runtime = self.runtime;
        let arguments = resolve_parameters(&action.start_event_arguments, &state.context);
        let mut invocation = ActionInvocation::new(action.name.clone(), arguments);
        invocation.params = runtime.action_params.clone();

        let mut input_tx = None;
        if meta.needs(ActionCapability::Events) {
            invocation.events = Some(state.last_events.clone());
        }
        if meta.needs(ActionCapability::EventHandler) {
            let (tx, rx) = mpsc::channel(runtime.config.action_queue_capacity);
            invocation.event_handler = Some(ActionEventHandler::new(
                action.clone(),
                self.source_uid(),
                rx,
                self.group.output_sender(),
            ));
            input_tx = Some(tx);
        }
        if meta.needs(ActionCapability::Action) {
            invocation.action = Some(action.clone());
        }
        if meta.needs(ActionCapability::Context) {
            invocation.context = Some(state.context.clone());
        }
        if meta.needs(ActionCapability::Config) {
            invocation.config = Some(runtime.config.clone());
        }

        let dispatcher = runtime.dispatcher.clone();
        let remote = runtime.remote.clone().filter(|_| !meta.is_system_action);
        let name = action.name.clone();
        let task = tokio::spawn(async move {
            let (result, status) = match remote {
                Some(remote) => remote.run_action(&name, &invocation.arguments).await?,
                None => dispatcher.execute_action(&name, invocation).await,
            };
            match status {
                ExecutionStatus::Success => Ok(result),
                ExecutionStatus::Failed => Err(ActionError::failed(&name, "execution failed")),
            }
        });

        LocalActionData {
            action,
            task,
            input_tx,
        }
    }

    fn stop_action(&mut self, event: &Event, action_name: &str) {
        let Some(action_uid) = event.action_uid() else {
            return;
        };
        let in_group = self
            .group
            .action_data
            .get(action_uid)
            .map_or(false, |data| data.cancel_if(action_uid, action_name));
        let cancelled = in_group
            || self
                .running
                .iter()
                .any(|data| data.cancel_if(action_uid, action_name));
        if !cancelled {
            debug!(action_uid = %action_uid, action_name = %action_name, "No local action to stop");
        }
    }
}

/// Replace `$name` string arguments by the context value of that name
fn resolve_parameters(arguments: &Map<String, Value>, context: &Map<String, Value>) -> Map<String, Value> {
    arguments
        .iter()
        .map(|(key, value)| {
            let resolved = match value {
                Value::String(text) => text
                    .strip_prefix('$')
                    .and_then(|name| context.get(name))
                    .cloned()
                    .unwrap_or_else(|| value.clone()),
                _ => value.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}
