//! Thing construction and binding glue

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use smarthome_bindings::Binding;
use smarthome_core::{Converter, Value};
use smarthome_rules::{Rule, RuleSet};
use smarthome_signal::{SharedSignal, Signal};
use smarthome_state::{SharedState, State, StateEvent};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Thread-safe shared handle to a thing
pub type SharedThing = Arc<Thing>;

/// Errors raised when wiring a thing
#[derive(Debug, Error)]
pub enum ThingError {
    /// A bind request named a state the thing does not declare
    #[error("thing '{thing}' has no state '{state}'")]
    UnknownState { thing: String, state: String },
}

/// How a thing is wired to a binding
#[derive(Debug, Clone)]
pub struct BindOptions {
    /// Create push rules: state event -> `binding.push`
    pub push: bool,
    /// Register the binding's inbound subscriptions for these states
    pub subscribe: bool,
    /// Which state event class triggers a push
    pub event: StateEvent,
    /// Selected state names; empty means all declared states
    pub states: Vec<String>,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            push: true,
            subscribe: true,
            event: StateEvent::Change,
            states: Vec::new(),
        }
    }
}

impl BindOptions {
    /// Outbound only: push, no inbound subscription
    pub fn push_only() -> Self {
        Self {
            subscribe: false,
            ..Self::default()
        }
    }

    /// Inbound only: subscribe, no push rules
    pub fn subscribe_only() -> Self {
        Self {
            push: false,
            ..Self::default()
        }
    }

    /// Push on a different state event class
    pub fn on_event(mut self, event: StateEvent) -> Self {
        self.event = event;
        self
    }

    /// Restrict to the given state names
    pub fn for_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.states = states.into_iter().map(Into::into).collect();
        self
    }
}

/// A device owning a fixed collection of observable states
///
/// Identity is the `unique_id` (`root.name`); two things are equal when
/// their ids are equal. The states map is built once at construction.
pub struct Thing {
    root: String,
    name: String,
    unique_id: String,
    states: IndexMap<String, SharedState>,
    changed: SharedSignal,
    rules: RuleSet,
    bound: Mutex<Vec<Arc<dyn Binding>>>,
}

impl Thing {
    /// Start building a thing with the given root and name
    pub fn builder(root: impl Into<String>, name: impl Into<String>) -> ThingBuilder {
        ThingBuilder::new(root, name)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `root.name`, unique within an app
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Look up a declared state
    pub fn state(&self, name: &str) -> Option<&SharedState> {
        self.states.get(name)
    }

    /// All declared states in declaration order
    pub fn states(&self) -> impl Iterator<Item = (&str, &SharedState)> {
        self.states.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Signal notified whenever any of this thing's states changes
    pub fn changed(&self) -> &SharedSignal {
        &self.changed
    }

    /// Rules owned by this thing (push rules and any user additions)
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Snapshot of current values as `{state_name: value}`
    pub fn as_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .states
            .iter()
            .map(|(name, state)| {
                let value = serde_json::to_value(state.value()).unwrap_or(serde_json::Value::Null);
                (name.clone(), value)
            })
            .collect();
        serde_json::Value::Object(map)
    }

    /// Wire this thing to a binding
    ///
    /// For every selected state: with `push`, registers a rule that
    /// pushes the state on the chosen event class (push failures are
    /// logged by the rule loop, never fatal); with `subscribe`, registers
    /// the `(unique_id, state_name)` inbound subscription. The binding is
    /// also remembered for the startup `thing_request` poll. Rules are
    /// started by [`Thing::start`], not here.
    pub fn bind_to(&self, binding: &Arc<dyn Binding>, options: BindOptions) -> Result<(), ThingError> {
        let selected = self.select_states(&options.states)?;

        for (name, state) in selected {
            if options.push {
                let push_binding = binding.clone();
                let push_state = state.clone();
                let rule = Rule::on_signal(
                    format!("push {} to {}", state.path(), binding.name()),
                    state.signal(options.event).clone(),
                    move || {
                        let binding = push_binding.clone();
                        let state = push_state.clone();
                        async move {
                            binding.push(state).await?;
                            Ok(())
                        }
                    },
                );
                self.rules.add(rule);
            }
            if options.subscribe {
                binding
                    .subscriptions()
                    .insert(self.unique_id.clone(), name.clone(), state.clone());
            }
        }

        self.bound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(binding.clone());
        debug!(thing = %self.unique_id, binding = %binding.name(), "thing bound");
        Ok(())
    }

    /// Start the thing: seed initial data, then start its rules
    ///
    /// Each bound binding is polled once via `thing_request`; unknown
    /// keys and conversion failures in the answer are logged, not fatal.
    pub async fn start(&self) {
        let bindings = self
            .bound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for binding in bindings {
            match binding.thing_request(&self.unique_id).await {
                Ok(Some(data)) => self.apply_seed(binding.name(), data),
                Ok(None) => {}
                Err(err) => {
                    warn!(thing = %self.unique_id, binding = %binding.name(), %err,
                        "thing_request failed, starting without seed");
                }
            }
        }

        self.rules.start_all();
        info!(thing = %self.unique_id, "thing started");
    }

    /// Stop the thing's rules
    pub fn stop(&self) {
        self.rules.close_all();
        debug!(thing = %self.unique_id, "thing stopped");
    }

    fn apply_seed(&self, source: &str, data: HashMap<String, Value>) {
        for (name, value) in data {
            let Some(state) = self.states.get(&name) else {
                warn!(thing = %self.unique_id, state = %name, source,
                    "seed data for undeclared state, dropping");
                continue;
            };
            if let Err(err) = state.update(value) {
                warn!(thing = %self.unique_id, state = %name, source, %err,
                    "could not apply seed value");
            }
        }
    }

    fn select_states(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, SharedState)>, ThingError> {
        if names.is_empty() {
            return Ok(self
                .states
                .iter()
                .map(|(n, s)| (n.clone(), s.clone()))
                .collect());
        }
        names
            .iter()
            .map(|name| {
                self.states
                    .get(name)
                    .map(|state| (name.clone(), state.clone()))
                    .ok_or_else(|| ThingError::UnknownState {
                        thing: self.unique_id.clone(),
                        state: name.clone(),
                    })
            })
            .collect()
    }
}

impl PartialEq for Thing {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}

impl Eq for Thing {}

impl fmt::Debug for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thing")
            .field("unique_id", &self.unique_id)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.unique_id, self.as_json())
    }
}

/// Explicit, one-shot construction of a thing's state collection
pub struct ThingBuilder {
    root: String,
    name: String,
    states: IndexMap<String, SharedState>,
}

impl ThingBuilder {
    pub fn new(root: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
            states: IndexMap::new(),
        }
    }

    /// Declare a state field
    pub fn state(
        mut self,
        name: impl Into<String>,
        converter: Converter,
        initial: impl Into<Value>,
    ) -> Self {
        let name = name.into();
        let state = State::new(name.clone(), converter, initial);
        if self.states.insert(name.clone(), state).is_some() {
            warn!(state = %name, "state declared twice, keeping the last declaration");
        }
        self
    }

    pub fn build(self) -> SharedThing {
        let unique_id = format!("{}.{}", self.root, self.name);
        let changed = Arc::new(Signal::new());
        for state in self.states.values() {
            state.attach_owner(unique_id.clone(), changed.clone());
        }
        Arc::new(Thing {
            root: self.root,
            name: self.name,
            unique_id,
            states: self.states,
            changed,
            rules: RuleSet::new(),
            bound: Mutex::new(Vec::new()),
        })
    }
}
