//! State cells with change/update/command event classes

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use smarthome_core::{ConversionError, Converter, Value};
use smarthome_signal::{SharedSignal, Signal};
use tracing::{debug, warn};

use crate::{CondExpr, ValueExpr};

/// Thread-safe shared handle to a state
pub type SharedState = Arc<State>;

/// The three observable event classes of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// The value actually changed
    Change,
    /// An update arrived from a binding (changed or not)
    Update,
    /// A command arrived for this state (changed or not)
    Command,
}

/// Inbound value for `change`/`command`/`update`
///
/// Raw transport strings are run through the state's converter; native
/// values are used as-is.
#[derive(Debug, Clone)]
pub enum StateInput {
    Raw(String),
    Native(Value),
}

impl From<&str> for StateInput {
    fn from(raw: &str) -> Self {
        StateInput::Raw(raw.to_string())
    }
}

impl From<String> for StateInput {
    fn from(raw: String) -> Self {
        StateInput::Raw(raw)
    }
}

impl From<Value> for StateInput {
    fn from(value: Value) -> Self {
        StateInput::Native(value)
    }
}

impl From<bool> for StateInput {
    fn from(value: bool) -> Self {
        StateInput::Native(Value::Bool(value))
    }
}

impl From<i64> for StateInput {
    fn from(value: i64) -> Self {
        StateInput::Native(Value::Int(value))
    }
}

impl From<i32> for StateInput {
    fn from(value: i32) -> Self {
        StateInput::Native(Value::Int(value as i64))
    }
}

impl From<f64> for StateInput {
    fn from(value: f64) -> Self {
        StateInput::Native(Value::Float(value))
    }
}

/// Owner wiring installed when the state is registered on a thing
#[derive(Debug)]
struct Owner {
    thing_id: String,
    thing_changed: SharedSignal,
}

/// A named, typed, observable mutable cell
///
/// The value changes only through [`State::change`]; producers on
/// different tasks serialize on the state's own lock, and signals fire
/// while that lock is held, so per-state notifications observe the
/// submission order of changes.
#[derive(Debug)]
pub struct State {
    name: String,
    converter: Converter,
    value: Mutex<Value>,
    changed: SharedSignal,
    received_update: SharedSignal,
    received_command: SharedSignal,
    owner: OnceLock<Owner>,
}

impl State {
    /// Create a new unowned state
    pub fn new(name: impl Into<String>, converter: Converter, initial: impl Into<Value>) -> SharedState {
        Arc::new(Self {
            name: name.into(),
            converter,
            value: Mutex::new(initial.into()),
            changed: Arc::new(Signal::new()),
            received_update: Arc::new(Signal::new()),
            received_command: Arc::new(Signal::new()),
            owner: OnceLock::new(),
        })
    }

    /// Install the owning thing's id and thing-level change signal
    ///
    /// Called once when the thing is constructed; a second call is
    /// ignored with a warning (states are never shared across things).
    pub fn attach_owner(&self, thing_id: impl Into<String>, thing_changed: SharedSignal) {
        let owner = Owner {
            thing_id: thing_id.into(),
            thing_changed,
        };
        if self.owner.set(owner).is_err() {
            warn!(state = %self.path(), "state already attached to a thing, ignoring");
        }
    }

    /// State name (the field name within its thing)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Converter used for raw inbound strings
    pub fn converter(&self) -> Converter {
        self.converter
    }

    /// `thing_id.state_name` path for logs, or just the name while unowned
    pub fn path(&self) -> String {
        match self.owner.get() {
            Some(owner) => format!("{}.{}", owner.thing_id, self.name),
            None => self.name.clone(),
        }
    }

    /// Snapshot of the current value
    pub fn value(&self) -> Value {
        self.value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Signal notified when the value actually changes
    pub fn changed(&self) -> &SharedSignal {
        &self.changed
    }

    /// Signal notified on every inbound update
    pub fn received_update(&self) -> &SharedSignal {
        &self.received_update
    }

    /// Signal notified on every inbound command
    pub fn received_command(&self) -> &SharedSignal {
        &self.received_command
    }

    /// Signal for one of the three event classes
    pub fn signal(&self, event: StateEvent) -> &SharedSignal {
        match event {
            StateEvent::Change => &self.changed,
            StateEvent::Update => &self.received_update,
            StateEvent::Command => &self.received_command,
        }
    }

    /// Change the value, notifying `changed` if it actually differs
    ///
    /// Raw string inputs go through the converter; a conversion failure
    /// propagates to the caller and nothing is signaled. Setting the
    /// current value again is a no-op returning `Ok(false)` (values are
    /// compared by value, not identity).
    pub fn change(&self, input: impl Into<StateInput>) -> Result<bool, ConversionError> {
        let value = self.convert(input.into())?;
        let mut current = self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current == value {
            return Ok(false);
        }
        debug!(state = %self.path(), from = %*current, to = %value, "state changed");
        *current = value;
        // Notify under the lock so concurrent changes cannot interleave
        // between mutation and signaling.
        self.changed.notify();
        if let Some(owner) = self.owner.get() {
            owner.thing_changed.notify();
        }
        Ok(true)
    }

    /// Handle an inbound command: change, then signal `received_command`
    ///
    /// The command signal fires whether or not the value differed, so "a
    /// command arrived" stays observable for idempotent commands.
    pub fn command(&self, input: impl Into<StateInput>) -> Result<bool, ConversionError> {
        debug!(state = %self.path(), "command received");
        let changed = self.change(input)?;
        self.received_command.notify();
        Ok(changed)
    }

    /// Handle an inbound update: change, then signal `received_update`
    pub fn update(&self, input: impl Into<StateInput>) -> Result<bool, ConversionError> {
        debug!(state = %self.path(), "update received");
        let changed = self.change(input)?;
        self.received_update.notify();
        Ok(changed)
    }

    fn convert(&self, input: StateInput) -> Result<Value, ConversionError> {
        match input {
            StateInput::Raw(raw) => self.converter.convert(&raw),
            StateInput::Native(value) => Ok(value),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.path(), self.value())
    }
}

/// Expression builders on shared state handles
///
/// Gives states the same comparison surface as [`ValueExpr`], so a rule
/// condition reads `door.eq("open") & hour.ge(22)` without first lifting
/// each state into an expression by hand.
pub trait StateOps {
    /// Lift the state into a value expression node
    fn expr(&self) -> ValueExpr;

    fn eq(&self, rhs: impl Into<ValueExpr>) -> CondExpr {
        self.expr().eq(rhs)
    }

    fn ne(&self, rhs: impl Into<ValueExpr>) -> CondExpr {
        self.expr().ne(rhs)
    }

    fn le(&self, rhs: impl Into<ValueExpr>) -> CondExpr {
        self.expr().le(rhs)
    }

    fn lt(&self, rhs: impl Into<ValueExpr>) -> CondExpr {
        self.expr().lt(rhs)
    }

    fn ge(&self, rhs: impl Into<ValueExpr>) -> CondExpr {
        self.expr().ge(rhs)
    }

    fn gt(&self, rhs: impl Into<ValueExpr>) -> CondExpr {
        self.expr().gt(rhs)
    }
}

impl StateOps for SharedState {
    fn expr(&self) -> ValueExpr {
        ValueExpr::from(self.clone())
    }
}
