//! Binding boundary: protocol adapters and subscription routing
//!
//! A [`Binding`] is an adapter between the runtime and an external
//! transport (MQTT broker, device bus, ...). Outbound, the runtime pushes
//! state snapshots through [`Binding::push`]; inbound, the adapter routes
//! raw messages through its [`SubscriptionTable`], which converts them and
//! feeds `state.command`/`state.update`. Bindings never mutate a state's
//! value directly.
//!
//! Concrete protocol adapters live outside this workspace; the in-memory
//! [`ChannelBinding`] exists for tests and demos.

mod channel;

pub use channel::{ChannelBinding, PushRecord};

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use smarthome_core::{ConversionError, Value};
use smarthome_state::SharedState;
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for binding operations
pub type BindingResult<T> = Result<T, BindingError>;

/// Errors raised at the binding boundary
#[derive(Debug, Error)]
pub enum BindingError {
    /// Accessed app details before the binding was attached to an app -
    /// a wiring bug, fatal to the calling path
    #[error("binding '{0}' is not attached to an app")]
    Unbound(String),

    /// Inbound payload could not be converted to the state's kind
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The underlying transport failed
    #[error("transport error: {0}")]
    Transport(String),
}

/// App-level details handed to a binding when the app starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
}

/// Which state entry point an inbound message targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Passive data from the transport: `state.update`
    Update,
    /// An actuation request: `state.command`
    Command,
}

/// Inbound routing table keyed by `(thing_id, state_name)`
///
/// Each binding owns one; things register their states here via
/// `bind_to`. A message for an unknown key is logged and dropped, never
/// an error - transports deliver stray traffic.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: DashMap<(String, String), SharedState>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state for inbound routing
    pub fn insert(
        &self,
        thing_id: impl Into<String>,
        state_name: impl Into<String>,
        state: SharedState,
    ) {
        self.entries
            .insert((thing_id.into(), state_name.into()), state);
    }

    /// Route an inbound raw payload into the subscribed state
    ///
    /// Returns `Ok(true)` when the message was delivered, `Ok(false)`
    /// when no subscription matched (the message is dropped with a
    /// warning). Conversion failures propagate to the caller.
    pub fn dispatch(
        &self,
        thing_id: &str,
        state_name: &str,
        raw: &str,
        kind: Inbound,
    ) -> BindingResult<bool> {
        let key = (thing_id.to_string(), state_name.to_string());
        let Some(state) = self.entries.get(&key).map(|entry| entry.value().clone()) else {
            warn!(thing_id, state_name, "no subscription for inbound message, dropping");
            return Ok(false);
        };

        debug!(thing_id, state_name, raw, ?kind, "dispatching inbound message");
        match kind {
            Inbound::Update => state.update(raw)?,
            Inbound::Command => state.command(raw)?,
        };
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A protocol adapter wired between the runtime and an external transport
#[async_trait]
pub trait Binding: Send + Sync {
    /// Binding name for logs and routing
    fn name(&self) -> &str;

    /// The binding's inbound routing table
    fn subscriptions(&self) -> &SubscriptionTable;

    /// Called once when the owning app starts
    fn attach(&self, app: AppInfo) {
        let _ = app;
    }

    /// Push a state snapshot out through the transport
    ///
    /// Failures are reported to the caller, which logs them; a push
    /// failure is never fatal to the rule loop that issued it.
    async fn push(&self, state: SharedState) -> BindingResult<()>;

    /// Initial data for a thing, polled once at thing startup
    async fn thing_request(&self, thing_id: &str) -> BindingResult<Option<HashMap<String, Value>>> {
        let _ = thing_id;
        Ok(None)
    }

    /// Open the transport
    async fn start(&self) -> BindingResult<()> {
        Ok(())
    }

    /// Close the transport
    async fn stop(&self) -> BindingResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smarthome_core::Converter;
    use smarthome_state::State;

    #[tokio::test]
    async fn test_dispatch_routes_command_and_update() {
        let table = SubscriptionTable::new();
        let st = State::new("is_on", Converter::Bool, false);
        table.insert("switch.lamp", "is_on", st.clone());

        let mut commands = st.received_command().subscribe();
        let mut updates = st.received_update().subscribe();

        assert!(table.dispatch("switch.lamp", "is_on", "on", Inbound::Command).unwrap());
        assert_eq!(st.value(), Value::Bool(true));
        assert!(commands.try_wait());
        assert!(!updates.try_wait());

        assert!(table.dispatch("switch.lamp", "is_on", "off", Inbound::Update).unwrap());
        assert_eq!(st.value(), Value::Bool(false));
        assert!(updates.try_wait());
    }

    #[tokio::test]
    async fn test_dispatch_drops_unknown_subscription() {
        let table = SubscriptionTable::new();
        assert!(!table
            .dispatch("switch.ghost", "is_on", "on", Inbound::Command)
            .unwrap());
    }

    #[tokio::test]
    async fn test_dispatch_propagates_conversion_errors() {
        let table = SubscriptionTable::new();
        let st = State::new("level", Converter::Int, 0);
        table.insert("dimmer.hall", "level", st.clone());

        let err = table
            .dispatch("dimmer.hall", "level", "bright", Inbound::Command)
            .unwrap_err();
        assert!(matches!(err, BindingError::Conversion(_)));
        assert_eq!(st.value(), Value::Int(0));
    }
}
