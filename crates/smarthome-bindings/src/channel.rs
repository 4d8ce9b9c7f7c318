//! In-memory channel binding for tests and demos

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use smarthome_core::Value;
use smarthome_state::SharedState;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{AppInfo, Binding, BindingError, BindingResult, Inbound, SubscriptionTable};

/// A state snapshot observed on the outbound side of a [`ChannelBinding`]
#[derive(Debug, Clone, PartialEq)]
pub struct PushRecord {
    /// `thing_id.state_name` path of the pushed state
    pub path: String,
    /// Value at push time
    pub value: Value,
}

/// Loopback binding over in-process channels
///
/// Outbound pushes surface on the receiver returned by
/// [`ChannelBinding::new`]; inbound traffic enters through
/// [`ChannelBinding::inject`]. Seeded data answers `thing_request` polls,
/// which is how tests exercise the startup path.
#[derive(Debug)]
pub struct ChannelBinding {
    name: String,
    subscriptions: SubscriptionTable,
    app: OnceLock<AppInfo>,
    outbound: mpsc::UnboundedSender<PushRecord>,
    seeds: DashMap<String, HashMap<String, Value>>,
}

impl ChannelBinding {
    /// Create the binding and the receiving end of its outbound channel
    pub fn new(name: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<PushRecord>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let binding = Arc::new(Self {
            name: name.into(),
            subscriptions: SubscriptionTable::new(),
            app: OnceLock::new(),
            outbound,
            seeds: DashMap::new(),
        });
        (binding, rx)
    }

    /// App details, available once the owning app has started
    pub fn app(&self) -> BindingResult<&AppInfo> {
        self.app
            .get()
            .ok_or_else(|| BindingError::Unbound(self.name.clone()))
    }

    /// Preload the answer to a thing's startup `thing_request` poll
    pub fn seed(&self, thing_id: impl Into<String>, data: HashMap<String, Value>) {
        self.seeds.insert(thing_id.into(), data);
    }

    /// Deliver an inbound raw payload as if it arrived on the transport
    pub fn inject(
        &self,
        thing_id: &str,
        state_name: &str,
        raw: &str,
        kind: Inbound,
    ) -> BindingResult<bool> {
        self.subscriptions.dispatch(thing_id, state_name, raw, kind)
    }
}

#[async_trait]
impl Binding for ChannelBinding {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    fn attach(&self, app: AppInfo) {
        let _ = self.app.set(app);
    }

    async fn push(&self, state: SharedState) -> BindingResult<()> {
        let record = PushRecord {
            path: state.path(),
            value: state.value(),
        };
        debug!(binding = %self.name, path = %record.path, value = %record.value, "pushing state");
        self.outbound
            .send(record)
            .map_err(|_| BindingError::Transport("outbound channel closed".into()))
    }

    async fn thing_request(&self, thing_id: &str) -> BindingResult<Option<HashMap<String, Value>>> {
        Ok(self.seeds.get(thing_id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smarthome_core::Converter;
    use smarthome_state::State;

    #[tokio::test]
    async fn test_push_surfaces_on_outbound_channel() {
        let (binding, mut rx) = ChannelBinding::new("loopback");
        let st = State::new("is_on", Converter::Bool, true);

        binding.push(st).await.unwrap();
        let record = rx.recv().await.unwrap();
        assert_eq!(record.path, "is_on");
        assert_eq!(record.value, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_app_access_before_attach_is_an_error() {
        let (binding, _rx) = ChannelBinding::new("loopback");
        assert!(matches!(binding.app(), Err(BindingError::Unbound(_))));

        binding.attach(AppInfo {
            name: "test-app".into(),
        });
        assert_eq!(binding.app().unwrap().name, "test-app");
    }

    #[tokio::test]
    async fn test_seeded_thing_request() {
        let (binding, _rx) = ChannelBinding::new("loopback");
        binding.seed(
            "temp.outdoor",
            HashMap::from([("value".to_string(), Value::Float(17.5))]),
        );

        let data = binding.thing_request("temp.outdoor").await.unwrap().unwrap();
        assert_eq!(data["value"], Value::Float(17.5));
        assert!(binding.thing_request("temp.indoor").await.unwrap().is_none());
    }
}
