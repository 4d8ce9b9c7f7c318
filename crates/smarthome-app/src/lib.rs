//! Application lifecycle for the smart home runtime
//!
//! An [`App`] owns the things, bindings and top-level rules of one
//! deployment and drives them through a deterministic start/stop order:
//! bindings learn about the app, things seed and arm their push rules,
//! binding transports come up, then user rules start. Stop runs the same
//! steps in reverse.

mod config;

pub use config::{AppConfig, ConfigError, ConfigResult};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use smarthome_bindings::{AppInfo, Binding, BindingError};
use smarthome_rules::{RuleSet, SharedRule};
use smarthome_things::SharedThing;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised by the app lifecycle
#[derive(Debug, Error)]
pub enum AppError {
    /// A binding transport failed to come up or shut down
    #[error("binding '{binding}' failed: {source}")]
    Binding {
        binding: String,
        #[source]
        source: BindingError,
    },
}

/// One deployment of the runtime
///
/// Collect things, bindings and rules while stopped, then `start()`.
/// Registration after start is not supported.
pub struct App {
    name: String,
    things: Mutex<Vec<SharedThing>>,
    bindings: Mutex<Vec<Arc<dyn Binding>>>,
    rules: RuleSet,
    started: AtomicBool,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            things: Mutex::new(Vec::new()),
            bindings: Mutex::new(Vec::new()),
            rules: RuleSet::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Build an app from a loaded configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.name.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Register a thing; call before `start()`
    pub fn add_thing(&self, thing: SharedThing) {
        if self.is_started() {
            warn!(thing = %thing.unique_id(), "thing added after start, it will not be started");
        }
        self.things
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(thing);
    }

    /// Register a binding; call before `start()`
    pub fn add_binding(&self, binding: Arc<dyn Binding>) {
        if self.is_started() {
            warn!(binding = %binding.name(), "binding added after start, it will not be started");
        }
        self.bindings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(binding);
    }

    /// Register a top-level rule; call before `start()`
    pub fn add_rule(&self, rule: SharedRule) {
        self.rules.add(rule);
    }

    /// Find a registered thing by its unique id
    pub fn thing(&self, unique_id: &str) -> Option<SharedThing> {
        self.things
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|t| t.unique_id() == unique_id)
            .cloned()
    }

    /// Bring the deployment up
    ///
    /// Order: attach app info to bindings, start things (seed initial
    /// data and arm push rules), start binding transports, start user
    /// rules. A second call is a warning no-op.
    pub async fn start(&self) -> Result<(), AppError> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(app = %self.name, "app already started");
            return Ok(());
        }
        info!(app = %self.name, "starting app");

        let bindings = self.bindings_snapshot();
        let things = self.things_snapshot();

        for binding in &bindings {
            binding.attach(AppInfo {
                name: self.name.clone(),
            });
        }
        for thing in &things {
            thing.start().await;
        }
        for binding in &bindings {
            binding.start().await.map_err(|source| AppError::Binding {
                binding: binding.name().to_string(),
                source,
            })?;
        }
        self.rules.start_all();

        info!(app = %self.name, things = things.len(), bindings = bindings.len(),
            rules = self.rules.len(), "app started");
        Ok(())
    }

    /// Tear the deployment down, reverse of `start()`
    pub async fn stop(&self) -> Result<(), AppError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            warn!(app = %self.name, "app not started");
            return Ok(());
        }
        info!(app = %self.name, "stopping app");

        self.rules.close_all();
        for binding in self.bindings_snapshot().iter().rev() {
            binding.stop().await.map_err(|source| AppError::Binding {
                binding: binding.name().to_string(),
                source,
            })?;
        }
        for thing in self.things_snapshot().iter().rev() {
            thing.stop();
        }

        info!(app = %self.name, "app stopped");
        Ok(())
    }

    fn things_snapshot(&self) -> Vec<SharedThing> {
        self.things
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn bindings_snapshot(&self) -> Vec<Arc<dyn Binding>> {
        self.bindings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smarthome_bindings::{ChannelBinding, Inbound};
    use smarthome_core::Value;
    use smarthome_rules::Rule;
    use smarthome_state::StateOps;
    use smarthome_things::{switch, temperature, BindOptions};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let app = App::new("house");
        assert!(!app.is_started());
        app.start().await.unwrap();
        assert!(app.is_started());
        app.start().await.unwrap();
        app.stop().await.unwrap();
        assert!(!app.is_started());
        app.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_attaches_app_info_before_things() {
        let app = App::new("house");
        let (channel, _rx) = ChannelBinding::new("loopback");
        app.add_binding(channel.clone());
        app.start().await.unwrap();

        assert_eq!(channel.app().unwrap().name, "house");
        app.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_round_trip() {
        let app = App::new("house");
        let lamp = switch("lamp");
        let outdoor = temperature("outdoor");
        let (channel, mut rx) = ChannelBinding::new("loopback");
        let binding: Arc<dyn Binding> = channel.clone();

        lamp.bind_to(&binding, BindOptions::default()).unwrap();
        outdoor
            .bind_to(&binding, BindOptions::subscribe_only())
            .unwrap();

        // Lamp turns on when it gets cold outside
        let is_on = lamp.state("is_on").unwrap().clone();
        let reading = outdoor.state("value").unwrap().clone();
        app.add_rule(Rule::when(
            "cold outside",
            reading.lt(5.0),
            move || {
                let is_on = is_on.clone();
                async move {
                    is_on.command(true)?;
                    Ok(())
                }
            },
        ));

        app.add_thing(lamp.clone());
        app.add_thing(outdoor.clone());
        app.add_binding(binding);
        app.start().await.unwrap();
        settle().await;

        channel
            .inject("temp.outdoor", "value", "3.5", Inbound::Update)
            .unwrap();
        settle().await;

        assert_eq!(lamp.state("is_on").unwrap().value(), Value::Bool(true));
        let record = rx.recv().await.unwrap();
        assert_eq!(record.path, "switch.lamp.is_on");
        assert_eq!(record.value, Value::Bool(true));

        app.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_silences_rules() {
        let app = App::new("house");
        let lamp = switch("lamp");
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        let changed = lamp.state("is_on").unwrap().signal(
            smarthome_state::StateEvent::Change,
        );
        app.add_rule(Rule::on_signal("count", changed.clone(), move || {
            counted.fetch_add(1, Ordering::SeqCst);
            futures_ready()
        }));
        app.add_thing(lamp.clone());
        app.start().await.unwrap();
        settle().await;

        lamp.state("is_on").unwrap().change(true).unwrap();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        app.stop().await.unwrap();
        settle().await;
        lamp.state("is_on").unwrap().change(false).unwrap();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    fn futures_ready() -> std::future::Ready<anyhow::Result<()>> {
        std::future::ready(Ok(()))
    }
}
