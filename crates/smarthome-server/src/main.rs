//! Smart Home Server
//!
//! Demo entry point: wires a lamp, an outdoor temperature sensor and a
//! loopback channel binding into an app, adds one automation rule, and
//! runs until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use smarthome_app::{App, AppConfig};
use smarthome_bindings::{Binding, ChannelBinding, Inbound};
use smarthome_rules::Rule;
use smarthome_state::StateOps;
use smarthome_things::{switch, temperature, BindOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::from_yaml_file(&path)?,
        None => AppConfig::default(),
    };

    // Initialize tracing
    let filter = match &config.log_filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(app = %config.name, "starting smart home server");

    let app = App::new(config.name.clone());
    let lamp = switch("porch_lamp");
    let outdoor = temperature("outdoor");
    let (channel, mut pushed) = ChannelBinding::new("loopback");
    let binding: Arc<dyn Binding> = channel.clone();

    lamp.bind_to(&binding, BindOptions::default())?;
    outdoor.bind_to(&binding, BindOptions::subscribe_only())?;

    // Turn the porch lamp on whenever it drops below 5 degrees
    let is_on = lamp.state("is_on").context("switch preset has is_on")?.clone();
    let reading = outdoor
        .state("value")
        .context("temperature preset has value")?
        .clone();
    app.add_rule(Rule::when("cold outside", reading.lt(5.0), move || {
        let is_on = is_on.clone();
        async move {
            is_on.command(true)?;
            Ok(())
        }
    }));

    app.add_thing(lamp);
    app.add_thing(outdoor);
    app.add_binding(binding);
    app.start().await?;

    // Log what the bindings would push to their transports
    tokio::spawn(async move {
        while let Some(record) = pushed.recv().await {
            info!(path = %record.path, value = %record.value, "outbound push");
        }
    });

    // Feed a couple of readings so the demo does something visible
    channel.inject("temp.outdoor", "value", "12.5", Inbound::Update)?;
    channel.inject("temp.outdoor", "value", "3.0", Inbound::Update)?;

    info!("smart home server is running");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    app.stop().await?;

    Ok(())
}
