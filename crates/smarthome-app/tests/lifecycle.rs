//! End-to-end lifecycle: config, things, bindings and rules together

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use smarthome_app::{App, AppConfig};
use smarthome_bindings::{Binding, ChannelBinding, Inbound};
use smarthome_core::{Converter, Value};
use smarthome_rules::Rule;
use smarthome_state::{StateOps, ValueExpr};
use smarthome_things::{switch, temperature, BindOptions, Thing};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

#[tokio::test]
async fn test_config_to_running_app() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "name: integration").unwrap();
    let config = AppConfig::from_yaml_file(file.path()).unwrap();

    let app = App::from_config(&config);
    assert_eq!(app.name(), "integration");

    app.add_thing(switch("lamp"));
    app.start().await.unwrap();
    assert!(app.is_started());
    assert_eq!(
        app.thing("switch.lamp").unwrap().as_json(),
        serde_json::json!({"is_on": false})
    );
    app.stop().await.unwrap();
}

#[tokio::test]
async fn test_average_of_two_sensors_drives_a_switch() {
    let app = App::new("climate");
    let indoor = temperature("indoor");
    let outdoor = temperature("outdoor");
    let fan = switch("fan");
    let (channel, mut rx) = ChannelBinding::new("loopback");
    let binding: Arc<dyn Binding> = channel.clone();

    indoor.bind_to(&binding, BindOptions::subscribe_only()).unwrap();
    outdoor
        .bind_to(&binding, BindOptions::subscribe_only())
        .unwrap();
    fan.bind_to(&binding, BindOptions::push_only()).unwrap();

    // Fan runs when the average reading exceeds 25 degrees
    let average = (ValueExpr::from(indoor.state("value").unwrap())
        + outdoor.state("value").unwrap().expr())
        / 2.0;
    let fan_on = fan.state("is_on").unwrap().clone();
    app.add_rule(Rule::when("hot", average.gt(25.0), move || {
        let fan_on = fan_on.clone();
        async move {
            fan_on.command(true)?;
            Ok(())
        }
    }));

    app.add_thing(indoor.clone());
    app.add_thing(outdoor.clone());
    app.add_thing(fan.clone());
    app.add_binding(binding);
    app.start().await.unwrap();
    settle().await;

    channel
        .inject("temp.indoor", "value", "24.0", Inbound::Update)
        .unwrap();
    settle().await;
    // Average 12.0: fan stays off
    assert_eq!(fan.state("is_on").unwrap().value(), Value::Bool(false));

    channel
        .inject("temp.outdoor", "value", "28.0", Inbound::Update)
        .unwrap();
    settle().await;
    // Average 26.0: fan turns on and the change is pushed out
    assert_eq!(fan.state("is_on").unwrap().value(), Value::Bool(true));
    let record = rx.recv().await.unwrap();
    assert_eq!(record.path, "switch.fan.is_on");
    assert_eq!(record.value, Value::Bool(true));

    app.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_tears_down_every_task() {
    let app = App::new("teardown");
    let door = Thing::builder("switch", "door")
        .state("is_on", Converter::Bool, false)
        .build();
    let (channel, mut rx) = ChannelBinding::new("loopback");
    let binding: Arc<dyn Binding> = channel.clone();
    door.bind_to(&binding, BindOptions::default()).unwrap();

    app.add_thing(door.clone());
    app.add_binding(binding);
    app.start().await.unwrap();
    settle().await;

    channel
        .inject("switch.door", "is_on", "on", Inbound::Command)
        .unwrap();
    settle().await;
    assert!(rx.recv().await.is_some());

    app.stop().await.unwrap();
    settle().await;

    // Push rules are closed: further changes produce no outbound traffic
    door.state("is_on").unwrap().change(false).unwrap();
    settle().await;
    assert!(rx.try_recv().is_err());
}
