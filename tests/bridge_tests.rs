//! Scenario tests for the command bridge against a simulated hub
//!
//! A recording publisher stands in for the broker connection, so each test
//! can assert exactly which subscriptions and retained reports went out.

use std::sync::{Arc, Mutex};

use rumqttc::{
    ClientError, ConnAck, ConnectReturnCode, ConnectionError, Event, Packet, Publish, QoS,
};
use usb_power_controller::config::{Config, TopicConfig};
use usb_power_controller::hub::SimulatedHub;
use usb_power_controller::mqtt::{CommandBridge, ConnectionState, StatePublisher};
use usb_power_controller::power::{PowerState, UsbPowerController};

#[derive(Default)]
struct Broker {
    subscriptions: Mutex<Vec<String>>,
    retained: Mutex<Vec<(String, String)>>,
}

impl Broker {
    fn reports(&self) -> Vec<String> {
        self.retained
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl StatePublisher for Broker {
    fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), ClientError> {
        self.retained
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

struct Harness {
    bridge: CommandBridge,
    broker: Arc<Broker>,
    hub: SimulatedHub,
    topics: TopicConfig,
}

impl Harness {
    fn new(initial: PowerState) -> Self {
        let config = Config::from_toml_str(
            r#"
[General]
switch_name = "bench"

[MQTTBrokerConfig]
mqtt_host = "localhost"
mqtt_port = 1883

[MQTTTopicConfig]
mqtt_topic_set_switch_state = "bench/usb/set"
mqtt_topic_report_switch_state = "bench/usb/state"
"#,
        )
        .unwrap();

        let hub = SimulatedHub::new(4, initial);
        let controller = UsbPowerController::new(Box::new(hub.clone())).unwrap();
        let broker = Arc::new(Broker::default());
        let bridge = CommandBridge::new(controller, broker.clone(), config.topics.clone());

        Self {
            bridge,
            broker,
            hub,
            topics: config.topics,
        }
    }

    fn connect(&mut self) {
        let ack = ConnAck::new(ConnectReturnCode::Success, false);
        self.bridge
            .handle_event(&Event::Incoming(Packet::ConnAck(ack)))
            .unwrap();
    }

    fn command(&mut self, payload: &str) {
        let publish = Publish::new(
            self.topics.set_state.clone(),
            QoS::AtMostOnce,
            payload.as_bytes().to_vec(),
        );
        self.bridge
            .handle_event(&Event::Incoming(Packet::Publish(publish)))
            .unwrap();
    }

    fn lose_connection(&mut self) {
        self.bridge.on_connection_error(&ConnectionError::RequestsDone);
    }
}

#[test]
fn initial_state_is_reported_retained_on_connect() {
    let mut h = Harness::new(PowerState::Off);

    h.connect();

    assert_eq!(*h.broker.subscriptions.lock().unwrap(), vec!["bench/usb/set"]);
    assert_eq!(
        *h.broker.retained.lock().unwrap(),
        vec![("bench/usb/state".to_string(), "false".to_string())]
    );
}

#[test]
fn commands_in_any_case_switch_the_hub() {
    let mut h = Harness::new(PowerState::Off);
    h.connect();

    h.command("True");
    assert_eq!(h.hub.current(), PowerState::On);
    h.command("nonsense");
    assert_eq!(h.hub.current(), PowerState::Off);
    h.command("TRUE");
    assert_eq!(h.hub.current(), PowerState::On);

    assert_eq!(h.hub.writes(), 3);
    assert_eq!(h.broker.reports(), vec!["false", "true", "false", "true"]);
    assert_eq!(h.bridge.status().messages_received, 3);
}

#[test]
fn duplicate_commands_do_not_touch_hardware() {
    let mut h = Harness::new(PowerState::On);
    h.connect();

    h.command("true");
    h.command("true");

    assert_eq!(h.hub.writes(), 0);
    assert_eq!(h.broker.reports(), vec!["true"]);
}

#[test]
fn session_with_connection_loss() {
    let mut h = Harness::new(PowerState::On);
    let mut connection = h.bridge.watch_connection();

    h.connect();
    assert_eq!(*connection.borrow_and_update(), ConnectionState::Connected);

    h.lose_connection();
    assert_eq!(*connection.borrow_and_update(), ConnectionState::Disconnected);

    // applied, but the report is dropped rather than queued
    h.command("false");
    assert_eq!(h.hub.current(), PowerState::Off);
    assert_eq!(h.broker.reports(), vec!["true"]);

    h.connect();
    assert_eq!(h.broker.reports(), vec!["true", "false"]);
    assert_eq!(h.broker.subscriptions.lock().unwrap().len(), 2);
    assert_eq!(h.bridge.connection_state(), ConnectionState::Connected);
}

#[test]
fn commands_before_first_connect_are_applied_silently() {
    let mut h = Harness::new(PowerState::Off);

    h.command("true");

    assert_eq!(h.hub.current(), PowerState::On);
    assert!(h.broker.reports().is_empty());
    assert_eq!(h.bridge.controller().state().unwrap(), PowerState::On);
}
