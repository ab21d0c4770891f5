//! Command bridge between the MQTT topics and the power controller
//!
//! All MQTT events are handled serially by [`CommandBridge::handle_event`]:
//!
//! - CONNACK: subscribe to the set topic, publish the current state retained,
//!   then mark the connection as connected (on every reconnect)
//! - PUBLISH on the set topic: parse the payload and apply it
//! - DISCONNECT or a connection error: mark the connection as disconnected
//!
//! State changes reach the report topic through the [`ReportObserver`]
//! registered on the controller, which only publishes while connected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rumqttc::{
    ClientError, ConnAck, ConnectReturnCode, ConnectionError, Event, Outgoing, Packet, Publish,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::mqtt_handler::{BridgeStatus, ConnectionState};
use super::publisher::{ReportObserver, StatePublisher};
use crate::config::TopicConfig;
use crate::power::{ControllerError, PowerState, UsbPowerController};

/// Errors that end the MQTT loop
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("USB power controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("MQTT client error: {0}")]
    Client(#[from] ClientError),
}

pub struct CommandBridge {
    controller: UsbPowerController,
    publisher: Arc<dyn StatePublisher>,
    topics: TopicConfig,
    connection: watch::Sender<ConnectionState>,
    published: Arc<AtomicUsize>,
    status: BridgeStatus,
}

impl CommandBridge {
    /// Registers the report observer on `controller` and takes it over
    pub fn new(
        mut controller: UsbPowerController,
        publisher: Arc<dyn StatePublisher>,
        topics: TopicConfig,
    ) -> Self {
        let (connection, connection_rx) = watch::channel(ConnectionState::default());
        let published = Arc::new(AtomicUsize::new(0));
        controller.subscribe(Box::new(ReportObserver::new(
            publisher.clone(),
            topics.report_state.clone(),
            connection_rx,
            published.clone(),
        )));

        Self {
            controller,
            publisher,
            topics,
            connection,
            published,
            status: BridgeStatus::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Receiver for connection state changes
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn status(&self) -> &BridgeStatus {
        &self.status
    }

    pub fn controller(&self) -> &UsbPowerController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut UsbPowerController {
        &mut self.controller
    }

    pub fn handle_event(&mut self, event: &Event) -> Result<(), BridgeError> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => self.on_connect(ack),
            Event::Incoming(Packet::Publish(publish)) => self.on_message(publish),
            Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect) => {
                self.on_disconnect();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn mark_connecting(&mut self) {
        self.set_connection(ConnectionState::Connecting);
    }

    pub fn on_connection_error(&mut self, error: &ConnectionError) {
        warn!("MQTT connection error: {}", error);
        self.status.error_messages.push(error.to_string());
        self.set_connection(ConnectionState::Disconnected);
    }

    fn on_connect(&mut self, ack: &ConnAck) -> Result<(), BridgeError> {
        if ack.code != ConnectReturnCode::Success {
            warn!("MQTT broker refused the connection: {:?}", ack.code);
            return Ok(());
        }

        info!("Setting up MQTT subscriptions and publishing initial state data");
        self.publisher.subscribe(&self.topics.set_state)?;

        let state = self.controller.state()?;
        self.publisher
            .publish_retained(&self.topics.report_state, state.as_payload())?;
        self.published.fetch_add(1, Ordering::Relaxed);
        self.sync_published();
        self.status.touch();

        info!("MQTT successfully connected");
        info!("MQTT Published initial state: {}", state);
        self.set_connection(ConnectionState::Connected);
        Ok(())
    }

    fn on_message(&mut self, publish: &Publish) -> Result<(), BridgeError> {
        if publish.topic != self.topics.set_state {
            debug!("Ignoring message on unexpected topic {}", publish.topic);
            return Ok(());
        }

        self.status.messages_received += 1;
        self.status.touch();

        let state = PowerState::from_payload(&publish.payload);
        info!("Set USB power state message received. Sending command to switch handler.");
        self.controller.set_state(state)?;
        self.sync_published();
        Ok(())
    }

    fn sync_published(&mut self) {
        self.status.states_published = self.published.load(Ordering::Relaxed);
    }

    pub fn on_disconnect(&mut self) {
        if self.connection_state() == ConnectionState::Connected {
            info!("MQTT disconnected");
        }
        self.set_connection(ConnectionState::Disconnected);
    }

    fn set_connection(&mut self, state: ConnectionState) {
        let previous = self.connection.send_replace(state);
        if previous != state {
            debug!("MQTT connection state {:?} -> {:?}", previous, state);
        }
        self.status.connection_state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{PortPower, SimulatedHub};
    use rumqttc::{QoS, Request};
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    fn publish(topic: &str, payload: &str) -> Publish {
        Publish::new(topic, QoS::AtMostOnce, payload.as_bytes().to_vec())
    }

    #[derive(Default)]
    struct Recorded {
        subscriptions: Mutex<Vec<String>>,
        publishes: Mutex<Vec<(String, String)>>,
        queue_full: AtomicBool,
    }

    impl StatePublisher for Recorded {
        fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
            self.subscriptions.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), ClientError> {
            if self.queue_full.load(Ordering::Relaxed) {
                let request = Publish::new(topic, QoS::AtLeastOnce, payload.as_bytes().to_vec());
                return Err(ClientError::TryRequest(Request::Publish(request)));
            }
            self.publishes
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn topics() -> TopicConfig {
        TopicConfig {
            set_state: "usb/set".to_string(),
            report_state: "usb/state".to_string(),
        }
    }

    fn bridge(initial: PowerState) -> (CommandBridge, Arc<Recorded>, SimulatedHub) {
        let hub = SimulatedHub::new(4, initial);
        let controller = UsbPowerController::new(Box::new(hub.clone())).unwrap();
        let recorded = Arc::new(Recorded::default());
        let bridge = CommandBridge::new(controller, recorded.clone(), topics());
        (bridge, recorded, hub)
    }

    fn connack() -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)))
    }

    #[test]
    fn connect_subscribes_and_reports() {
        let (mut bridge, recorded, _hub) = bridge(PowerState::On);

        bridge.handle_event(&connack()).unwrap();

        assert_eq!(*recorded.subscriptions.lock().unwrap(), vec!["usb/set"]);
        assert_eq!(
            *recorded.publishes.lock().unwrap(),
            vec![("usb/state".to_string(), "true".to_string())]
        );
        assert_eq!(bridge.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn refused_connack_is_ignored() {
        let (mut bridge, recorded, _hub) = bridge(PowerState::On);
        let refused = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));

        bridge.handle_event(&refused).unwrap();

        assert!(recorded.publishes.lock().unwrap().is_empty());
        assert_ne!(bridge.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn command_switches_and_reports() {
        let (mut bridge, recorded, hub) = bridge(PowerState::On);
        bridge.handle_event(&connack()).unwrap();

        bridge
            .handle_event(&Event::Incoming(Packet::Publish(publish("usb/set", "FALSE"))))
            .unwrap();

        assert_eq!(hub.current(), PowerState::Off);
        assert_eq!(
            recorded.publishes.lock().unwrap().last(),
            Some(&("usb/state".to_string(), "false".to_string()))
        );
        assert_eq!(bridge.status().messages_received, 1);
    }

    #[test]
    fn repeated_command_is_not_reported() {
        let (mut bridge, recorded, hub) = bridge(PowerState::Off);
        bridge.handle_event(&connack()).unwrap();

        bridge
            .handle_event(&Event::Incoming(Packet::Publish(publish("usb/set", "false"))))
            .unwrap();

        assert_eq!(hub.writes(), 0);
        assert_eq!(recorded.publishes.lock().unwrap().len(), 1);
    }

    #[test]
    fn other_topics_are_ignored() {
        let (mut bridge, _recorded, hub) = bridge(PowerState::Off);
        bridge.handle_event(&connack()).unwrap();

        bridge
            .handle_event(&Event::Incoming(Packet::Publish(publish("usb/other", "true"))))
            .unwrap();

        assert_eq!(hub.current(), PowerState::Off);
        assert_eq!(bridge.status().messages_received, 0);
    }

    #[test]
    fn changes_while_disconnected_are_dropped() {
        let (mut bridge, recorded, hub) = bridge(PowerState::Off);
        bridge.handle_event(&connack()).unwrap();
        bridge.handle_event(&Event::Incoming(Packet::Disconnect)).unwrap();

        // a retained command delivered late still switches the hub
        bridge
            .handle_event(&Event::Incoming(Packet::Publish(publish("usb/set", "true"))))
            .unwrap();

        assert_eq!(hub.current(), PowerState::On);
        assert_eq!(recorded.publishes.lock().unwrap().len(), 1);
        assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn reconnect_republishes_current_state() {
        let (mut bridge, recorded, hub) = bridge(PowerState::Off);
        bridge.handle_event(&connack()).unwrap();
        bridge.on_connection_error(&ConnectionError::RequestsDone);

        // switched by hand while the broker was away
        hub.clone().set_power(PowerState::On).unwrap();
        bridge.handle_event(&connack()).unwrap();

        assert_eq!(
            *recorded.publishes.lock().unwrap(),
            vec![
                ("usb/state".to_string(), "false".to_string()),
                ("usb/state".to_string(), "true".to_string()),
            ]
        );
        assert_eq!(*recorded.subscriptions.lock().unwrap(), vec!["usb/set", "usb/set"]);
        assert_eq!(bridge.status().error_messages.len(), 1);
    }

    #[test]
    fn published_count_tracks_accepted_reports() {
        let (mut bridge, recorded, hub) = bridge(PowerState::Off);
        bridge.handle_event(&connack()).unwrap();
        assert_eq!(bridge.status().states_published, 1);

        bridge
            .handle_event(&Event::Incoming(Packet::Publish(publish("usb/set", "true"))))
            .unwrap();
        assert_eq!(bridge.status().states_published, 2);

        recorded.queue_full.store(true, Ordering::Relaxed);
        bridge
            .handle_event(&Event::Incoming(Packet::Publish(publish("usb/set", "false"))))
            .unwrap();

        assert_eq!(hub.current(), PowerState::Off);
        assert_eq!(bridge.status().states_published, 2);
        assert_eq!(recorded.publishes.lock().unwrap().len(), 2);
    }

    #[test]
    fn outgoing_disconnect_marks_disconnected() {
        let (mut bridge, _recorded, _hub) = bridge(PowerState::On);
        bridge.handle_event(&connack()).unwrap();

        bridge.on_disconnect();

        assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
        assert_eq!(bridge.status().connection_state, ConnectionState::Disconnected);
    }
}
