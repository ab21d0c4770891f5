//! MQTT service lifecycle with statum state machine
//!
//! ```text
//! Configured ──connect()──► Running ──stop()──► Stopped ──cleanup()
//!                              │ ▲
//!                              └─┘ run(): poll event loop, feed the bridge
//! ```
//!
//! The client and event loop are built in `Configured` but nothing touches
//! the network until `run()` polls. Connection errors keep the loop alive,
//! the next poll reconnects. Bridge errors end it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing};
use statum::{machine, state};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bridge::{BridgeError, CommandBridge};
use super::config::MqttConfig;
use crate::power::UsbPowerController;

const REQUEST_CAPACITY: usize = 10;
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, Default)]
pub struct BridgeStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub states_published: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl BridgeStatus {
    pub fn touch(&mut self) {
        self.last_activity = Some(Local::now());
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum ServiceState {
    Configured, // client built, not polled yet
    Running,    // event loop driven by run()
    Stopped,    // disconnect sent, only cleanup left
}

#[machine]
pub struct MqttService<S: ServiceState> {
    config: MqttConfig,
    client: AsyncClient,
    event_loop: EventLoop,
    bridge: CommandBridge,
}

impl<S: ServiceState> MqttService<S> {
    pub fn bridge(&self) -> &CommandBridge {
        &self.bridge
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }
}

impl MqttService<Configured> {
    pub fn create(config: MqttConfig, controller: UsbPowerController) -> Self {
        info!("Configuring MQTT client...");
        let (client, event_loop) = AsyncClient::new(config.options(), REQUEST_CAPACITY);
        let bridge = CommandBridge::new(
            controller,
            Arc::new(client.clone()),
            config.topics.clone(),
        );
        info!("MQTT successfully configured");

        Self::new(config, client, event_loop, bridge)
    }

    pub fn connect(mut self) -> MqttService<Running> {
        info!(
            "Creating MQTT connection to host: {}:{}",
            self.config.host, self.config.port
        );
        self.bridge.mark_connecting();
        self.transition()
    }
}

impl MqttService<Running> {
    /// Drives the event loop until `shutdown` fires or the bridge fails
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, leaving MQTT loop");
                    return Ok(());
                }
                event = self.event_loop.poll() => match event {
                    Ok(event) => self.bridge.handle_event(&event)?,
                    Err(e) => {
                        self.bridge.on_connection_error(&e);
                        tokio::time::sleep(RECONNECT_PAUSE).await;
                    }
                }
            }
        }
    }

    /// Sends a DISCONNECT and gives the event loop a moment to flush it
    pub async fn stop(mut self) -> MqttService<Stopped> {
        match self.client.try_disconnect() {
            Ok(()) => {
                let flushed =
                    tokio::time::timeout(DISCONNECT_TIMEOUT, self.flush_disconnect()).await;
                if flushed.is_err() {
                    debug!("MQTT disconnect not flushed within {:?}", DISCONNECT_TIMEOUT);
                }
            }
            Err(e) => warn!("Could not request MQTT disconnect: {}", e),
        }
        self.transition()
    }

    async fn flush_disconnect(&mut self) {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.bridge.on_disconnect();
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("MQTT event loop closed while disconnecting: {}", e);
                    return;
                }
            }
        }
    }
}

impl MqttService<Stopped> {
    pub fn cleanup(mut self) {
        let status = self.bridge.status();
        info!(
            "MQTT bridge handled {} commands and published {} states",
            status.messages_received, status.states_published
        );
        self.bridge.controller_mut().cleanup();
    }
}
