//! Outbound side of the bridge
//!
//! [`StatePublisher`] is the slice of the MQTT client the bridge uses, so
//! tests can record traffic instead of talking to a broker.
//! [`ReportObserver`] turns controller state changes into retained reports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rumqttc::{AsyncClient, ClientError, QoS};
use tokio::sync::watch;
use tracing::{info, warn};

use super::mqtt_handler::ConnectionState;
use crate::power::{PowerState, StateObserver};

pub trait StatePublisher: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), ClientError>;

    /// Retained, QoS 1
    fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), ClientError>;
}

impl StatePublisher for AsyncClient {
    fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.try_subscribe(topic, QoS::AtMostOnce)
    }

    fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), ClientError> {
        self.try_publish(topic, QoS::AtLeastOnce, true, payload.as_bytes().to_vec())
    }
}

/// Publishes every applied state change while the bridge is connected.
/// Changes seen while disconnected are dropped, the next connect publishes
/// the then-current state anyway. Accepted publishes are counted in
/// `published`.
pub struct ReportObserver {
    publisher: Arc<dyn StatePublisher>,
    topic: String,
    connection: watch::Receiver<ConnectionState>,
    published: Arc<AtomicUsize>,
}

impl ReportObserver {
    pub fn new(
        publisher: Arc<dyn StatePublisher>,
        topic: String,
        connection: watch::Receiver<ConnectionState>,
        published: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            publisher,
            topic,
            connection,
            published,
        }
    }
}

impl StateObserver for ReportObserver {
    fn on_state_change(&self, state: PowerState) {
        if *self.connection.borrow() != ConnectionState::Connected {
            warn!("Not connected to MQTT, dropping USB power state report: {}", state);
            return;
        }
        match self.publisher.publish_retained(&self.topic, state.as_payload()) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                info!("Reporting USB power state to MQTT. New state: {}", state);
            }
            Err(e) => warn!("Failed to report USB power state {}: {}", state, e),
        }
    }
}
