//! # MQTT Integration Module
//!
//! Connects the USB power controller to an MQTT broker. One topic carries
//! commands in, one topic carries the retained power state out.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Broker settings and client options
//! ├── bridge.rs        - Event handling: connect, command, disconnect
//! ├── publisher.rs     - Client seam and the state report observer
//! └── mqtt_handler.rs  - Service lifecycle state machine and event loop
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! set topic ──► CommandBridge ──► UsbPowerController ──► hub
//!                                        │
//!                                 ReportObserver ──► report topic (retained, QoS 1)
//! ```
//!
//! All events are handled on the task that polls the event loop, so the
//! bridge never needs a lock around the controller.

pub mod bridge;
pub mod config;
pub mod mqtt_handler;
pub mod publisher;

pub use bridge::{BridgeError, CommandBridge};
pub use config::MqttConfig;
pub use mqtt_handler::{BridgeStatus, ConnectionState, MqttService};
pub use publisher::{ReportObserver, StatePublisher};
