//! Control the power output of a USB hub (Raspberry Pi) over MQTT.
//!
//! [`power::UsbPowerController`] owns the hub and applies state changes,
//! [`mqtt::MqttService`] connects it to a broker.

pub mod config;
pub mod hub;
pub mod logging;
pub mod mqtt;
pub mod power;
