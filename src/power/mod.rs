//! # Power State
//!
//! The one piece of state this daemon manages: whether the USB power rail of
//! the hub is switched on or off. The same value is mirrored in three places:
//!
//! ```text
//! Hub port status ──► UsbPowerController ──► retained MQTT report
//!        ▲                                          │
//!        └──────────── set-state topic ◄────────────┘
//! ```
//!
//! [`PowerState`] renders as `ON`/`OFF` in log lines and as `true`/`false`
//! on the wire.

pub mod controller;

use std::fmt;

pub use controller::{ControllerError, StateObserver, UsbPowerController};

/// Power state of the controlled USB port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerState {
    On,
    #[default]
    Off,
}

impl PowerState {
    /// Parses a set-state payload.
    ///
    /// Only a case-insensitive `"true"` switches the power on. Every other
    /// payload, including empty and non-UTF-8 ones, is treated as off.
    pub fn from_payload(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        Self::from(text.eq_ignore_ascii_case("true"))
    }

    /// Wire rendering used on the report topic
    pub fn as_payload(&self) -> &'static str {
        match self {
            PowerState::On => "true",
            PowerState::Off => "false",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::On)
    }
}

impl From<bool> for PowerState {
    fn from(on: bool) -> Self {
        if on {
            PowerState::On
        } else {
            PowerState::Off
        }
    }
}

impl From<PowerState> for bool {
    fn from(state: PowerState) -> Self {
        state.is_on()
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "ON"),
            PowerState::Off => write!(f, "OFF"),
        }
    }
}
