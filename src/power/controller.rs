//! USB Power Controller - idempotent state application on top of a hub
//!
//! Wraps a [`PortPower`] implementation and notifies registered
//! [`StateObserver`]s whenever a new state actually reaches the hardware.
//! Requests for the state the hub already has are answered without a write
//! and without a notification.

use tracing::{debug, info};

use super::PowerState;
use crate::hub::{HubError, PortPower};

/// Errors raised by the power controller
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Hub answered but has nothing to switch
    #[error("Invalid USB hub specified in configuration. {0} contains 0 ports")]
    NoPorts(String),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}

/// Receives the new power state after every applied change
pub trait StateObserver: Send {
    fn on_state_change(&self, state: PowerState);
}

pub struct UsbPowerController {
    hub: Box<dyn PortPower>,
    observers: Vec<Box<dyn StateObserver>>,
}

impl UsbPowerController {
    /// Takes ownership of the hub; a hub without ports is rejected
    pub fn new(hub: Box<dyn PortPower>) -> Result<Self, ControllerError> {
        if hub.port_count() == 0 {
            return Err(ControllerError::NoPorts(hub.describe()));
        }
        info!("USB power controller attached to {}", hub.describe());

        Ok(Self {
            hub,
            observers: Vec::new(),
        })
    }

    pub fn subscribe(&mut self, observer: Box<dyn StateObserver>) {
        debug!("New subscriber to USB power state");
        self.observers.push(observer);
    }

    /// Current power state as read from the hub
    pub fn state(&self) -> Result<PowerState, ControllerError> {
        Ok(self.hub.power()?)
    }

    /// Applies `state` if it differs from the hardware state.
    ///
    /// Returns `true` when a write happened and the observers were notified.
    pub fn set_state(&mut self, state: PowerState) -> Result<bool, ControllerError> {
        debug!("Setting USB power state to: {}", state);

        if self.hub.power()? == state {
            debug!("USB power state already {}", state);
            return Ok(false);
        }

        debug!("Changing USB power state to {}", state);
        self.hub.set_power(state)?;
        debug!(
            "Current state as read from system is {}",
            self.hub.power()?
        );

        for observer in &self.observers {
            observer.on_state_change(state);
        }
        Ok(true)
    }

    /// Shutdown hook. The port is left in whatever state it has.
    pub fn cleanup(&mut self) {
        match self.hub.power() {
            Ok(state) => info!("Leaving USB power {} on shutdown", state),
            Err(e) => debug!("Could not read USB power state during cleanup: {}", e),
        }
    }
}
