//! Hub access
//!
//! [`PortPower`] is the seam between the power controller and the hardware.
//! [`UsbHub`] talks to a real hub through libusb hub class requests,
//! [`SimulatedHub`] keeps the state in memory.

pub mod sim;
pub mod usb_hub;

use crate::power::PowerState;

pub use sim::SimulatedHub;
pub use usb_hub::UsbHub;

/// Errors raised while talking to the hub
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("No USB hub found{0}")]
    NotFound(String),

    #[error("Invalid hub location {0:?}, expected <bus>-<port>[.<port>...]")]
    InvalidLocation(String),

    #[error("Hub returned a short descriptor ({0} bytes)")]
    ShortDescriptor(usize),
}

/// Power switching for a hub whose ports form one aggregate switch
pub trait PortPower: Send {
    /// Number of downstream ports reported by the hub
    fn port_count(&self) -> u8;

    /// Reads the power state from the hardware
    fn power(&self) -> Result<PowerState, HubError>;

    /// Writes the power state to the hardware
    fn set_power(&mut self, state: PowerState) -> Result<(), HubError>;

    /// Short human-readable identification for log lines
    fn describe(&self) -> String;
}
