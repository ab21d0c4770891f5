//! USB hub port power through hub class requests
//!
//! Uses the same requests as `uhubctl`: the hub descriptor for the port
//! count, `GET_STATUS` on a port for the power bit and
//! `SET_FEATURE`/`CLEAR_FEATURE(PORT_POWER)` to switch it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use tracing::{debug, info, warn};

use super::{HubError, PortPower};
use crate::power::PowerState;

const CLASS_HUB: u8 = 0x09;

const REQUEST_GET_STATUS: u8 = 0x00;
const REQUEST_CLEAR_FEATURE: u8 = 0x01;
const REQUEST_SET_FEATURE: u8 = 0x03;
const REQUEST_GET_DESCRIPTOR: u8 = 0x06;

const DESCRIPTOR_HUB: u8 = 0x29;
const DESCRIPTOR_SUPERSPEED_HUB: u8 = 0x2a;

const FEATURE_PORT_POWER: u16 = 8;

const PORT_STATUS_POWER: u16 = 0x0100;
const PORT_STATUS_SUPERSPEED_POWER: u16 = 0x0200;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// uhubctl style hub address: `<bus>-<port>[.<port>...]`, or `<bus>` for a root hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubLocation {
    pub bus: u8,
    pub ports: Vec<u8>,
}

impl HubLocation {
    fn of(device: &Device<Context>) -> Result<Self, HubError> {
        Ok(Self {
            bus: device.bus_number(),
            ports: device.port_numbers()?,
        })
    }
}

/// A hub whose location cannot be read is skipped, not fatal to the scan
fn select_hub(
    wanted: Option<&HubLocation>,
    found: Result<HubLocation, HubError>,
) -> Option<HubLocation> {
    match found {
        Ok(found) if wanted.map_or(true, |w| *w == found) => Some(found),
        Ok(_) => None,
        Err(e) => {
            debug!("Skipping hub without a port path: {}", e);
            None
        }
    }
}

impl FromStr for HubLocation {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HubError::InvalidLocation(s.to_string());
        let (bus, path) = match s.trim().split_once('-') {
            Some((bus, path)) => (bus, Some(path)),
            None => (s.trim(), None),
        };
        let bus = bus.parse().map_err(|_| invalid())?;
        let ports = match path {
            Some(path) => path
                .split('.')
                .map(|p| p.parse::<u8>().map_err(|_| invalid()))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(Self { bus, ports })
    }
}

impl fmt::Display for HubLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.bus)?;
        if !self.ports.is_empty() {
            let path: Vec<String> = self.ports.iter().map(u8::to_string).collect();
            write!(f, "-{}", path.join("."))?;
        }
        Ok(())
    }
}

/// A USB hub opened for port power control
pub struct UsbHub {
    handle: DeviceHandle<Context>,
    location: HubLocation,
    vendor_id: u16,
    product_id: u16,
    ports: u8,
    superspeed: bool,
}

impl UsbHub {
    /// Opens the hub at `location`, or the first hub found when `None`
    pub fn open(location: Option<&str>) -> Result<Self, HubError> {
        let wanted = location.map(HubLocation::from_str).transpose()?;
        let context = Context::new()?;

        for device in context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!("Skipping device without descriptor: {}", e);
                    continue;
                }
            };
            if descriptor.class_code() != CLASS_HUB {
                continue;
            }

            let Some(found) = select_hub(wanted.as_ref(), HubLocation::of(&device)) else {
                continue;
            };

            debug!(
                "Opening hub {} ({:04x}:{:04x})",
                found,
                descriptor.vendor_id(),
                descriptor.product_id()
            );
            let handle = device.open()?;
            let superspeed = descriptor.usb_version().major() >= 3;
            let ports = read_port_count(&handle, superspeed)?;

            info!("Using USB hub {} with {} ports", found, ports);
            return Ok(Self {
                handle,
                location: found,
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                ports,
                superspeed,
            });
        }

        let suffix = match wanted {
            Some(w) => format!(" at location {}", w),
            None => String::new(),
        };
        warn!("No USB hub found{}", suffix);
        Err(HubError::NotFound(suffix))
    }

    pub fn location(&self) -> &HubLocation {
        &self.location
    }

    fn port_status(&self, port: u8) -> Result<u16, HubError> {
        let request_type = rusb::request_type(Direction::In, RequestType::Class, Recipient::Other);
        let mut buf = [0u8; 4];
        let read = self.handle.read_control(
            request_type,
            REQUEST_GET_STATUS,
            0,
            u16::from(port),
            &mut buf,
            CONTROL_TIMEOUT,
        )?;
        if read < 2 {
            return Err(HubError::ShortDescriptor(read));
        }
        Ok(u16::from_le_bytes([buf[0], buf[1]]))
    }

    fn write_port_power(&self, port: u8, state: PowerState) -> Result<(), HubError> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Class, Recipient::Other);
        let request = match state {
            PowerState::On => REQUEST_SET_FEATURE,
            PowerState::Off => REQUEST_CLEAR_FEATURE,
        };
        self.handle.write_control(
            request_type,
            request,
            FEATURE_PORT_POWER,
            u16::from(port),
            &[],
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }
}

fn read_port_count(handle: &DeviceHandle<Context>, superspeed: bool) -> Result<u8, HubError> {
    let request_type = rusb::request_type(Direction::In, RequestType::Class, Recipient::Device);
    let descriptor_type = if superspeed {
        DESCRIPTOR_SUPERSPEED_HUB
    } else {
        DESCRIPTOR_HUB
    };
    let mut buf = [0u8; 16];
    let read = handle.read_control(
        request_type,
        REQUEST_GET_DESCRIPTOR,
        u16::from(descriptor_type) << 8,
        0,
        &mut buf,
        CONTROL_TIMEOUT,
    )?;
    // bLength, bDescriptorType, bNbrPorts
    if read < 3 {
        return Err(HubError::ShortDescriptor(read));
    }
    Ok(buf[2])
}

impl PortPower for UsbHub {
    fn port_count(&self) -> u8 {
        self.ports
    }

    fn power(&self) -> Result<PowerState, HubError> {
        let mask = if self.superspeed {
            PORT_STATUS_SUPERSPEED_POWER
        } else {
            PORT_STATUS_POWER
        };
        let status = self.port_status(1)?;
        Ok(PowerState::from(status & mask != 0))
    }

    fn set_power(&mut self, state: PowerState) -> Result<(), HubError> {
        // ports share one power rail on the Pi, switch all of them anyway
        for port in 1..=self.ports {
            self.write_port_power(port, state)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "USB hub {} [{:04x}:{:04x}] with {} ports",
            self.location, self.vendor_id, self.product_id, self.ports
        )
    }
}
