//! In-memory hub used by `--simulate` and the tests

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{HubError, PortPower};
use crate::power::PowerState;

#[derive(Debug)]
struct SimState {
    power: PowerState,
    writes: usize,
}

/// Simulated hub
///
/// Clones share the same state, so a test can keep one handle and move the
/// other into the controller to count hardware writes afterwards.
#[derive(Debug, Clone)]
pub struct SimulatedHub {
    ports: u8,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHub {
    pub fn new(ports: u8, initial: PowerState) -> Self {
        Self {
            ports,
            state: Arc::new(Mutex::new(SimState {
                power: initial,
                writes: 0,
            })),
        }
    }

    /// Number of power writes that reached the "hardware"
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Current power state without going through the trait
    pub fn current(&self) -> PowerState {
        self.lock().power
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // a poisoned lock only means a test thread panicked mid-write
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PortPower for SimulatedHub {
    fn port_count(&self) -> u8 {
        self.ports
    }

    fn power(&self) -> Result<PowerState, HubError> {
        Ok(self.lock().power)
    }

    fn set_power(&mut self, state: PowerState) -> Result<(), HubError> {
        let mut sim = self.lock();
        sim.power = state;
        sim.writes += 1;
        debug!("Simulated hub switched {} (write #{})", state, sim.writes);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("simulated hub with {} ports", self.ports)
    }
}
