//! Platform/chassis power zones reported by a baseboard management
//! controller (Redfish, IPMI).
//!
//! Like [`super::gpu`], the BMC client itself is an external collaborator —
//! the spec scopes "GPU/BMC-specific readers beyond their interface" out of
//! this crate. This module exposes the seam: a network round-trip to a BMC
//! is expected to be slow, so [`BmcReader`] is the one reader variant the
//! registry should apply its per-source timeout to most eagerly.

use std::time::{Duration, Instant};

use crate::error::ZoneError;
use crate::zone::{Zone, ZoneReading};
use crate::zones::EnergyReader;

pub struct BmcReader {
    zone: Zone,
    sample: Box<dyn Fn(Duration) -> Result<u64, String> + Send + Sync>,
    timeout: Duration,
}

impl BmcReader {
    pub fn new(
        zone: Zone,
        timeout: Duration,
        sample: Box<dyn Fn(Duration) -> Result<u64, String> + Send + Sync>,
    ) -> Self {
        Self {
            zone,
            sample,
            timeout,
        }
    }
}

impl EnergyReader for BmcReader {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    fn read(&self) -> Result<ZoneReading, ZoneError> {
        (self.sample)(self.timeout)
            .map(|raw_counter| ZoneReading {
                zone: self.zone.clone(),
                raw_counter,
                read_at: Instant::now(),
            })
            .map_err(|reason| ZoneError::TransientReadError {
                zone: self.zone.label(),
                reason,
            })
    }
}

/// No BMC client is linked into `kepler-core`; platform zones, if any, are
/// registered by the binary via [`BmcReader::new`] before `PowerMonitor::init`.
pub fn discover() -> Vec<Box<dyn EnergyReader>> {
    Vec::new()
}
