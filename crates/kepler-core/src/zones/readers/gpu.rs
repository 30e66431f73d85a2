//! GPU energy zones.
//!
//! Per spec, GPU-specific readers beyond the [`EnergyReader`] interface are
//! an external collaborator (a vendor library such as NVML or ROCm-SMI).
//! This module only defines the zone-shaped seam a vendor implementation
//! plugs into; it never discovers a zone on its own.

use crate::error::ZoneError;
use crate::zone::{Zone, ZoneReading};
use crate::zones::EnergyReader;

/// Wraps a vendor-supplied sampling closure as a [`EnergyReader`].
///
/// Constructed by the binary that wires up a concrete GPU library; the core
/// never links against one directly.
pub struct GpuReader {
    zone: Zone,
    sample: Box<dyn Fn() -> Result<u64, String> + Send + Sync>,
}

impl GpuReader {
    pub fn new(zone: Zone, sample: Box<dyn Fn() -> Result<u64, String> + Send + Sync>) -> Self {
        Self { zone, sample }
    }
}

impl EnergyReader for GpuReader {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    fn read(&self) -> Result<ZoneReading, ZoneError> {
        (self.sample)()
            .map(|raw_counter| ZoneReading {
                zone: self.zone.clone(),
                raw_counter,
                read_at: std::time::Instant::now(),
            })
            .map_err(|reason| ZoneError::TransientReadError {
                zone: self.zone.label(),
                reason,
            })
    }
}

/// No vendor library is linked into `kepler-core`; GPU zones, if any, are
/// registered by the binary via [`GpuReader::new`] before `PowerMonitor::init`.
pub fn discover() -> Vec<Box<dyn EnergyReader>> {
    Vec::new()
}
