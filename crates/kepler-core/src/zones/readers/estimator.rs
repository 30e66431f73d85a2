//! Software estimator fallback.
//!
//! Used only when no hardware source (powercap, MSR, GPU, BMC) reported any
//! zone — e.g. inside a VM with no RAPL passthrough. Synthesizes a single
//! "package-0" zone whose monotonically increasing counter accumulates at a
//! configurable constant wattage, so the rest of the pipeline (delta
//! tracking, active/idle split, attribution) still has something to work
//! with rather than running with zero zones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::ZoneError;
use crate::zone::{Zone, ZoneKind, ZoneReading};
use crate::zones::EnergyReader;

/// Assumed constant draw, in watts, when nothing else is measurable.
const ASSUMED_WATTS: f64 = 15.0;

/// Counter never wraps in practice at this accumulation rate over any
/// realistic process lifetime, but a modulus is still required by the data
/// model, so a generous one is picked.
const ESTIMATOR_WRAP_MODULUS: u64 = u64::MAX / 2;

pub struct EstimatorReader {
    zone: Zone,
    started_at: Instant,
    accumulated: AtomicU64,
    last_sample: AtomicU64,
}

impl EnergyReader for EstimatorReader {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    fn read(&self) -> Result<ZoneReading, ZoneError> {
        let now = Instant::now();
        let elapsed_nanos = now.duration_since(self.started_at).as_nanos() as u64;
        let last = self.last_sample.swap(elapsed_nanos, Ordering::Relaxed);
        let delta_nanos = elapsed_nanos.saturating_sub(last);
        let delta_microjoules = (delta_nanos as f64 / 1_000.0) * ASSUMED_WATTS;
        let total = self
            .accumulated
            .fetch_add(delta_microjoules as u64, Ordering::Relaxed)
            + delta_microjoules as u64;

        Ok(ZoneReading {
            zone: self.zone.clone(),
            raw_counter: total % ESTIMATOR_WRAP_MODULUS,
            read_at: now,
        })
    }
}

/// Always registers exactly one zone. Callers are expected to only invoke
/// this when every other reader found nothing.
pub fn discover() -> Vec<Box<dyn EnergyReader>> {
    vec![Box::new(EstimatorReader {
        zone: Zone {
            name: "package".to_string(),
            index: 0,
            path: "estimator://constant-draw".to_string(),
            max_microjoules: ESTIMATOR_WRAP_MODULUS,
            kind: ZoneKind::Package,
        },
        started_at: Instant::now(),
        accumulated: AtomicU64::new(0),
        last_sample: AtomicU64::new(0),
    })]
}
