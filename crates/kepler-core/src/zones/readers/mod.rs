//! Concrete [`EnergyReader`](super::EnergyReader) implementations.
//!
//! Each submodule owns one platform source. `all_readers` is the single
//! place that decides, per host, which of these actually get registered —
//! the rest of the crate never matches on reader type again.

pub mod bmc;
pub mod estimator;
pub mod gpu;
pub mod msr;
pub mod powercap;

use crate::config::ZoneToggles;

use super::EnergyReader;

/// Discover every zone reader available on this host, in priority order:
/// powercap (most common on Linux), MSR, GPU vendor library, BMC, falling
/// back to the software estimator if nothing else reported a zone. A zone
/// kind disabled in `toggles` is dropped here, before demotion bookkeeping
/// or any tick ever sees it.
pub fn all_readers(toggles: &ZoneToggles) -> Vec<Box<dyn EnergyReader>> {
    let mut found: Vec<Box<dyn EnergyReader>> = Vec::new();
    found.extend(powercap::discover());
    found.extend(msr::discover());
    found.extend(gpu::discover());
    found.extend(bmc::discover());
    found.retain(|r| toggles.enabled(r.zone().kind));

    if found.is_empty() {
        found.extend(estimator::discover().into_iter().filter(|r| toggles.enabled(r.zone().kind)));
    }
    found
}
