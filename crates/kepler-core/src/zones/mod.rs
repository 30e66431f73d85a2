//! Energy Zone Registry (component A).
//!
//! The core treats zone readers as a capability set — `{ name, index, path,
//! max, read() }` — selected at init from tagged concrete variants. The hot
//! path (the tick task) never branches on which kind of reader it is
//! talking to.

pub mod readers;
pub mod registry;

use crate::config::ZoneToggles;
use crate::error::ZoneError;
use crate::zone::{Zone, ZoneReading};

/// A platform-specific energy reader: sysfs powercap, an MSR, a BMC, a GPU
/// vendor library, or a software estimator fallback.
pub trait EnergyReader: Send + Sync {
    /// Static zone identity this reader serves.
    fn zone(&self) -> &Zone;

    /// Read the current raw counter value.
    ///
    /// Implementations should classify failures as
    /// [`ZoneError::TransientReadError`] when the condition is likely to
    /// clear on its own (a timed-out ioctl, a momentarily-busy sysfs file)
    /// and [`ZoneError::PermanentReadError`] when the zone itself appears to
    /// be gone (file removed, device unplugged).
    fn read(&self) -> Result<ZoneReading, ZoneError>;
}

/// Enumerate every zone reader reported by the underlying platform sources,
/// filtered by `toggles` so a zone kind disabled in config is never opened
/// even when a reader for it is available.
///
/// `readers` collects from every source in `readers::all_readers` that
/// reports itself available on this host. Fails with
/// [`ZoneError::NoSources`] if none do.
pub fn discover(toggles: &ZoneToggles) -> Result<Vec<Box<dyn EnergyReader>>, ZoneError> {
    let found = readers::all_readers(toggles);
    if found.is_empty() {
        return Err(ZoneError::NoSources);
    }
    Ok(found)
}
