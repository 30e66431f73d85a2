//! Demotion policy and batch reads across every discovered zone.

use std::collections::HashMap;

use crate::config::ZoneToggles;
use crate::error::ZoneError;
use crate::zone::{Zone, ZoneReading};
use crate::zones::EnergyReader;

/// Owns every discovered zone reader and the consecutive-permanent-failure
/// counters that drive demotion.
pub struct ZoneRegistry {
    readers: Vec<Box<dyn EnergyReader>>,
    consecutive_permanent_failures: HashMap<(String, u32), u32>,
    demoted: HashMap<(String, u32), bool>,
}

impl ZoneRegistry {
    pub fn new(readers: Vec<Box<dyn EnergyReader>>) -> Self {
        Self {
            readers,
            consecutive_permanent_failures: HashMap::new(),
            demoted: HashMap::new(),
        }
    }

    pub fn discover(toggles: &ZoneToggles) -> Result<Self, ZoneError> {
        Ok(Self::new(super::discover(toggles)?))
    }

    fn key(zone: &Zone) -> (String, u32) {
        (zone.name.clone(), zone.index)
    }

    /// Zones currently active, i.e. not demoted.
    pub fn zones(&self) -> Vec<Zone> {
        self.readers
            .iter()
            .map(|r| r.zone().clone())
            .filter(|z| !self.demoted.get(&Self::key(z)).copied().unwrap_or(false))
            .collect()
    }

    /// Read every non-demoted zone once. Transient errors are reported
    /// per-zone and skip that zone for this tick only; two consecutive
    /// permanent errors demote the zone from this point on.
    pub fn read_all(&mut self) -> Vec<(Zone, Result<ZoneReading, ZoneError>)> {
        let mut out = Vec::with_capacity(self.readers.len());
        for reader in &self.readers {
            let zone = reader.zone().clone();
            let key = Self::key(&zone);
            if self.demoted.get(&key).copied().unwrap_or(false) {
                continue;
            }

            let result = reader.read();
            match &result {
                Ok(_) => {
                    self.consecutive_permanent_failures.remove(&key);
                }
                Err(ZoneError::PermanentReadError { .. }) => {
                    let count = self.consecutive_permanent_failures.entry(key.clone()).or_insert(0);
                    *count += 1;
                    if *count >= 2 {
                        self.demoted.insert(key, true);
                        log::warn!(
                            "zone {} demoted after {} consecutive permanent read errors",
                            zone.label(),
                            count
                        );
                    }
                }
                Err(ZoneError::TransientReadError { .. }) => {
                    // Does not count toward demotion.
                }
                Err(ZoneError::NoSources) => unreachable!("individual readers never return NoSources"),
            }
            out.push((zone, result));
        }
        out
    }

    pub fn is_demoted(&self, zone: &Zone) -> bool {
        self.demoted.get(&Self::key(zone)).copied().unwrap_or(false)
    }
}
