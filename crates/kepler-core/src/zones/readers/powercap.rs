//! Intel RAPL via the Linux `powercap` sysfs framework.
//!
//! Each zone is a directory under `/sys/class/powercap/intel-rapl*` with
//! `energy_uj` (current counter, microjoules) and `max_energy_range_uj`
//! (wrap modulus) files. Subzones (core, uncore, dram) live as
//! `intel-rapl:<pkg>:<n>` with a `name` file identifying the domain.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::ZoneError;
use crate::zone::{Zone, ZoneKind, ZoneReading};
use crate::zones::EnergyReader;

const POWERCAP_ROOT: &str = "/sys/class/powercap";

pub struct PowercapReader {
    zone: Zone,
    energy_path: PathBuf,
}

impl EnergyReader for PowercapReader {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    fn read(&self) -> Result<ZoneReading, ZoneError> {
        let raw = fs::read_to_string(&self.energy_path).map_err(|e| {
            // ENOENT means the powercap entry vanished (unplugged domain,
            // container namespace change): permanent. Anything else
            // (EBUSY-style transient sysfs stalls) is treated as transient.
            if e.kind() == std::io::ErrorKind::NotFound {
                ZoneError::PermanentReadError {
                    zone: self.zone.label(),
                    reason: e.to_string(),
                }
            } else {
                ZoneError::TransientReadError {
                    zone: self.zone.label(),
                    reason: e.to_string(),
                }
            }
        })?;
        let raw_counter: u64 = raw.trim().parse().map_err(|_| ZoneError::TransientReadError {
            zone: self.zone.label(),
            reason: format!("non-numeric energy_uj contents: {raw:?}"),
        })?;
        Ok(ZoneReading {
            zone: self.zone.clone(),
            raw_counter,
            read_at: Instant::now(),
        })
    }
}

fn kind_from_domain_name(name: &str) -> ZoneKind {
    match name {
        "dram" => ZoneKind::Dram,
        "core" => ZoneKind::Core,
        "uncore" => ZoneKind::Uncore,
        _ => ZoneKind::Package,
    }
}

fn read_u64_file(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Enumerate every `intel-rapl*` zone under `/sys/class/powercap`.
pub fn discover() -> Vec<Box<dyn EnergyReader>> {
    let root = Path::new(POWERCAP_ROOT);
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut readers: Vec<Box<dyn EnergyReader>> = Vec::new();
    let mut index = 0u32;
    for entry in entries.flatten() {
        let path = entry.path();
        let name_path = path.join("name");
        let Some(domain_name) = fs::read_to_string(&name_path).ok().map(|s| s.trim().to_string())
        else {
            continue;
        };
        let energy_path = path.join("energy_uj");
        let Some(max_microjoules) = read_u64_file(&path.join("max_energy_range_uj")) else {
            continue;
        };
        if !energy_path.exists() {
            continue;
        }

        let zone = Zone {
            name: domain_name.clone(),
            index,
            path: path.to_string_lossy().into_owned(),
            max_microjoules,
            kind: kind_from_domain_name(&domain_name),
        };
        index += 1;
        readers.push(Box::new(PowercapReader { zone, energy_path }));
    }
    readers
}
