//! Zone identity and readings.
//!
//! A [`Zone`] is discovered once at initialization and is immutable
//! thereafter; equality and hashing use `(name, index)` only, per spec.

use std::time::Instant;

/// Category of platform energy domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Package,
    Core,
    Uncore,
    Dram,
    Platform,
    Gpu,
}

impl std::fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Package => "package",
            Self::Core => "core",
            Self::Uncore => "uncore",
            Self::Dram => "dram",
            Self::Platform => "platform",
            Self::Gpu => "gpu",
        };
        write!(f, "{s}")
    }
}

/// A platform-defined energy accounting domain.
#[derive(Debug, Clone)]
pub struct Zone {
    pub name: String,
    pub index: u32,
    pub path: String,
    /// Wrap modulus for the raw counter, in microjoules.
    pub max_microjoules: u64,
    pub kind: ZoneKind,
}

impl Zone {
    /// Stable label value used on every exported metric: `"<name>-<index>"`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.name, self.index)
    }
}

impl PartialEq for Zone {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.index == other.index
    }
}
impl Eq for Zone {}

impl std::hash::Hash for Zone {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.index.hash(state);
    }
}

/// A single raw reading of a zone's monotonic counter.
///
/// `raw_counter` is monotonic modulo `zone.max_microjoules`; consumers must
/// never treat `current - previous` as signed. See `delta::DeltaTracker`.
#[derive(Debug, Clone)]
pub struct ZoneReading {
    pub zone: Zone,
    pub raw_counter: u64,
    pub read_at: Instant,
}

/// Energy and derived power for a zone, attached to the node or a workload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneUsage {
    pub energy_total: crate::units::MicroJoules,
    pub active_energy_total: crate::units::MicroJoules,
    pub idle_energy_total: crate::units::MicroJoules,
    pub power: crate::units::Watts,
    pub active_power: crate::units::Watts,
    pub idle_power: crate::units::Watts,
}
