//! Configuration surface.
//!
//! `kepler-cli` assembles a [`Config`] from CLI flags layered over an
//! optional config file and environment variables; `kepler-core` itself
//! only consumes the finished value.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How much detail the exporter includes in a scrape.
///
/// Each level is cumulative: it includes every family of the levels before
/// it plus its own. `Node` always renders (there is no level below it);
/// `All` adds `platform_watts` on top of everything `Pod` already includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricsGranularity {
    /// Node-level families only.
    Node,
    /// Adds `process_cpu_*` (live and terminated).
    Process,
    /// Adds `container_cpu_*`.
    Container,
    /// Adds `vm_cpu_*`.
    Vm,
    /// Adds `pod_cpu_*`.
    Pod,
    /// Adds `platform_watts` on top of every other family.
    #[default]
    All,
}

impl MetricsGranularity {
    pub fn at_least(self, floor: MetricsGranularity) -> bool {
        self >= floor
    }
}

/// Which zone kinds to read, independent of what the host actually exposes.
/// A zone kind disabled here is never opened even if a reader for it is
/// available.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneToggles {
    pub package: bool,
    pub core: bool,
    pub uncore: bool,
    pub dram: bool,
    pub platform: bool,
    pub gpu: bool,
}

impl Default for ZoneToggles {
    fn default() -> Self {
        Self {
            package: true,
            core: true,
            uncore: true,
            dram: true,
            platform: true,
            gpu: false,
        }
    }
}

impl ZoneToggles {
    pub fn enabled(&self, kind: crate::zone::ZoneKind) -> bool {
        use crate::zone::ZoneKind::*;
        match kind {
            Package => self.package,
            Core => self.core,
            Uncore => self.uncore,
            Dram => self.dram,
            Platform => self.platform,
            Gpu => self.gpu,
        }
    }
}

/// Full configuration surface for a `kepler-core` monitor plus the HTTP
/// surface that exposes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub metrics_path: String,
    #[serde(with = "humantime_duration")]
    pub sample_interval: Duration,
    pub zones: ZoneToggles,
    pub granularity: MetricsGranularity,
    /// How many ticks a terminated workload's last snapshot is retained for.
    pub terminated_retention_ticks: u64,
    /// Hard cap on terminated entries per entity kind, independent of
    /// retention, to bound memory under identity churn.
    pub terminated_capacity: usize,
    /// Enables the zero-hardware software estimator fallback.
    pub debug_estimator_enabled: bool,
    /// Overrides the `node` label on every exported metric; defaults to the
    /// host name at startup if unset.
    pub node_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9300".parse().unwrap(),
            metrics_path: "/metrics".to_string(),
            sample_interval: Duration::from_secs(3),
            zones: ZoneToggles::default(),
            granularity: MetricsGranularity::default(),
            terminated_retention_ticks: 5,
            terminated_capacity: 4096,
            debug_estimator_enabled: false,
            node_name: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), crate::error::MonitorError> {
        if self.sample_interval.is_zero() {
            return Err(crate::error::MonitorError::Configuration(
                "sample_interval must be greater than zero".to_string(),
            ));
        }
        if self.terminated_capacity == 0 {
            return Err(crate::error::MonitorError::Configuration(
                "terminated_capacity must be greater than zero".to_string(),
            ));
        }
        if !self.metrics_path.starts_with('/') {
            return Err(crate::error::MonitorError::Configuration(
                "metrics_path must start with '/'".to_string(),
            ));
        }
        Ok(())
    }
}

/// `serde_with`-style shim so `Duration` round-trips through TOML as a
/// human string (`"3s"`) rather than a nanosecond integer.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{}ms", d.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    fn parse(raw: &str) -> Result<Duration, String> {
        let raw = raw.trim();
        let (digits, unit) = raw
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .map(|i| raw.split_at(i))
            .ok_or_else(|| format!("missing unit suffix in duration {raw:?}"))?;
        let value: f64 = digits
            .parse()
            .map_err(|_| format!("invalid duration number in {raw:?}"))?;
        let millis = match unit {
            "ms" => value,
            "s" => value * 1_000.0,
            "m" => value * 60_000.0,
            other => return Err(format!("unknown duration unit {other:?}")),
        };
        Ok(Duration::from_millis(millis as u64))
    }
}
