//! Error taxonomy.
//!
//! Initialization errors ([`ZoneError::NoSources`], [`MonitorError::Configuration`])
//! are fatal and abort the process. Everything else is caught inside the tick
//! task, logged with rate limiting, and never prevents a snapshot from being
//! published for that tick — see `monitor::PowerMonitor::tick`.

use thiserror::Error;

/// Errors from an individual zone reader.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ZoneError {
    /// Recoverable: skip this zone for this tick only.
    #[error("transient read error for zone {zone}: {reason}")]
    TransientReadError { zone: String, reason: String },

    /// Not recoverable: the zone is demoted after two consecutive occurrences.
    #[error("permanent read error for zone {zone}: {reason}")]
    PermanentReadError { zone: String, reason: String },

    /// No reader produced any zone at discovery time. Fatal at init.
    #[error("no energy sources available")]
    NoSources,
}

/// Errors from the delta tracker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// Non-positive interval between two readings of the same zone.
    #[error("clock skew on zone {zone}: interval was not positive")]
    ClockSkew { zone: String },
}

/// Errors surfaced by the attribution engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttributionError {
    /// A workload's identity could not be resolved by the informer this
    /// tick; it is retained under a synthetic orphan identity.
    #[error("identity miss for pid {pid}")]
    IdentityMiss { pid: u32 },
}

/// Errors surfaced by the orchestrator's public API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// `snapshot()` called before the first tick completed.
    #[error("no snapshot has been published yet")]
    NotReady,

    /// Invalid configuration supplied at construction. Fatal at init.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No zone reader produced a usable zone at `init()`. Fatal at init.
    #[error("no energy sources available")]
    NoSources,

    /// The kernel sampler failed validation at `init()`.
    #[error("sampler unavailable: {0}")]
    SamplerUnavailable(String),
}

impl From<ZoneError> for MonitorError {
    fn from(e: ZoneError) -> Self {
        match e {
            ZoneError::NoSources => MonitorError::NoSources,
            other => MonitorError::Configuration(other.to_string()),
        }
    }
}
