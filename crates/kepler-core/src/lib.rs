//! # kepler-core
//!
//! Per-node energy and power telemetry: samples platform energy counters
//! and kernel activity, attributes energy to processes, containers, pods
//! and virtual machines, and publishes an immutable snapshot every tick.
//!
//! ## Architecture
//!
//! Zone readers → [`delta`] (wrap-safe differencing) → [`attribution`]
//! (active/idle split, proportional distribution) → [`snapshot`] (the
//! published view). [`monitor::PowerMonitor`] is the orchestrator that
//! ties these together on a fixed tick, publishing through an
//! `arc_swap::ArcSwap` so reads (the `/metrics` scrape) never block on the
//! tick in progress.
//!
//! `kepler-core` never touches `/proc`, a container runtime, or an eBPF
//! loader directly — those live behind the [`activity::KernelSampler`] and
//! [`informer::ResourceInformer`] traits, injected at construction time by
//! `kepler-cli`.

pub mod activity;
pub mod attribution;
pub mod config;
pub mod delta;
pub mod error;
pub mod informer;
pub mod monitor;
pub mod snapshot;
pub mod terminated;
pub mod units;
pub mod zone;
pub mod zones;

pub use config::Config;
pub use error::{AttributionError, DeltaError, MonitorError, ZoneError};
pub use monitor::{MonitorState, PowerMonitor};
pub use snapshot::{Container, Node, Pod, Process, ProcessId, Snapshot, VirtualMachine};
pub use units::{Joules, MicroJoules, Watts};
pub use zone::{Zone, ZoneKind, ZoneReading, ZoneUsage};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
