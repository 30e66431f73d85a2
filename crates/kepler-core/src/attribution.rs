//! Attribution Engine (component E): node active/idle split and
//! per-workload energy distribution, exactly per spec steps 1–4.

use std::collections::HashMap;
use std::time::Duration;

use crate::activity::ActivityEvent;
use crate::error::AttributionError;
use crate::informer::{ContainerId, PodId, ResourceInformer, VmId};
use crate::snapshot::ProcessId;
use crate::units::MicroJoules;
use crate::zone::Zone;

/// This tick's delta for one zone at the node level, before workload
/// attribution.
#[derive(Debug, Clone, Copy)]
pub struct NodeZoneDelta {
    pub total: MicroJoules,
    pub active: MicroJoules,
    pub idle: MicroJoules,
    pub interval: Duration,
}

/// Per-process information and this tick's energy share, carrying enough
/// descriptive data for the snapshot builder to create or update entries
/// without a second informer round-trip.
#[derive(Debug, Clone)]
pub struct ProcessAttribution {
    pub id: ProcessId,
    pub pid: u32,
    pub comm: String,
    pub exe: String,
    pub cpu_time_delta: Duration,
    pub container_id: Option<ContainerId>,
    pub pod_id: Option<PodId>,
    pub vm_id: Option<VmId>,
    pub zones: HashMap<Zone, MicroJoules>,
    /// True if this pid produced events this tick but the informer could
    /// not resolve it (scenario S5); `id` is then `ProcessId::orphan(pid)`.
    pub orphan: bool,
    /// True if the informer's `reap()` reported this pid gone this tick —
    /// the caller moves it to the terminated set after folding in this
    /// delta.
    pub vanished: bool,
}

/// Full result of one tick's attribution pass.
#[derive(Debug, Clone)]
pub struct TickAttribution {
    pub usage_ratio: f64,
    pub node_zones: HashMap<Zone, NodeZoneDelta>,
    pub processes: Vec<ProcessAttribution>,
    pub identity_misses: Vec<AttributionError>,
}

/// Run the four-step attribution pipeline for one tick.
///
/// `zone_deltas` comes from `delta::DeltaTracker::observe` for every
/// non-demoted zone. `events` is whatever the sampler drain staged since
/// the last tick. `num_cpus` and `interval` are used for the node-level
/// usage ratio; `informer` resolves pid → process/container/pod/vm.
pub fn attribute(
    zone_deltas: &HashMap<Zone, MicroJoules>,
    events: Vec<ActivityEvent>,
    interval: Duration,
    num_cpus: usize,
    informer: &dyn ResourceInformer,
) -> TickAttribution {
    // Step 1: node active/idle split.
    let cpu_time_busy_us: u64 = events.iter().map(|e| e.delta_cpu_time_us).sum();
    let capacity_us = (num_cpus.max(1) as f64) * interval.as_secs_f64() * 1_000_000.0;
    let usage_ratio = if capacity_us > 0.0 {
        (cpu_time_busy_us as f64 / capacity_us).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut node_zones = HashMap::with_capacity(zone_deltas.len());
    for (zone, &delta_energy) in zone_deltas {
        let active = delta_energy.scale(usage_ratio);
        let idle = delta_energy.saturating_sub(active);
        node_zones.insert(
            zone.clone(),
            NodeZoneDelta {
                total: delta_energy,
                active,
                idle,
                interval,
            },
        );
    }

    // Step 2: per-workload weights (grouped by pid, since a process is the
    // unit the sampler reports events against).
    let mut weight_by_pid: HashMap<u32, u64> = HashMap::new();
    for event in &events {
        *weight_by_pid.entry(event.pid).or_insert(0) += event.delta_cpu_time_us;
    }
    let total_weight: u64 = weight_by_pid.values().sum();

    // Step 3: distribute active energy across workloads proportional to
    // weight. Rounding residue is implicitly left on the node (we only ever
    // subtract out what each workload was actually awarded).
    let mut identity_misses = Vec::new();
    let mut processes = Vec::with_capacity(weight_by_pid.len());

    for (pid, weight) in &weight_by_pid {
        let share_ratio = if total_weight == 0 {
            0.0
        } else {
            *weight as f64 / total_weight as f64
        };

        let mut zones = HashMap::with_capacity(node_zones.len());
        for (zone, node_delta) in &node_zones {
            zones.insert(zone.clone(), node_delta.active.scale(share_ratio));
        }

        let cpu_time_delta = Duration::from_micros(*weight);

        match informer.process(*pid) {
            Some(info) => {
                let container_id = informer.container_of(*pid);
                let pod_id = container_id.as_ref().and_then(|c| informer.pod_of(c));
                let vm_id = informer.vm_of(*pid);
                processes.push(ProcessAttribution {
                    id: ProcessId::new(info.pid, info.started_at_unix_nanos),
                    pid: *pid,
                    comm: info.comm,
                    exe: info.exe,
                    cpu_time_delta,
                    container_id,
                    pod_id,
                    vm_id,
                    zones,
                    orphan: false,
                    vanished: false,
                });
            }
            None => {
                identity_misses.push(AttributionError::IdentityMiss { pid: *pid });
                processes.push(ProcessAttribution {
                    id: ProcessId::orphan(*pid),
                    pid: *pid,
                    comm: String::new(),
                    exe: String::new(),
                    cpu_time_delta,
                    container_id: None,
                    pod_id: None,
                    vm_id: None,
                    zones,
                    orphan: true,
                    vanished: false,
                });
            }
        }
    }

    TickAttribution {
        usage_ratio,
        node_zones,
        processes,
        identity_misses,
    }
}
