//! Data model for workload entities and the immutable [`Snapshot`]
//! (components F's output) plus the builder that assembles one.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::attribution::{ProcessAttribution, TickAttribution};
use crate::informer::{ContainerId, PodId, VmId};
use crate::zone::{Zone, ZoneUsage};

/// Stable identity for a process: `"<pid>-<start_ns>"` so a reused pid
/// never collides with the entity that previously held it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new(pid: u32, started_at_unix_nanos: u64) -> Self {
        Self(format!("{pid}-{started_at_unix_nanos}"))
    }

    /// Synthetic identity for a pid the informer could not resolve this
    /// tick (scenario S5).
    pub fn orphan(pid: u32) -> Self {
        Self(format!("unknown-{pid}"))
    }

    pub fn is_orphan(&self) -> bool {
        self.0.starts_with("unknown-")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Process {
    pub id: ProcessId,
    pub pid: u32,
    pub comm: String,
    pub exe: String,
    pub cpu_total_time: Duration,
    pub container_id: Option<ContainerId>,
    pub vm_id: Option<VmId>,
    pub zones: HashMap<Zone, ZoneUsage>,
}

#[derive(Debug, Clone, Default)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub runtime: String,
    pub pod_id: Option<PodId>,
    pub zones: HashMap<Zone, ZoneUsage>,
}

#[derive(Debug, Clone, Default)]
pub struct VirtualMachine {
    pub id: VmId,
    pub name: String,
    pub hypervisor: String,
    pub zones: HashMap<Zone, ZoneUsage>,
}

#[derive(Debug, Clone, Default)]
pub struct Pod {
    pub id: PodId,
    pub name: String,
    pub namespace: String,
    pub zones: HashMap<Zone, ZoneUsage>,
}

/// Node-wide usage for a tick.
#[derive(Debug, Clone)]
pub struct Node {
    pub timestamp: SystemTime,
    pub usage_ratio: f64,
    pub zones: HashMap<Zone, ZoneUsage>,
}

/// An immutable, internally consistent view of node and workload energy at
/// a tick. Never mutated after construction; readers share it via
/// reference-counted ownership (see `monitor::PowerMonitor`).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: SystemTime,
    pub node: Node,
    pub processes: HashMap<ProcessId, Process>,
    pub containers: HashMap<ContainerId, Container>,
    pub virtual_machines: HashMap<VmId, VirtualMachine>,
    pub pods: HashMap<PodId, Pod>,
    pub terminated_processes: HashMap<ProcessId, Process>,
    pub terminated_containers: HashMap<ContainerId, Container>,
    pub terminated_virtual_machines: HashMap<VmId, VirtualMachine>,
}

impl Snapshot {
    /// An empty snapshot — used to seed the very first tick and whenever a
    /// tick must publish with reduced or no workload data (runtime errors
    /// never skip publication, per the error handling design).
    pub fn empty(timestamp: SystemTime, zones: Vec<Zone>) -> Self {
        let zones_map = zones.into_iter().map(|z| (z, ZoneUsage::default())).collect();
        Self {
            timestamp,
            node: Node {
                timestamp,
                usage_ratio: 0.0,
                zones: zones_map,
            },
            processes: HashMap::new(),
            containers: HashMap::new(),
            virtual_machines: HashMap::new(),
            pods: HashMap::new(),
            terminated_processes: HashMap::new(),
            terminated_containers: HashMap::new(),
            terminated_virtual_machines: HashMap::new(),
        }
    }

    /// Every zone referenced by any workload also appears in `node.zones` —
    /// checked by tests and debug assertions, not on the hot path.
    pub fn zone_keys_consistent(&self) -> bool {
        let node_zones: std::collections::HashSet<&Zone> = self.node.zones.keys().collect();
        let workloads_ok = self
            .processes
            .values()
            .flat_map(|p| p.zones.keys())
            .chain(self.containers.values().flat_map(|c| c.zones.keys()))
            .chain(self.virtual_machines.values().flat_map(|v| v.zones.keys()))
            .chain(self.pods.values().flat_map(|p| p.zones.keys()))
            .all(|z| node_zones.contains(z));
        workloads_ok
    }

    /// At most one of live/terminated holds a given identity (invariant 4).
    pub fn no_identity_in_both_sets(&self) -> bool {
        self.processes.keys().all(|id| !self.terminated_processes.contains_key(id))
            && self
                .containers
                .keys()
                .all(|id| !self.terminated_containers.contains_key(id))
            && self
                .virtual_machines
                .keys()
                .all(|id| !self.terminated_virtual_machines.contains_key(id))
    }
}

/// Builds the next [`Snapshot`] from the previous one's cumulative per-entity
/// totals plus this tick's attributed deltas. Holds no state of its own —
/// every method takes the accumulator maps `monitor::PowerMonitor` keeps
/// across ticks and folds this tick's [`TickAttribution`] into them in
/// place, mirroring how `delta::DeltaTracker` folds one reading into running
/// state rather than reconstructing history each time.
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Folds this tick's node-level deltas into `node_energy`.
    pub fn fold_node(node_energy: &mut HashMap<Zone, ZoneUsage>, attributed: &TickAttribution, interval: Duration) {
        for (zone, delta) in &attributed.node_zones {
            let entry = node_energy.entry(zone.clone()).or_default();
            entry.energy_total += delta.total;
            entry.active_energy_total += delta.active;
            entry.idle_energy_total += delta.idle;
            entry.power = delta.total.as_watts(interval);
            entry.active_power = delta.active.as_watts(interval);
            entry.idle_power = delta.idle.as_watts(interval);
        }
    }

    /// Folds this tick's per-process deltas into `processes`, creating new
    /// entries as needed. Returns a pid -> identity index for the caller's
    /// reap bookkeeping.
    pub fn fold_processes(
        processes: &mut HashMap<ProcessId, Process>,
        attributed: &TickAttribution,
        interval: Duration,
    ) -> HashMap<u32, ProcessId> {
        let mut pid_to_process = HashMap::with_capacity(attributed.processes.len());
        for p in &attributed.processes {
            pid_to_process.insert(p.pid, p.id.clone());
            let entry = processes.entry(p.id.clone()).or_insert_with(|| Process {
                id: p.id.clone(),
                pid: p.pid,
                comm: p.comm.clone(),
                exe: p.exe.clone(),
                cpu_total_time: Duration::ZERO,
                container_id: p.container_id.clone(),
                vm_id: p.vm_id.clone(),
                zones: HashMap::new(),
            });
            entry.cpu_total_time += p.cpu_time_delta;
            entry.container_id = p.container_id.clone();
            entry.vm_id = p.vm_id.clone();
            Self::apply_process_energy(entry, p, interval);
        }
        pid_to_process
    }

    fn apply_process_energy(entry: &mut Process, attribution: &ProcessAttribution, interval: Duration) {
        for (zone, energy) in &attribution.zones {
            let usage = entry.zones.entry(zone.clone()).or_default();
            usage.energy_total += *energy;
            usage.active_energy_total += *energy;
            usage.power = energy.as_watts(interval);
            usage.active_power = usage.power;
        }
    }

    /// Recomputes container/vm/pod rollups from scratch from the live
    /// process set's cumulative totals, rather than accumulating them
    /// independently, so a container's total always equals the sum of its
    /// current member processes even as membership changes tick to tick.
    pub fn fold_rollups(
        processes: &HashMap<ProcessId, Process>,
        container_pods: &HashMap<ContainerId, PodId>,
        containers: &mut HashMap<ContainerId, Container>,
        pods: &mut HashMap<PodId, Pod>,
        virtual_machines: &mut HashMap<VmId, VirtualMachine>,
        interval: Duration,
    ) {
        for container in containers.values_mut() {
            container.zones.clear();
        }
        for vm in virtual_machines.values_mut() {
            vm.zones.clear();
        }

        for process in processes.values() {
            if let Some(container_id) = &process.container_id {
                let container = containers.entry(container_id.clone()).or_insert_with(|| Container {
                    id: container_id.clone(),
                    name: container_id.0.clone(),
                    runtime: "unknown".to_string(),
                    pod_id: container_pods.get(container_id).cloned(),
                    zones: HashMap::new(),
                });
                if container.pod_id.is_none() {
                    container.pod_id = container_pods.get(container_id).cloned();
                }
                Self::accumulate_zones(&mut container.zones, &process.zones, interval);
            }
            if let Some(vm_id) = &process.vm_id {
                let vm = virtual_machines.entry(vm_id.clone()).or_insert_with(|| VirtualMachine {
                    id: vm_id.clone(),
                    name: vm_id.0.clone(),
                    hypervisor: "unknown".to_string(),
                    zones: HashMap::new(),
                });
                Self::accumulate_zones(&mut vm.zones, &process.zones, interval);
            }
        }

        for pod in pods.values_mut() {
            pod.zones.clear();
        }
        for container in containers.values() {
            if let Some(pod_id) = &container.pod_id {
                let pod = pods.entry(pod_id.clone()).or_insert_with(|| Pod {
                    id: pod_id.clone(),
                    name: pod_id.0.clone(),
                    namespace: String::new(),
                    zones: HashMap::new(),
                });
                Self::accumulate_zones(&mut pod.zones, &container.zones, interval);
            }
        }
    }

    fn accumulate_zones(target: &mut HashMap<Zone, ZoneUsage>, source: &HashMap<Zone, ZoneUsage>, interval: Duration) {
        for (zone, usage) in source {
            let entry = target.entry(zone.clone()).or_default();
            entry.energy_total += usage.energy_total;
            entry.active_energy_total += usage.active_energy_total;
            entry.idle_energy_total += usage.idle_energy_total;
            entry.power = entry.energy_total.as_watts(interval);
            entry.active_power = entry.active_energy_total.as_watts(interval);
        }
    }

    /// Assembles the immutable [`Snapshot`] published for this tick from the
    /// now-updated accumulator maps. Live maps are cloned (readers hold
    /// their own `Arc<Snapshot>`, independent of the monitor's internal
    /// state); terminated maps are flattened from their ring-buffer form.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        timestamp: SystemTime,
        usage_ratio: f64,
        node_energy: &HashMap<Zone, ZoneUsage>,
        processes: &HashMap<ProcessId, Process>,
        containers: &HashMap<ContainerId, Container>,
        virtual_machines: &HashMap<VmId, VirtualMachine>,
        pods: &HashMap<PodId, Pod>,
        terminated_processes: impl Iterator<Item = (ProcessId, Process)>,
        terminated_containers: impl Iterator<Item = (ContainerId, Container)>,
        terminated_virtual_machines: impl Iterator<Item = (VmId, VirtualMachine)>,
    ) -> Snapshot {
        Snapshot {
            timestamp,
            node: Node {
                timestamp,
                usage_ratio,
                zones: node_energy.clone(),
            },
            processes: processes.clone(),
            containers: containers.clone(),
            virtual_machines: virtual_machines.clone(),
            pods: pods.clone(),
            terminated_processes: terminated_processes.collect(),
            terminated_containers: terminated_containers.collect(),
            terminated_virtual_machines: terminated_virtual_machines.collect(),
        }
    }
}
