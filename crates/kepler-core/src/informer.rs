//! Resource Informer interface (component C): PID → process/container/pod/vm
//! identity, refreshed once per tick.

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId(pub String);

/// Descriptive process identity as discovered from the host process table.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub comm: String,
    pub exe: String,
    /// Wall-clock process start time, used to disambiguate a reused pid
    /// from the entity that previously held it (see `terminated`).
    pub started_at_unix_nanos: u64,
}

/// Every workload kind the informer can be asked about reap produces.
#[derive(Debug, Clone, Default)]
pub struct ReapedEntities {
    pub terminated_pids: Vec<u32>,
    pub terminated_containers: Vec<ContainerId>,
    pub terminated_pods: Vec<PodId>,
    pub terminated_vms: Vec<VmId>,
}

/// Consumed interface over the host process table, container runtime and
/// orchestrator. The core never reads `/proc` or talks to a container
/// runtime directly; all of that lives behind this trait.
pub trait ResourceInformer: Send + Sync {
    /// Re-read host state. Called once at the start of each tick, before
    /// identity lookups for that tick's activity events.
    fn refresh(&mut self);

    fn process(&self, pid: u32) -> Option<ProcessInfo>;
    fn container_of(&self, pid: u32) -> Option<ContainerId>;
    fn pod_of(&self, container: &ContainerId) -> Option<PodId>;
    fn vm_of(&self, pid: u32) -> Option<VmId>;

    /// Entities observed gone since the last call. Returned (and consumed)
    /// at most once per tick.
    fn reap(&mut self) -> ReapedEntities;
}
