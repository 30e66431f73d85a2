//! Power Monitor (component G): the orchestrator that ties zone reading,
//! activity draining, identity resolution, attribution and snapshot
//! publication into one coherent tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::activity::{ActivityEvent, KernelSampler, StagingBuffer};
use crate::attribution;
use crate::config::Config;
use crate::error::MonitorError;
use crate::informer::{ContainerId, PodId, ResourceInformer, VmId};
use crate::snapshot::{Container, Pod, Process, ProcessId, Snapshot, SnapshotBuilder, VirtualMachine};
use crate::terminated::TerminatedSet;
use crate::units::MicroJoules;
use crate::zone::{Zone, ZoneUsage};
use crate::zones::registry::ZoneRegistry;
use crate::zones::EnergyReader;

/// Lifecycle state, exactly the four states the monitor can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Ready,
    Failed,
    Stopped,
}

impl MonitorState {
    fn to_u8(self) -> u8 {
        match self {
            MonitorState::Uninitialized => 0,
            MonitorState::Ready => 1,
            MonitorState::Failed => 2,
            MonitorState::Stopped => 3,
        }
    }
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MonitorState::Ready,
            2 => MonitorState::Failed,
            3 => MonitorState::Stopped,
            _ => MonitorState::Uninitialized,
        }
    }
}

/// Small leaky-bucket limiter so a zone stuck returning transient errors
/// every tick doesn't spam the log. Grounded on the teacher's
/// `backoff_until` map in `pool.rs`.
struct RateLimiter {
    last_logged: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
}

impl RateLimiter {
    fn new(cooldown: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    /// Returns true the first time `key` is seen and at most once per
    /// `cooldown` thereafter.
    fn allow(&self, key: &str) -> bool {
        let mut guard = self.last_logged.lock().unwrap();
        match guard.get(key) {
            Some(last) if last.elapsed() < self.cooldown => false,
            _ => {
                guard.insert(key.to_string(), Instant::now());
                true
            }
        }
    }
}

struct TickState {
    registry: ZoneRegistry,
    delta_tracker: crate::delta::DeltaTracker,
    informer: Box<dyn ResourceInformer>,
    node_energy: HashMap<Zone, ZoneUsage>,
    processes: HashMap<ProcessId, Process>,
    containers: HashMap<ContainerId, Container>,
    virtual_machines: HashMap<VmId, VirtualMachine>,
    pods: HashMap<PodId, Pod>,
    terminated_processes: TerminatedSet<ProcessId, Process>,
    terminated_containers: TerminatedSet<ContainerId, Container>,
    terminated_vms: TerminatedSet<VmId, VirtualMachine>,
}

/// Orchestrates one node's energy telemetry. Constructed once via
/// [`PowerMonitor::init`]; shared behind an `Arc` by the sampler-drain task,
/// the tick task, and every axum request handler.
pub struct PowerMonitor {
    config: Config,
    state: AtomicU8,
    ticking: AtomicBool,
    tick_count: AtomicU64,
    num_cpus: usize,
    staging: Arc<StagingBuffer>,
    sampler: Arc<dyn KernelSampler>,
    snapshot: Arc<ArcSwap<Snapshot>>,
    watch_tx: watch::Sender<()>,
    rate_limiter: RateLimiter,
    tick_state: Mutex<TickState>,
}

impl PowerMonitor {
    /// Discover zones, validate the sampler, and construct a monitor in the
    /// `Uninitialized` state with an empty published snapshot. Fatal
    /// configuration and discovery errors are returned here rather than
    /// surfacing only once the server starts.
    pub fn init(
        config: Config,
        sampler: Arc<dyn KernelSampler>,
        informer: Box<dyn ResourceInformer>,
        num_cpus: usize,
    ) -> Result<Arc<Self>, MonitorError> {
        config.validate()?;
        let registry = ZoneRegistry::discover(&config.zones)?;
        Self::init_with_registry(config, sampler, informer, num_cpus, registry)
    }

    /// Like [`PowerMonitor::init`], but with an already-constructed
    /// [`ZoneRegistry`] instead of running real host discovery. Exists for
    /// tests that need to drive a real monitor against scripted zone
    /// readers (e.g. one that fails on cue) rather than whatever hardware
    /// the test host happens to expose.
    pub fn init_with_registry(
        config: Config,
        sampler: Arc<dyn KernelSampler>,
        informer: Box<dyn ResourceInformer>,
        num_cpus: usize,
        registry: ZoneRegistry,
    ) -> Result<Arc<Self>, MonitorError> {
        config.validate()?;
        if !sampler.is_alive() {
            return Err(MonitorError::SamplerUnavailable(
                "sampler reported not alive at init".to_string(),
            ));
        }

        let zones = registry.zones();
        log::info!(
            "discovered {} zones: {}",
            zones.len(),
            zones.iter().map(Zone::label).collect::<Vec<_>>().join(", ")
        );

        let empty = Snapshot::empty(SystemTime::now(), zones);
        let (watch_tx, _rx) = watch::channel(());

        let monitor = Self {
            config,
            state: AtomicU8::new(MonitorState::Ready.to_u8()),
            ticking: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
            num_cpus: num_cpus.max(1),
            staging: Arc::new(StagingBuffer::new()),
            sampler,
            snapshot: Arc::new(ArcSwap::from_pointee(empty)),
            watch_tx,
            rate_limiter: RateLimiter::new(Duration::from_secs(30)),
            tick_state: Mutex::new(TickState {
                registry,
                delta_tracker: crate::delta::DeltaTracker::new(),
                informer,
                node_energy: HashMap::new(),
                processes: HashMap::new(),
                containers: HashMap::new(),
                virtual_machines: HashMap::new(),
                pods: HashMap::new(),
                terminated_processes: TerminatedSet::new(0, 0),
                terminated_containers: TerminatedSet::new(0, 0),
                terminated_vms: TerminatedSet::new(0, 0),
            }),
        };

        {
            let mut guard = monitor.tick_state.lock().unwrap();
            let retention = monitor.config.terminated_retention_ticks;
            let capacity = monitor.config.terminated_capacity;
            guard.terminated_processes = TerminatedSet::new(retention, capacity);
            guard.terminated_containers = TerminatedSet::new(retention, capacity);
            guard.terminated_vms = TerminatedSet::new(retention, capacity);
        }

        Ok(Arc::new(monitor))
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn staging(&self) -> Arc<StagingBuffer> {
        Arc::clone(&self.staging)
    }

    pub fn sampler(&self) -> Arc<dyn KernelSampler> {
        Arc::clone(&self.sampler)
    }

    /// Zones currently active (not demoted).
    pub fn zones(&self) -> Vec<Zone> {
        self.tick_state.lock().unwrap().registry.zones()
    }

    /// Lock-free read of the most recently published snapshot.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, MonitorError> {
        if self.tick_count.load(Ordering::Acquire) == 0 {
            return Err(MonitorError::NotReady);
        }
        Ok(self.snapshot.load_full())
    }

    /// A coalescing subscription: wakes at most once per publish, and a
    /// slow subscriber that misses intermediate publications always sees
    /// the latest snapshot rather than queueing every one.
    pub fn subscribe(&self) -> impl tokio_stream::Stream<Item = Arc<Snapshot>> + 'static {
        let rx = self.watch_tx.subscribe();
        let snapshot = Arc::clone(&self.snapshot);
        tokio_stream::wrappers::WatchStream::new(rx).map(move |_| snapshot.load_full())
    }

    /// Run one tick. Non-overlapping: if the previous tick is still
    /// running, this call logs and returns immediately rather than
    /// queueing.
    pub async fn tick(self: &Arc<Self>) {
        if self.ticking.swap(true, Ordering::AcqRel) {
            log::warn!("tick overrun: previous tick still running, skipping this tick");
            return;
        }
        let result = self.tick_inner().await;
        self.ticking.store(false, Ordering::Release);
        if let Err(e) = result {
            log::error!("tick failed: {e}");
            self.state.store(MonitorState::Failed.to_u8(), Ordering::Release);
        }
    }

    async fn tick_inner(self: &Arc<Self>) -> Result<(), MonitorError> {
        let now = SystemTime::now();
        let tick = self.tick_count.fetch_add(1, Ordering::AcqRel) + 1;
        let interval = self.config.sample_interval;

        let events = self.staging.swap_out();

        let mut guard = self.tick_state.lock().unwrap();
        guard.informer.refresh();

        let readings = guard.registry.read_all();
        let mut zone_deltas: HashMap<Zone, MicroJoules> = HashMap::with_capacity(readings.len());
        for (zone, result) in readings {
            match result {
                Ok(reading) => {
                    let delta = guard.delta_tracker.observe(&reading);
                    if delta.clock_skew && self.rate_limiter.allow(&format!("skew:{}", zone.label())) {
                        log::warn!("clock skew observed on zone {}", zone.label());
                    }
                    zone_deltas.insert(zone, delta.delta_energy);
                }
                Err(e) => {
                    if self.rate_limiter.allow(&format!("read:{}", zone.label())) {
                        log::warn!("zone {} read failed: {e}", zone.label());
                    }
                }
            }
        }

        let attributed = attribution::attribute(
            &zone_deltas,
            events,
            interval,
            self.num_cpus,
            guard.informer.as_ref(),
        );
        for miss in &attributed.identity_misses {
            if self.rate_limiter.allow("identity_miss") {
                log::debug!("{miss}");
            }
        }

        SnapshotBuilder::fold_node(&mut guard.node_energy, &attributed, interval);
        let pid_to_process: HashMap<u32, ProcessId> =
            SnapshotBuilder::fold_processes(&mut guard.processes, &attributed, interval);
        let container_pods: HashMap<ContainerId, PodId> = attributed
            .processes
            .iter()
            .filter_map(|p| Some((p.container_id.clone()?, p.pod_id.clone()?)))
            .collect();
        SnapshotBuilder::fold_rollups(
            &guard.processes,
            &container_pods,
            &mut guard.containers,
            &mut guard.pods,
            &mut guard.virtual_machines,
            interval,
        );

        let reaped = guard.informer.reap();
        for pid in reaped.terminated_pids {
            // `pid_to_process` only covers pids with activity this tick; a
            // pid reaped without a final activity event is still found by
            // scanning currently-live processes for a matching pid.
            let id = pid_to_process
                .get(&pid)
                .cloned()
                .or_else(|| guard.processes.values().find(|p| p.pid == pid).map(|p| p.id.clone()));
            if let Some(id) = id {
                if let Some(p) = guard.processes.remove(&id) {
                    guard.terminated_processes.insert(id, p, tick);
                }
            }
        }
        for id in reaped.terminated_containers {
            if let Some(c) = guard.containers.remove(&id) {
                guard.terminated_containers.insert(id, c, tick);
            }
        }
        for id in reaped.terminated_vms {
            if let Some(v) = guard.virtual_machines.remove(&id) {
                guard.terminated_vms.insert(id, v, tick);
            }
        }
        for id in reaped.terminated_pods {
            guard.pods.remove(&id);
        }

        guard.terminated_processes.advance(tick);
        guard.terminated_containers.advance(tick);
        guard.terminated_vms.advance(tick);

        let snapshot = SnapshotBuilder::assemble(
            now,
            attributed.usage_ratio,
            &guard.node_energy,
            &guard.processes,
            &guard.containers,
            &guard.virtual_machines,
            &guard.pods,
            guard.terminated_processes.iter().map(|(k, v)| (k.clone(), v.clone())),
            guard.terminated_containers.iter().map(|(k, v)| (k.clone(), v.clone())),
            guard.terminated_vms.iter().map(|(k, v)| (k.clone(), v.clone())),
        );
        drop(guard);

        self.snapshot.store(Arc::new(snapshot));
        let _ = self.watch_tx.send(());
        Ok(())
    }

    /// Periodic tick loop. Runs until `cancel` fires; logs and continues on
    /// a single tick's internal error rather than exiting the process,
    /// since initialization errors were already handled by `init`.
    pub async fn run_tick_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state.store(MonitorState::Stopped.to_u8(), Ordering::Release);
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Sampler drain loop: pulls every immediately-available event into the
    /// staging buffer on a short poll interval between ticks.
    pub async fn run_sampler_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut poll = tokio::time::interval(Duration::from_millis(50));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = poll.tick() => {
                    crate::activity::drain_available(self.sampler.as_ref(), &self.staging);
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.state.store(MonitorState::Stopped.to_u8(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::informer::{ProcessInfo, ReapedEntities};
    use crate::zone::ZoneKind;
    use crate::zones::EnergyReader;
    use std::sync::atomic::AtomicU64 as TestAtomicU64;

    struct OneShotReader {
        zone: Zone,
        value: TestAtomicU64,
    }
    impl EnergyReader for OneShotReader {
        fn zone(&self) -> &Zone {
            &self.zone
        }
        fn read(&self) -> Result<crate::zone::ZoneReading, crate::error::ZoneError> {
            let v = self.value.fetch_add(1_000_000, Ordering::SeqCst);
            Ok(crate::zone::ZoneReading {
                zone: self.zone.clone(),
                raw_counter: v,
                read_at: Instant::now(),
            })
        }
    }

    struct NoopSampler;
    impl KernelSampler for NoopSampler {
        fn try_recv(&self) -> Option<ActivityEvent> {
            None
        }
        fn is_alive(&self) -> bool {
            true
        }
    }

    struct EmptyInformer;
    impl ResourceInformer for EmptyInformer {
        fn refresh(&mut self) {}
        fn process(&self, pid: u32) -> Option<ProcessInfo> {
            Some(ProcessInfo {
                pid,
                comm: "proc".to_string(),
                exe: "/bin/proc".to_string(),
                started_at_unix_nanos: 1,
            })
        }
        fn container_of(&self, _pid: u32) -> Option<ContainerId> {
            None
        }
        fn pod_of(&self, _c: &ContainerId) -> Option<PodId> {
            None
        }
        fn vm_of(&self, _pid: u32) -> Option<VmId> {
            None
        }
        fn reap(&mut self) -> ReapedEntities {
            Default::default()
        }
    }

    fn zone() -> Zone {
        Zone {
            name: "package".to_string(),
            index: 0,
            path: "/test".to_string(),
            max_microjoules: u64::MAX,
            kind: ZoneKind::Package,
        }
    }

    #[tokio::test]
    async fn snapshot_not_ready_before_first_tick() {
        // `init` requires real discovery; exercise the NotReady contract
        // directly against a manually published monitor-state stand-in
        // instead of the full discovery path (covered by `zones::registry`
        // tests already).
        let (tx, _rx) = watch::channel(());
        let monitor = PowerMonitor {
            config: Config::default(),
            state: AtomicU8::new(MonitorState::Ready.to_u8()),
            ticking: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
            num_cpus: 1,
            staging: Arc::new(StagingBuffer::new()),
            sampler: Arc::new(NoopSampler),
            snapshot: Arc::new(ArcSwap::from_pointee(Snapshot::empty(SystemTime::now(), vec![]))),
            watch_tx: tx,
            rate_limiter: RateLimiter::new(Duration::from_secs(30)),
            tick_state: Mutex::new(TickState {
                registry: ZoneRegistry::new(vec![Box::new(OneShotReader {
                    zone: zone(),
                    value: TestAtomicU64::new(0),
                })]),
                delta_tracker: crate::delta::DeltaTracker::new(),
                informer: Box::new(EmptyInformer),
                node_energy: HashMap::new(),
                processes: HashMap::new(),
                containers: HashMap::new(),
                virtual_machines: HashMap::new(),
                pods: HashMap::new(),
                terminated_processes: TerminatedSet::new(5, 10),
                terminated_containers: TerminatedSet::new(5, 10),
                terminated_vms: TerminatedSet::new(5, 10),
            }),
        };
        assert!(matches!(monitor.snapshot(), Err(MonitorError::NotReady)));

        let monitor = Arc::new(monitor);
        monitor.tick().await;
        assert!(monitor.snapshot().is_ok());
    }

    #[tokio::test]
    async fn non_overlapping_tick_skips_when_busy() {
        let monitor = Arc::new(PowerMonitor {
            config: Config::default(),
            state: AtomicU8::new(MonitorState::Ready.to_u8()),
            ticking: AtomicBool::new(true),
            tick_count: AtomicU64::new(0),
            num_cpus: 1,
            staging: Arc::new(StagingBuffer::new()),
            sampler: Arc::new(NoopSampler),
            snapshot: Arc::new(ArcSwap::from_pointee(Snapshot::empty(SystemTime::now(), vec![]))),
            watch_tx: watch::channel(()).0,
            rate_limiter: RateLimiter::new(Duration::from_secs(30)),
            tick_state: Mutex::new(TickState {
                registry: ZoneRegistry::new(vec![]),
                delta_tracker: crate::delta::DeltaTracker::new(),
                informer: Box::new(EmptyInformer),
                node_energy: HashMap::new(),
                processes: HashMap::new(),
                containers: HashMap::new(),
                virtual_machines: HashMap::new(),
                pods: HashMap::new(),
                terminated_processes: TerminatedSet::new(5, 10),
                terminated_containers: TerminatedSet::new(5, 10),
                terminated_vms: TerminatedSet::new(5, 10),
            }),
        });
        monitor.tick().await;
        assert_eq!(monitor.tick_count.load(Ordering::SeqCst), 0, "skipped tick must not advance the counter");
    }
}
