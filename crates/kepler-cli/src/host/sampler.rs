//! Procfs-backed [`KernelSampler`].
//!
//! eBPF loading is out of scope for this agent (it's a supplied
//! capability, not something the core implements); this sampler derives
//! approximately the same signal — per-process CPU time deltas — by
//! polling `/proc/<pid>/stat` on a background thread. It reports zero
//! deltas for everything else a real eBPF collector would carry
//! (instruction/cycle counts, cache events, IRQ attribution), which is
//! consistent with those fields being optional refinements in the
//! activity event, not load-bearing ones.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kepler_core::activity::{ActivityEvent, KernelSampler};

pub struct ProcfsSampler {
    queue: Mutex<VecDeque<ActivityEvent>>,
    alive: AtomicBool,
}

impl ProcfsSampler {
    /// Spawn the polling thread and return a handle implementing
    /// [`KernelSampler`]. `poll_interval` should be a fraction of the
    /// monitor's tick interval so events accumulate between ticks rather
    /// than arriving in one lump.
    pub fn spawn(poll_interval: Duration) -> Arc<Self> {
        let sampler = Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            alive: AtomicBool::new(true),
        });
        let worker = Arc::clone(&sampler);
        std::thread::spawn(move || worker.run(poll_interval));
        sampler
    }

    fn run(self: Arc<Self>, poll_interval: Duration) {
        let ticks_per_sec = Self::clock_ticks_per_sec();
        let mut previous: HashMap<u32, u64> = HashMap::new();
        loop {
            if !self.alive.load(Ordering::Acquire) {
                return;
            }
            let mut current = HashMap::new();
            if let Ok(entries) = fs::read_dir("/proc") {
                for entry in entries.flatten() {
                    let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                        continue;
                    };
                    let Some(ticks) = Self::read_total_ticks(pid) else {
                        continue;
                    };
                    current.insert(pid, ticks);
                    if let Some(&prev) = previous.get(&pid) {
                        let delta_ticks = ticks.saturating_sub(prev);
                        if delta_ticks > 0 {
                            let delta_cpu_time_us = delta_ticks * 1_000_000 / ticks_per_sec.max(1);
                            self.queue.lock().unwrap().push_back(ActivityEvent {
                                pid,
                                tgid: pid,
                                delta_cpu_time_us,
                                timestamp: Some(std::time::Instant::now()),
                                ..Default::default()
                            });
                        }
                    }
                }
            }
            previous = current;
            std::thread::sleep(poll_interval);
        }
    }

    fn read_total_ticks(pid: u32) -> Option<u64> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let after_comm = stat.rsplit_once(')')?.1;
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        // utime (field 14) and stime (field 15) are indices 11 and 12 here.
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        Some(utime + stime)
    }

    #[cfg(unix)]
    fn clock_ticks_per_sec() -> u64 {
        let raw = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if raw > 0 { raw as u64 } else { 100 }
    }

    #[cfg(not(unix))]
    fn clock_ticks_per_sec() -> u64 {
        100
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl KernelSampler for ProcfsSampler {
    fn try_recv(&self) -> Option<ActivityEvent> {
        self.queue.lock().unwrap().pop_front()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}
