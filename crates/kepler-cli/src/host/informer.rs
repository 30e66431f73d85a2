//! Procfs-backed [`ResourceInformer`]: process, container and pod identity
//! from `/proc`. VM identity is left unresolved (`vm_of` always returns
//! `None`) — discovering the hypervisor relationship from inside a guest
//! is host-specific and out of scope; a real deployment supplies its own
//! informer for that environment.

use std::collections::{HashMap, HashSet};
use std::fs;

use kepler_core::informer::{ContainerId, PodId, ProcessInfo, ReapedEntities, ResourceInformer, VmId};

#[derive(Clone)]
struct Known {
    info: ProcessInfo,
    container_id: Option<ContainerId>,
}

pub struct ProcfsInformer {
    known: HashMap<u32, Known>,
    pods_by_container: HashMap<ContainerId, PodId>,
    pending_reap: ReapedEntities,
}

impl ProcfsInformer {
    pub fn new() -> Self {
        Self {
            known: HashMap::new(),
            pods_by_container: HashMap::new(),
            pending_reap: ReapedEntities::default(),
        }
    }

    fn read_comm(pid: u32) -> Option<String> {
        fs::read_to_string(format!("/proc/{pid}/comm")).ok().map(|s| s.trim().to_string())
    }

    fn read_exe(pid: u32) -> String {
        fs::read_link(format!("/proc/{pid}/exe"))
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Process start time in clock ticks since boot, from field 22 of
    /// `/proc/<pid>/stat`. Converted to a pseudo-nanosecond value (ticks
    /// are a perfectly good disambiguator for pid reuse even unconverted,
    /// but nanoseconds match the rest of the identity scheme).
    fn read_start_ticks(pid: u32) -> Option<u64> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        // comm can contain spaces/parens; the last ')' marks its end.
        let after_comm = stat.rsplit_once(')')?.1;
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        // Field 22 overall is field index 19 counting from the one after comm's ')'.
        fields.get(19).and_then(|s| s.parse::<u64>().ok())
    }

    /// Best-effort container id extraction from a cgroup path, recognizing
    /// the common docker/cri-containerd/kubepods layouts.
    fn read_container_and_pod(pid: u32) -> (Option<ContainerId>, Option<PodId>) {
        let Ok(cgroup) = fs::read_to_string(format!("/proc/{pid}/cgroup")) else {
            return (None, None);
        };
        for line in cgroup.lines() {
            let path = line.rsplit(':').next().unwrap_or("");
            let container_id = path
                .rsplit('/')
                .next()
                .filter(|seg| seg.len() >= 12 && seg.chars().all(|c| c.is_ascii_hexdigit()))
                .map(|seg| ContainerId(seg.to_string()));
            let pod_id = path
                .split('/')
                .find(|seg| seg.starts_with("pod"))
                .map(|seg| PodId(seg.trim_start_matches("pod").to_string()));
            if container_id.is_some() {
                return (container_id, pod_id);
            }
        }
        (None, None)
    }
}

impl Default for ProcfsInformer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceInformer for ProcfsInformer {
    fn refresh(&mut self) {
        let mut seen = HashSet::new();
        let Ok(entries) = fs::read_dir("/proc") else {
            return;
        };

        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            seen.insert(pid);
            if self.known.contains_key(&pid) {
                continue;
            }
            let Some(comm) = Self::read_comm(pid) else {
                continue;
            };
            let Some(start_ticks) = Self::read_start_ticks(pid) else {
                continue;
            };
            let (container_id, pod_id) = Self::read_container_and_pod(pid);
            if let (Some(c), Some(p)) = (&container_id, pod_id) {
                self.pods_by_container.insert(c.clone(), p);
            }
            self.known.insert(
                pid,
                Known {
                    info: ProcessInfo {
                        pid,
                        comm,
                        exe: Self::read_exe(pid),
                        started_at_unix_nanos: start_ticks,
                    },
                    container_id,
                },
            );
        }

        let gone: Vec<u32> = self.known.keys().copied().filter(|pid| !seen.contains(pid)).collect();
        for pid in gone {
            if let Some(known) = self.known.remove(&pid) {
                self.pending_reap.terminated_pids.push(pid);
                if let Some(container_id) = known.container_id {
                    let still_referenced = self.known.values().any(|k| k.container_id.as_ref() == Some(&container_id));
                    if !still_referenced {
                        self.pending_reap.terminated_containers.push(container_id);
                    }
                }
            }
        }
    }

    fn process(&self, pid: u32) -> Option<ProcessInfo> {
        self.known.get(&pid).map(|k| k.info.clone())
    }

    fn container_of(&self, pid: u32) -> Option<ContainerId> {
        self.known.get(&pid).and_then(|k| k.container_id.clone())
    }

    fn pod_of(&self, container: &ContainerId) -> Option<PodId> {
        self.pods_by_container.get(container).cloned()
    }

    fn vm_of(&self, _pid: u32) -> Option<VmId> {
        None
    }

    fn reap(&mut self) -> ReapedEntities {
        std::mem::take(&mut self.pending_reap)
    }
}
