//! Prometheus text exposition rendering.
//!
//! Hand-rolled rather than pulled from an external `prometheus` crate: the
//! format is small and fixed, and a dependency buys nothing over writing
//! the dozen or so lines directly, in the spirit of the core's own
//! `mod hex` style for pocket-sized encodings.

use std::fmt::Write as _;

use kepler_core::config::MetricsGranularity;
use kepler_core::{Config, Process, Snapshot, Zone};

const BUILD_INFO_HELP: &str = "kepler_build_info Build information about the running agent.";

/// Render a full scrape body for `snapshot` under `node_name`. Families are
/// cumulative per [`MetricsGranularity`]'s ordering: each level also emits
/// everything the level below it emits.
pub fn render(snapshot: &Snapshot, node_name: &str, config: &Config) -> String {
    let mut out = String::with_capacity(4096);
    let granularity = config.granularity;

    render_node(&mut out, snapshot, node_name);
    if granularity.at_least(MetricsGranularity::Process) {
        render_processes(&mut out, snapshot, node_name);
    }
    if granularity.at_least(MetricsGranularity::Container) {
        render_containers(&mut out, snapshot, node_name);
    }
    if granularity.at_least(MetricsGranularity::Vm) {
        render_vms(&mut out, snapshot, node_name);
    }
    if granularity.at_least(MetricsGranularity::Pod) {
        render_pods(&mut out, snapshot, node_name);
    }
    if granularity.at_least(MetricsGranularity::All) {
        render_platform(&mut out, snapshot, node_name);
    }
    render_build_info(&mut out, node_name);

    out
}

/// `type` label per spec.md §6: a process is classified by which rollup it
/// belongs to, bare `"process"` when it belongs to neither.
fn process_type(p: &Process) -> &'static str {
    if p.container_id.is_some() {
        "container"
    } else if p.vm_id.is_some() {
        "vm"
    } else {
        "process"
    }
}

fn zone_label(zone: &Zone) -> String {
    zone.label()
}

fn push_metric(out: &mut String, name: &str, help: &str, metric_type: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {metric_type}");
}

fn render_node(out: &mut String, snapshot: &Snapshot, node: &str) {
    push_metric(out, "kepler_node_cpu_joules_total", "Cumulative node energy in joules.", "counter");
    push_metric(out, "kepler_node_cpu_active_joules_total", "Cumulative node active energy in joules.", "counter");
    push_metric(out, "kepler_node_cpu_idle_joules_total", "Cumulative node idle energy in joules.", "counter");
    push_metric(out, "kepler_node_cpu_watts", "Instantaneous node power in watts.", "gauge");
    push_metric(out, "kepler_node_cpu_active_watts", "Instantaneous node active power in watts.", "gauge");
    push_metric(out, "kepler_node_cpu_idle_watts", "Instantaneous node idle power in watts.", "gauge");

    for (zone, usage) in &snapshot.node.zones {
        let label = zone_label(zone);
        let _ = writeln!(
            out,
            "kepler_node_cpu_joules_total{{node=\"{node}\",zone=\"{label}\"}} {}",
            usage.energy_total.as_joules().0
        );
        let _ = writeln!(
            out,
            "kepler_node_cpu_active_joules_total{{node=\"{node}\",zone=\"{label}\"}} {}",
            usage.active_energy_total.as_joules().0
        );
        let _ = writeln!(
            out,
            "kepler_node_cpu_idle_joules_total{{node=\"{node}\",zone=\"{label}\"}} {}",
            usage.idle_energy_total.as_joules().0
        );
        let _ = writeln!(out, "kepler_node_cpu_watts{{node=\"{node}\",zone=\"{label}\"}} {}", usage.power.0);
        let _ = writeln!(
            out,
            "kepler_node_cpu_active_watts{{node=\"{node}\",zone=\"{label}\"}} {}",
            usage.active_power.0
        );
        let _ = writeln!(
            out,
            "kepler_node_cpu_idle_watts{{node=\"{node}\",zone=\"{label}\"}} {}",
            usage.idle_power.0
        );
    }

    push_metric(out, "kepler_node_cpu_usage_ratio", "Fraction of node CPU capacity busy this tick.", "gauge");
    let _ = writeln!(out, "kepler_node_cpu_usage_ratio{{node=\"{node}\"}} {}", snapshot.node.usage_ratio);
}

fn render_processes(out: &mut String, snapshot: &Snapshot, node: &str) {
    push_metric(out, "kepler_process_cpu_joules_total", "Cumulative process energy in joules.", "counter");
    push_metric(out, "kepler_process_cpu_watts", "Instantaneous process power in watts.", "gauge");
    push_metric(out, "kepler_process_cpu_seconds_total", "Cumulative process CPU time in seconds.", "counter");

    let live = snapshot.processes.values().map(|p| (p, "running"));
    let terminated = snapshot.terminated_processes.values().map(|p| (p, "terminated"));
    for (process, state) in live.chain(terminated) {
        let container_id = process.container_id.as_ref().map(|id| id.0.as_str()).unwrap_or("");
        let vm_id = process.vm_id.as_ref().map(|id| id.0.as_str()).unwrap_or("");
        let kind = process_type(process);
        for (zone, usage) in &process.zones {
            let label = zone_label(zone);
            let _ = writeln!(
                out,
                "kepler_process_cpu_joules_total{{node=\"{node}\",pid=\"{}\",comm=\"{}\",exe=\"{}\",type=\"{kind}\",container_id=\"{container_id}\",vm_id=\"{vm_id}\",state=\"{state}\",zone=\"{label}\"}} {}",
                process.pid,
                process.comm,
                process.exe,
                usage.energy_total.as_joules().0
            );
            let _ = writeln!(
                out,
                "kepler_process_cpu_watts{{node=\"{node}\",pid=\"{}\",comm=\"{}\",exe=\"{}\",type=\"{kind}\",container_id=\"{container_id}\",vm_id=\"{vm_id}\",state=\"{state}\",zone=\"{label}\"}} {}",
                process.pid,
                process.comm,
                process.exe,
                usage.power.0
            );
        }
        let _ = writeln!(
            out,
            "kepler_process_cpu_seconds_total{{node=\"{node}\",pid=\"{}\",comm=\"{}\",exe=\"{}\",type=\"{kind}\",container_id=\"{container_id}\",vm_id=\"{vm_id}\",state=\"{state}\"}} {}",
            process.pid,
            process.comm,
            process.exe,
            process.cpu_total_time.as_secs_f64()
        );
    }
}

fn render_containers(out: &mut String, snapshot: &Snapshot, node: &str) {
    push_metric(out, "kepler_container_cpu_joules_total", "Cumulative container energy in joules.", "counter");
    push_metric(out, "kepler_container_cpu_watts", "Instantaneous container power in watts.", "gauge");

    let live = snapshot.containers.values().map(|c| (c, "running"));
    let terminated = snapshot.terminated_containers.values().map(|c| (c, "terminated"));
    for (container, state) in live.chain(terminated) {
        for (zone, usage) in &container.zones {
            let label = zone_label(zone);
            let _ = writeln!(
                out,
                "kepler_container_cpu_joules_total{{node=\"{node}\",container_id=\"{}\",container_name=\"{}\",runtime=\"{}\",state=\"{state}\",zone=\"{label}\"}} {}",
                container.id.0,
                container.name,
                container.runtime,
                usage.energy_total.as_joules().0
            );
            let _ = writeln!(
                out,
                "kepler_container_cpu_watts{{node=\"{node}\",container_id=\"{}\",container_name=\"{}\",runtime=\"{}\",state=\"{state}\",zone=\"{label}\"}} {}",
                container.id.0,
                container.name,
                container.runtime,
                usage.power.0
            );
        }
    }
}

fn render_vms(out: &mut String, snapshot: &Snapshot, node: &str) {
    push_metric(out, "kepler_vm_cpu_joules_total", "Cumulative virtual machine energy in joules.", "counter");
    push_metric(out, "kepler_vm_cpu_watts", "Instantaneous virtual machine power in watts.", "gauge");

    let live = snapshot.virtual_machines.values().map(|v| (v, "running"));
    let terminated = snapshot.terminated_virtual_machines.values().map(|v| (v, "terminated"));
    for (vm, state) in live.chain(terminated) {
        for (zone, usage) in &vm.zones {
            let label = zone_label(zone);
            let _ = writeln!(
                out,
                "kepler_vm_cpu_joules_total{{node=\"{node}\",vm_id=\"{}\",vm_name=\"{}\",hypervisor=\"{}\",state=\"{state}\",zone=\"{label}\"}} {}",
                vm.id.0,
                vm.name,
                vm.hypervisor,
                usage.energy_total.as_joules().0
            );
            let _ = writeln!(
                out,
                "kepler_vm_cpu_watts{{node=\"{node}\",vm_id=\"{}\",vm_name=\"{}\",hypervisor=\"{}\",state=\"{state}\",zone=\"{label}\"}} {}",
                vm.id.0,
                vm.name,
                vm.hypervisor,
                usage.power.0
            );
        }
    }
}

fn render_pods(out: &mut String, snapshot: &Snapshot, node: &str) {
    push_metric(out, "kepler_pod_cpu_joules_total", "Cumulative pod energy in joules.", "counter");
    push_metric(out, "kepler_pod_cpu_watts", "Instantaneous pod power in watts.", "gauge");

    for pod in snapshot.pods.values() {
        for (zone, usage) in &pod.zones {
            let label = zone_label(zone);
            let _ = writeln!(
                out,
                "kepler_pod_cpu_joules_total{{node=\"{node}\",pod_id=\"{}\",pod_name=\"{}\",pod_namespace=\"{}\",zone=\"{label}\"}} {}",
                pod.id.0,
                pod.name,
                pod.namespace,
                usage.energy_total.as_joules().0
            );
            let _ = writeln!(
                out,
                "kepler_pod_cpu_watts{{node=\"{node}\",pod_id=\"{}\",pod_name=\"{}\",pod_namespace=\"{}\",zone=\"{label}\"}} {}",
                pod.id.0,
                pod.name,
                pod.namespace,
                usage.power.0
            );
        }
    }
}

/// `platform_watts`: instantaneous power for platform-level (BMC/chassis)
/// zones, which sit outside the CPU/DRAM package hierarchy entirely and so
/// carry their own label set rather than `zone`.
fn render_platform(out: &mut String, snapshot: &Snapshot, node: &str) {
    push_metric(out, "kepler_platform_watts", "Instantaneous platform power in watts, e.g. from a BMC.", "gauge");

    for (zone, usage) in &snapshot.node.zones {
        if zone.kind != kepler_core::zone::ZoneKind::Platform {
            continue;
        }
        let _ = writeln!(
            out,
            "kepler_platform_watts{{node=\"{node}\",source=\"bmc\",bmc_id=\"{}\",chassis_id=\"{node}\",power_control_id=\"{}\",power_control_name=\"{}\"}} {}",
            zone.label(),
            zone.index,
            zone.name,
            usage.power.0
        );
    }
}

fn render_build_info(out: &mut String, node: &str) {
    let _ = writeln!(out, "# HELP kepler_build_info {}", BUILD_INFO_HELP.trim_start_matches("kepler_build_info "));
    let _ = writeln!(out, "# TYPE kepler_build_info gauge");
    let _ = writeln!(
        out,
        "kepler_build_info{{node=\"{node}\",version=\"{}\",arch=\"{}\"}} 1",
        kepler_core::VERSION,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use kepler_core::config::Config;
    use std::time::SystemTime;

    #[test]
    fn renders_well_formed_exposition_lines() {
        let snapshot = Snapshot::empty(SystemTime::now(), vec![]);
        let text = render(&snapshot, "test-node", &Config::default());
        assert!(text.contains("# HELP kepler_node_cpu_joules_total"));
        assert!(text.contains("# TYPE kepler_node_cpu_joules_total counter"));
        assert!(text.contains("kepler_build_info{"));
        for line in text.lines() {
            assert!(line.starts_with('#') || line.contains(' '), "malformed line: {line}");
        }
    }

    #[test]
    fn node_granularity_omits_processes_entirely() {
        use kepler_core::Process;
        use std::collections::HashMap;

        let mut snapshot = Snapshot::empty(SystemTime::now(), vec![]);
        snapshot.terminated_processes.insert(
            kepler_core::ProcessId::new(1, 0),
            Process {
                id: kepler_core::ProcessId::new(1, 0),
                pid: 1,
                comm: "gone".to_string(),
                exe: String::new(),
                cpu_total_time: std::time::Duration::ZERO,
                container_id: None,
                vm_id: None,
                zones: HashMap::new(),
            },
        );
        let mut config = Config::default();
        config.granularity = MetricsGranularity::Node;
        let text = render(&snapshot, "n", &config);
        assert!(!text.contains("pid=\"1\""));
    }

    #[test]
    fn terminated_process_carries_state_label() {
        use kepler_core::Process;
        use std::collections::HashMap;

        let mut snapshot = Snapshot::empty(SystemTime::now(), vec![]);
        snapshot.terminated_processes.insert(
            kepler_core::ProcessId::new(1, 0),
            Process {
                id: kepler_core::ProcessId::new(1, 0),
                pid: 1,
                comm: "gone".to_string(),
                exe: String::new(),
                cpu_total_time: std::time::Duration::ZERO,
                container_id: None,
                vm_id: None,
                zones: HashMap::new(),
            },
        );
        let mut config = Config::default();
        config.granularity = MetricsGranularity::Process;
        let text = render(&snapshot, "n", &config);
        assert!(text.contains("pid=\"1\""));
        assert!(text.contains("state=\"terminated\""));
    }
}
