//! CLI for kepler — per-node energy and power telemetry.

mod config_loader;
mod host;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kepler_core::PowerMonitor;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "kepler")]
#[command(about = "Per-node energy and power telemetry agent")]
#[command(version = kepler_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the telemetry agent and Prometheus exporter
    Serve(ServeArgs),

    /// Load a config file (or the built-in default) and report whether it validates
    ValidateConfig {
        /// Path to a TOML config file
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
}

#[derive(clap::Args, Clone, Debug)]
struct ServeArgs {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Address to bind the metrics server to, e.g. 0.0.0.0:9300
    #[arg(long, env = "KEPLER_BIND_ADDR")]
    bind_addr: Option<String>,

    /// HTTP path the Prometheus exposition is served on
    #[arg(long, env = "KEPLER_METRICS_PATH")]
    metrics_path: Option<String>,

    /// Sampling/tick interval in seconds
    #[arg(long, env = "KEPLER_SAMPLE_INTERVAL_SECS")]
    sample_interval_secs: Option<f64>,

    /// Metrics granularity: "node", "process", "container", "vm", "pod", or "all"
    #[arg(long, env = "KEPLER_GRANULARITY")]
    granularity: Option<String>,

    /// Node name label attached to exported metrics; defaults to the hostname
    #[arg(long, env = "KEPLER_NODE_NAME")]
    node_name: Option<String>,

    /// Enable the GPU zone even if the platform toggle defaults it off
    #[arg(long)]
    enable_gpu: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Serve(args) => run_serve(args),
        Commands::ValidateConfig { config } => run_validate_config(config),
    };
    std::process::exit(exit_code);
}

fn run_validate_config(config_path: Option<std::path::PathBuf>) -> i32 {
    let args = ServeArgs {
        config: config_path,
        bind_addr: None,
        metrics_path: None,
        sample_interval_secs: None,
        granularity: None,
        node_name: None,
        enable_gpu: false,
    };
    match config_loader::load(&args) {
        Ok(config) => {
            println!("config is valid:");
            println!("  bind_addr: {}", config.bind_addr);
            println!("  metrics_path: {}", config.metrics_path);
            println!("  sample_interval: {:?}", config.sample_interval);
            0
        }
        Err(e) => {
            eprintln!("invalid config: {e}");
            1
        }
    }
}

fn run_serve(args: ServeArgs) -> i32 {
    let config = match config_loader::load(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load config: {e}");
            return 1;
        }
    };

    let node_name = config
        .node_name
        .clone()
        .or_else(hostname)
        .unwrap_or_else(|| "unknown".to_string());

    let num_cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start async runtime: {e}");
            return 1;
        }
    };

    runtime.block_on(async_main(config, node_name, num_cpus))
}

async fn async_main(config: kepler_core::Config, node_name: String, num_cpus: usize) -> i32 {
    let poll_interval = (config.sample_interval / 10).max(std::time::Duration::from_millis(50));
    let sampler = host::sampler::ProcfsSampler::spawn(poll_interval);
    let informer = Box::new(host::informer::ProcfsInformer::new());

    let monitor = match PowerMonitor::init(config, sampler.clone(), informer, num_cpus) {
        Ok(monitor) => monitor,
        Err(e) => {
            log::error!("failed to initialize power monitor: {e}");
            return 1;
        }
    };

    log::info!("kepler {} starting on node {node_name}", kepler_core::VERSION);
    let zones = monitor.zones();
    let zone_labels = zones.iter().map(|z| z.label()).collect::<Vec<_>>().join(", ");
    log::info!(
        "discovered {} zones ({zone_labels}); granularity={:?}",
        zones.len(),
        monitor.config().granularity,
    );

    let cancel = CancellationToken::new();
    let tick_handle = tokio::spawn(Arc::clone(&monitor).run_tick_loop(cancel.clone()));
    let sampler_drain_handle = tokio::spawn(Arc::clone(&monitor).run_sampler_loop(cancel.clone()));

    let server_cancel = cancel.clone();
    let server_monitor = Arc::clone(&monitor);
    let server_handle = tokio::spawn(async move {
        tokio::select! {
            result = kepler_server::run_server(server_monitor, node_name) => {
                if let Err(e) = result {
                    log::error!("metrics server error: {e}");
                }
            }
            _ = server_cancel.cancelled() => {}
        }
    });

    if tokio::signal::ctrl_c().await.is_err() {
        log::warn!("failed to install ctrl-c handler, shutting down immediately");
    } else {
        log::info!("shutdown signal received, stopping");
    }

    cancel.cancel();
    monitor.shutdown();
    sampler.stop();

    let _ = tokio::join!(tick_handle, sampler_drain_handle, server_handle);
    0
}

fn hostname() -> Option<String> {
    std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_string())
}
