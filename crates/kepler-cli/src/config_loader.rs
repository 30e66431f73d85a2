//! Layers CLI flags over an optional config file and environment
//! variables into a [`kepler_core::Config`].
//!
//! Precedence, highest first: CLI flag > config file > built-in default.
//! Environment variable overrides are handled by clap's `env` attribute on
//! the flags themselves, so they sit at the same precedence as the flag
//! they back.

use std::net::SocketAddr;
use std::path::Path;

use kepler_core::Config;
use kepler_core::config::MetricsGranularity;

use crate::ServeArgs;

pub fn load(args: &ServeArgs) -> Result<Config, String> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };

    if let Some(bind_addr) = &args.bind_addr {
        config.bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| format!("invalid --bind-addr {bind_addr:?}: {e}"))?;
    }
    if let Some(path) = &args.metrics_path {
        config.metrics_path = path.clone();
    }
    if let Some(secs) = args.sample_interval_secs {
        config.sample_interval = std::time::Duration::from_secs_f64(secs);
    }
    if let Some(granularity) = &args.granularity {
        config.granularity = match granularity.as_str() {
            "node" => MetricsGranularity::Node,
            "process" => MetricsGranularity::Process,
            "container" => MetricsGranularity::Container,
            "vm" => MetricsGranularity::Vm,
            "pod" => MetricsGranularity::Pod,
            "all" => MetricsGranularity::All,
            other => return Err(format!("unknown --granularity {other:?}")),
        };
    }
    if let Some(node_name) = &args.node_name {
        config.node_name = Some(node_name.clone());
    }
    if args.enable_gpu {
        config.zones.gpu = true;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("reading {path:?}: {e}"))?;
    toml::from_str(&text).map_err(|e| format!("parsing {path:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_default() {
        let args = ServeArgs {
            config: None,
            bind_addr: None,
            metrics_path: None,
            sample_interval_secs: None,
            granularity: None,
            node_name: None,
            enable_gpu: false,
        };
        let config = load(&args).expect("default config must validate");
        assert_eq!(config.bind_addr, Config::default().bind_addr);
    }

    #[test]
    fn cli_flag_overrides_default_bind_addr() {
        let args = ServeArgs {
            config: None,
            bind_addr: Some("127.0.0.1:9999".to_string()),
            metrics_path: None,
            sample_interval_secs: None,
            granularity: None,
            node_name: None,
            enable_gpu: false,
        };
        let config = load(&args).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9999".parse().unwrap());
    }

    #[test]
    fn invalid_granularity_is_rejected() {
        let args = ServeArgs {
            config: None,
            bind_addr: None,
            metrics_path: None,
            sample_interval_secs: None,
            granularity: Some("extreme".to_string()),
            node_name: None,
            enable_gpu: false,
        };
        assert!(load(&args).is_err());
    }
}
