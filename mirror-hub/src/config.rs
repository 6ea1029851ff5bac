use clap::Parser;
use mirror_hub_core::EngineConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "mirror-hub")]
#[command(about = "Local-first mirror of a remote document tree with live subscriptions")]
pub struct ServiceConfig {
    /// Listen address
    #[arg(short, long, env = "MIRROR_HUB_ADDR", default_value = "127.0.0.1:3000")]
    pub addr: SocketAddr,

    /// Directory holding one file per mirror
    #[arg(short, long, env = "MIRROR_HUB_DATA", default_value = "data/mirrors")]
    pub data_dir: PathBuf,

    /// Base URL of the remote store; runs offline when unset
    #[arg(short, long, env = "MIRROR_HUB_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Background sync period in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub sweep_interval_ms: u64,

    /// Timeout for any single remote call in milliseconds
    #[arg(long, default_value_t = 3_000)]
    pub remote_timeout_ms: u64,

    /// Skip the startup pull from the remote store
    #[arg(long)]
    pub no_initial_pull: bool,
}

impl ServiceConfig {
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            sweep_interval_ms: self.sweep_interval_ms,
            remote_timeout_ms: self.remote_timeout_ms,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_over_defaults() {
        let config = ServiceConfig::parse_from([
            "mirror-hub",
            "--addr",
            "0.0.0.0:8080",
            "--remote-url",
            "https://remote.example",
            "--sweep-interval-ms",
            "250",
        ]);
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.remote_url.as_deref(), Some("https://remote.example"));
        let engine = config.engine();
        assert_eq!(engine.sweep_interval_ms, 250);
        assert_eq!(engine.push_queue_capacity, 64);
    }
}
