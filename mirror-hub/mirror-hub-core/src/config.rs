//! Tuning knobs for the mirror engine.
//!
//! ```
//! use mirror_hub_core::EngineConfig;
//!
//! let config = EngineConfig::default();
//! assert_eq!(config.sweep_interval_ms, 5_000);
//!
//! let config: EngineConfig = serde_json::from_str(r#"{"remote_timeout_ms": 500}"#).unwrap();
//! assert_eq!(config.push_queue_capacity, 64);
//! ```

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Period of the background reconciliation sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Upper bound on any single remote call (probe, read or push).
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// Pending remote pushes allowed per mirror before new ones are dropped.
    #[serde(default = "default_push_queue_capacity")]
    pub push_queue_capacity: usize,

    /// Updates buffered per mirror for slow subscribers.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// How long a mirror's push worker waits for work before it exits.
    #[serde(default = "default_push_worker_idle_ms")]
    pub push_worker_idle_ms: u64,
}

fn default_sweep_interval_ms() -> u64 { 5_000 }
fn default_remote_timeout_ms() -> u64 { 3_000 }
fn default_push_queue_capacity() -> usize { 64 }
fn default_broadcast_capacity() -> usize { 100 }
fn default_push_worker_idle_ms() -> u64 { 60_000 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            remote_timeout_ms: default_remote_timeout_ms(),
            push_queue_capacity: default_push_queue_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            push_worker_idle_ms: default_push_worker_idle_ms(),
        }
    }
}

impl EngineConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms.max(1))
    }

    pub fn push_worker_idle(&self) -> Duration {
        Duration::from_millis(self.push_worker_idle_ms.max(1))
    }
}
