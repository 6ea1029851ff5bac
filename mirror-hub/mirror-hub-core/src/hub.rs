//! Wiring and lifecycle of the mirror service state.

use crate::broker::Broker;
use crate::config::EngineConfig;
use crate::engine::{PullReport, SweepReport, SyncEngine};
use crate::gateway::Gateway;
use crate::locks::KeyLocks;
use crate::mirror::MirrorStore;
use crate::remote::RemoteStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct MirrorHub {
    gateway: Gateway,
    engine: Arc<SyncEngine>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorHub {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        remote: Arc<dyn RemoteStore>,
        config: EngineConfig,
    ) -> Self {
        let broker = Arc::new(Broker::new(config.broadcast_capacity));
        let locks = Arc::new(KeyLocks::new());
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote,
            broker.clone(),
            locks.clone(),
            config,
        ));
        Self {
            gateway: Gateway::new(store, broker, locks, engine.clone()),
            engine,
            sweep: Mutex::new(None),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Pull remote state, then start the background sweep. Call before
    /// accepting writes. A failed pull is logged and the hub carries on from
    /// local state.
    pub async fn start(&self) -> Option<PullReport> {
        let pulled = match self.engine.bulk_pull().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "initial sync failed, continuing with local data");
                None
            }
        };

        self.spawn_sweep();
        pulled
    }

    /// Start the background sweep without pulling first. No-op if running.
    pub fn spawn_sweep(&self) {
        let mut sweep = self.sweep.lock();
        if sweep.is_none() {
            *sweep = Some(self.engine.start());
            info!(
                interval_ms = self.engine.config().sweep_interval_ms,
                "background sync started"
            );
        }
    }

    /// Run one sweep now, outside the regular schedule.
    pub async fn sync_now(&self) -> SweepReport {
        self.engine.run_sweep().await
    }

    pub async fn shutdown(&self) {
        let sweep = self.sweep.lock().take();
        self.engine.shutdown().await;
        if let Some(handle) = sweep {
            let _ = handle.await;
        }
    }
}
