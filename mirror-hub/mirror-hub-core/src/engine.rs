//! Remote synchronization for the local mirrors.
//!
//! Three independent paths keep the remote store converging on local state:
//!
//! * a one-shot bulk pull at startup, overwriting local mirrors with remote
//!   content;
//! * a narrow push of every local write to its exact remote path;
//! * a periodic sweep pushing whole documents of mirrors still dirty.
//!
//! All remote writes for one mirror go through a single worker task fed by a
//! bounded queue, so pushes for a key reach the remote in submission order
//! and acknowledgments are applied in that same order. A worker left idle
//! for `push_worker_idle_ms` retires and drops its queue; the next push for
//! the key starts a fresh one.

use crate::broker::Broker;
use crate::config::EngineConfig;
use crate::error::{RemoteError, StoreError, SyncError};
use crate::locks::KeyLocks;
use crate::mirror::{retry_once, Ack, MirrorStore};
use crate::remote::RemoteStore;
use crate::router::{MirrorKey, Route, SectionKind, CONFIG, HOLIDAYS, SECTIONS};
use crate::value::Node;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

enum PushJob {
    /// Fine-grained change produced by one local write.
    Delta {
        path: String,
        value: Option<Node>,
        revision: u64,
    },
    /// Whole current document, pushed by the sweep. The worker reads the
    /// record when the job comes up so it never pushes a stale snapshot
    /// over a newer delta.
    Full {
        reply: oneshot::Sender<Result<(), RemoteError>>,
    },
}

/// Outcome of one reconciliation sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dirty: usize,
    pub pushed: usize,
    pub failed: usize,
    pub skipped_unreachable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub pulled: Vec<MirrorKey>,
}

type Queues = Arc<Mutex<HashMap<MirrorKey, mpsc::Sender<PushJob>>>>;

pub struct SyncEngine {
    store: Arc<dyn MirrorStore>,
    remote: Arc<dyn RemoteStore>,
    broker: Arc<Broker>,
    locks: Arc<KeyLocks>,
    config: EngineConfig,
    queues: Queues,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweep_lock: AsyncMutex<()>,
    shutdown: watch::Sender<bool>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        remote: Arc<dyn RemoteStore>,
        broker: Arc<Broker>,
        locks: Arc<KeyLocks>,
        config: EngineConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            remote,
            broker,
            locks,
            config,
            queues: Arc::new(Mutex::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
            sweep_lock: AsyncMutex::new(()),
            shutdown,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn remote_call<T, F>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match timeout(self.config.remote_timeout(), fut).await {
            Ok(res) => res,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    // ---- startup pull ----

    /// Overwrite local mirrors with whatever the remote holds for every
    /// mirror family. Remote paths that are absent leave local state alone.
    pub async fn bulk_pull(&self) -> Result<PullReport, SyncError> {
        info!("starting initial pull from remote");
        let mut report = PullReport::default();

        for (path, key) in [(HOLIDAYS, MirrorKey::Holidays), (CONFIG, MirrorKey::Config)] {
            if let Some(node) = self.pull_read(path).await? {
                self.overwrite_local(&key, node).await?;
                report.pulled.push(key);
            }
        }

        if let Some(sections) = self.pull_read(SECTIONS).await? {
            for (id, section) in sections.into_container() {
                let mut section = section.into_container();
                for kind in SectionKind::ALL {
                    if let Some(node) = section.remove(kind.as_str()) {
                        let key = MirrorKey::section(id.clone(), kind);
                        self.overwrite_local(&key, node).await?;
                        report.pulled.push(key);
                    }
                }
            }
        }

        info!(mirrors = report.pulled.len(), "initial pull complete");
        Ok(report)
    }

    async fn pull_read(&self, path: &str) -> Result<Option<Node>, SyncError> {
        self.remote_call(self.remote.read_at(path))
            .await
            .map_err(|source| SyncError::StartupRead {
                path: path.to_string(),
                source,
            })
    }

    async fn overwrite_local(&self, key: &MirrorKey, document: Node) -> Result<(), SyncError> {
        let _guard = self.locks.lock(key).await;
        let to_sync_err = |source: StoreError| SyncError::StartupStore {
            key: key.to_string(),
            source,
        };
        let mut record = retry_once("get_or_create", key, || self.store.get_or_create(key))
            .await
            .map_err(to_sync_err)?;
        record.apply_remote(document);
        retry_once("save", key, || self.store.save(&record))
            .await
            .map_err(to_sync_err)?;
        self.broker.publish(key, record.document.clone());
        debug!(%key, "pulled mirror");
        Ok(())
    }

    // ---- per-write push ----

    /// Queue the remote push for a local write without waiting for it.
    ///
    /// Returns false when the push was dropped (queue full or engine shut
    /// down); the mirror stays dirty and the sweep picks it up.
    pub fn enqueue_push(&self, route: &Route, value: Option<Node>, revision: u64) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        let job = PushJob::Delta {
            path: route.full_path(),
            value,
            revision,
        };
        // sent under the table lock so a retiring worker never strands a delta
        let mut queues = self.queues.lock();
        let tx = self.queue_locked(&mut queues, &route.key);
        match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(key = %route.key, "push queue full, leaving change for the sweep");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn queue(&self, key: &MirrorKey) -> Option<mpsc::Sender<PushJob>> {
        if *self.shutdown.borrow() {
            return None;
        }
        let mut queues = self.queues.lock();
        Some(self.queue_locked(&mut queues, key))
    }

    fn queue_locked(
        &self,
        queues: &mut HashMap<MirrorKey, mpsc::Sender<PushJob>>,
        key: &MirrorKey,
    ) -> mpsc::Sender<PushJob> {
        if let Some(tx) = queues.get(key) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::channel(self.config.push_queue_capacity.max(1));
        let worker = PushWorker {
            key: key.clone(),
            store: self.store.clone(),
            remote: self.remote.clone(),
            queues: self.queues.clone(),
            timeout: self.config.remote_timeout(),
            idle: self.config.push_worker_idle(),
        };
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(tokio::spawn(worker.run(rx)));
        queues.insert(key.clone(), tx.clone());
        tx
    }

    /// Mirrors that currently have a push worker.
    pub fn active_workers(&self) -> usize {
        self.queues.lock().len()
    }

    /// Number of pushes waiting for `key`.
    pub fn pending_pushes(&self, key: &MirrorKey) -> usize {
        self.queues
            .lock()
            .get(key)
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    // ---- periodic sweep ----

    /// Push the whole document of every dirty mirror, if the remote is up.
    pub async fn run_sweep(&self) -> SweepReport {
        let _sweeping = self.sweep_lock.lock().await;
        let mut report = SweepReport::default();

        let dirty = match self.store.list_dirty().await {
            Ok(dirty) => dirty,
            Err(e) => {
                error!(error = %e, "sweep could not list dirty mirrors");
                return report;
            }
        };
        report.dirty = dirty.len();
        if dirty.is_empty() {
            return report;
        }

        let reachable = timeout(self.config.remote_timeout(), self.remote.is_reachable())
            .await
            .unwrap_or(false);
        if !reachable {
            debug!(dirty = report.dirty, "remote unreachable, skipping sweep");
            report.skipped_unreachable = true;
            return report;
        }

        info!(dirty = report.dirty, "syncing pending mirrors");
        let mut pending = Vec::with_capacity(dirty.len());
        for record in dirty {
            let reply = self.submit_full(&record.key).await;
            pending.push((record.key, reply));
        }

        // a reply can sit behind queued deltas, so allow it more than one call
        let wait = self.config.remote_timeout() * 2;
        for (key, reply) in pending {
            let result = match reply {
                Some(rx) => match timeout(wait, rx).await {
                    Ok(Ok(res)) => res,
                    Ok(Err(_)) => Err(RemoteError::Rejected("push worker stopped".into())),
                    Err(_) => Err(RemoteError::Timeout),
                },
                None => Err(RemoteError::Rejected("push queue unavailable".into())),
            };
            match result {
                Ok(()) => {
                    report.pushed += 1;
                    info!(%key, "synced mirror");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(%key, error = %e, "sync failed for mirror");
                }
            }
        }
        report
    }

    async fn submit_full(
        &self,
        key: &MirrorKey,
    ) -> Option<oneshot::Receiver<Result<(), RemoteError>>> {
        let tx = self.queue(key)?;
        let (reply, rx) = oneshot::channel();
        let send = tx.send(PushJob::Full { reply });
        match timeout(self.config.remote_timeout(), send).await {
            Ok(Ok(())) => Some(rx),
            _ => None,
        }
    }

    // ---- lifecycle ----

    /// Spawn the periodic sweep. It runs until [`SyncEngine::shutdown`].
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(engine.config.sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = engine.run_sweep().await;
                        if report.dirty > 0 {
                            debug!(?report, "sweep finished");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("sweep loop stopped");
        })
    }

    /// Stop the sweep and let push workers drain what they already hold.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.queues.lock().clear();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        info!("sync engine stopped");
    }
}

struct PushWorker {
    key: MirrorKey,
    store: Arc<dyn MirrorStore>,
    remote: Arc<dyn RemoteStore>,
    queues: Queues,
    timeout: Duration,
    idle: Duration,
}

impl PushWorker {
    async fn run(self, mut rx: mpsc::Receiver<PushJob>) {
        loop {
            let job = match timeout(self.idle, rx.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => {
                    let next = {
                        let mut queues = self.queues.lock();
                        let next = rx.try_recv().ok();
                        if next.is_none() {
                            queues.remove(&self.key);
                        }
                        next
                    };
                    match next {
                        Some(job) => job,
                        None => {
                            // a sweep may still hold a sender from before
                            rx.close();
                            while let Some(job) = rx.recv().await {
                                self.handle(job).await;
                            }
                            debug!(key = %self.key, "push worker idle, retired");
                            return;
                        }
                    }
                }
            };
            self.handle(job).await;
        }
        debug!(key = %self.key, "push worker stopped");
    }

    async fn handle(&self, job: PushJob) {
        match job {
            PushJob::Delta {
                path,
                value,
                revision,
            } => match self.write(&path, value.as_ref()).await {
                Ok(()) => {
                    info!(%path, revision, "synced change to remote");
                    self.acknowledge(Ack::Delta { revision }).await;
                }
                Err(e) => {
                    warn!(%path, error = %e, "remote push failed, change kept locally");
                }
            },
            PushJob::Full { reply } => {
                let _ = reply.send(self.push_full().await);
            }
        }
    }

    async fn push_full(&self) -> Result<(), RemoteError> {
        let record = match self.store.get(&self.key).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(e) => return Err(RemoteError::Rejected(format!("local read failed: {e}"))),
        };
        if !record.dirty {
            return Ok(());
        }
        self.write(&self.key.remote_path(), Some(&record.document)).await?;
        self.acknowledge(Ack::Full {
            revision: record.revision,
        })
        .await;
        Ok(())
    }

    async fn write(&self, path: &str, value: Option<&Node>) -> Result<(), RemoteError> {
        match timeout(self.timeout, self.remote.write_at(path, value)).await {
            Ok(res) => res,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    async fn acknowledge(&self, ack: Ack) {
        match self.store.acknowledge(&self.key, ack).await {
            Ok(Some(record)) if record.dirty => {
                debug!(key = %self.key, revision = record.revision, "mirror still dirty after ack");
            }
            Ok(_) => {}
            Err(e) => warn!(key = %self.key, error = %e, "could not record remote ack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Subscription;
    use crate::mirror::MemoryMirrorStore;
    use crate::remote::{MemoryRemote, OfflineRemote};
    use crate::router::route;
    use serde_json::json;

    fn engine(
        store: Arc<MemoryMirrorStore>,
        remote: Arc<dyn RemoteStore>,
        config: EngineConfig,
    ) -> (Arc<SyncEngine>, Arc<Broker>) {
        let broker = Arc::new(Broker::new(8));
        let engine = Arc::new(SyncEngine::new(
            store,
            remote,
            broker.clone(),
            Arc::new(KeyLocks::new()),
            config,
        ));
        (engine, broker)
    }

    async fn dirty(store: &MemoryMirrorStore, key: &MirrorKey, doc: serde_json::Value) {
        let mut record = store.get_or_create(key).await.unwrap();
        record.apply_local(Node::from(doc));
        store.save(&record).await.unwrap();
    }

    #[tokio::test]
    async fn bulk_pull_overwrites_every_family() {
        let remote = Arc::new(MemoryRemote::with_data(Node::from(json!({
            "holidays": {"h1": {"name": "New Year"}},
            "config": {"appTitle": "Roll Call"},
            "sections": {
                "101": {"students": {"s1": {"name": "Ana"}}, "attendance": {"2026-01-05": {"s1": true}}},
                "102": {"students": {"s2": {"name": "Ben"}}, "meta": {"room": 4}}
            }
        }))));
        let store = Arc::new(MemoryMirrorStore::new());
        dirty(&store, &MirrorKey::Config, json!({"appTitle": "stale"})).await;
        let (engine, broker) = engine(store.clone(), remote, EngineConfig::default());

        let config = MirrorKey::Config;
        let mut sub = Subscription::new(config.clone(), Node::empty(), broker.register(&config));
        let report = engine.bulk_pull().await.unwrap();

        assert_eq!(report.pulled.len(), 5);
        assert!(!report.pulled.iter().any(|k| k.to_string().ends_with("meta")));
        let record = store.get(&config).await.unwrap().unwrap();
        assert_eq!(record.document.to_json(), json!({"appTitle": "Roll Call"}));
        assert!(!record.dirty);
        assert!(store.list_dirty().await.unwrap().is_empty());

        sub.recv().await.unwrap();
        assert_eq!(sub.recv().await.unwrap().document, record.document);
    }

    #[tokio::test]
    async fn bulk_pull_leaves_absent_families_alone() {
        let remote = Arc::new(MemoryRemote::with_data(Node::from(json!({"config": {"a": 1}}))));
        let store = Arc::new(MemoryMirrorStore::new());
        dirty(&store, &MirrorKey::Holidays, json!({"h": {"name": "local"}})).await;
        let (engine, _) = engine(store.clone(), remote, EngineConfig::default());

        let report = engine.bulk_pull().await.unwrap();
        assert_eq!(report.pulled, vec![MirrorKey::Config]);
        let holidays = store.get(&MirrorKey::Holidays).await.unwrap().unwrap();
        assert!(holidays.dirty);
    }

    #[tokio::test]
    async fn bulk_pull_reports_unreachable_remote() {
        let store = Arc::new(MemoryMirrorStore::new());
        let (engine, _) = engine(store, Arc::new(OfflineRemote), EngineConfig::default());
        let err = engine.bulk_pull().await.unwrap_err();
        assert!(matches!(err, SyncError::StartupRead { .. }));
    }

    #[tokio::test]
    async fn sweep_skips_when_nothing_is_dirty() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_reachable(false);
        let (engine, _) = engine(Arc::new(MemoryMirrorStore::new()), remote, EngineConfig::default());
        assert_eq!(engine.run_sweep().await, SweepReport::default());
    }

    #[tokio::test]
    async fn sweep_pushes_whole_documents_when_reachable() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(MemoryMirrorStore::new());
        let students = MirrorKey::section("101", SectionKind::Students);
        dirty(&store, &students, json!({"s1": {"name": "Ana"}})).await;
        dirty(&store, &MirrorKey::Holidays, json!({"h1": {"name": "Labor Day"}})).await;
        let (engine, _) = engine(store.clone(), remote.clone(), EngineConfig::default());

        remote.set_reachable(false);
        let report = engine.run_sweep().await;
        assert!(report.skipped_unreachable);
        assert_eq!(report.dirty, 2);
        assert!(remote.writes().is_empty());

        remote.set_reachable(true);
        let report = engine.run_sweep().await;
        assert_eq!((report.pushed, report.failed), (2, 0));
        assert!(store.list_dirty().await.unwrap().is_empty());
        assert_eq!(
            remote.value_at("sections/101/students").unwrap().to_json(),
            json!({"s1": {"name": "Ana"}})
        );
    }

    #[tokio::test]
    async fn timed_out_probe_counts_as_unreachable() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Some(Duration::from_millis(200)));
        let store = Arc::new(MemoryMirrorStore::new());
        dirty(&store, &MirrorKey::Config, json!({"a": 1})).await;
        let config = EngineConfig {
            remote_timeout_ms: 20,
            ..EngineConfig::default()
        };
        let (engine, _) = engine(store.clone(), remote.clone(), config);

        let report = engine.run_sweep().await;
        assert!(report.skipped_unreachable);
        assert!(store.get(&MirrorKey::Config).await.unwrap().unwrap().dirty);
    }

    #[tokio::test]
    async fn timed_out_push_leaves_mirror_dirty() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(MemoryMirrorStore::new());
        dirty(&store, &MirrorKey::Config, json!({"a": 1})).await;
        let config = EngineConfig {
            remote_timeout_ms: 20,
            ..EngineConfig::default()
        };
        let (engine, _) = engine(store.clone(), remote.clone(), config);

        let r = route("config/a").unwrap();
        remote.set_latency(Some(Duration::from_millis(200)));
        assert!(engine.enqueue_push(&r, Some(Node::from(1)), 1));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(remote.value_at("config/a").is_none());
        assert!(store.get(&MirrorKey::Config).await.unwrap().unwrap().dirty);
    }

    #[tokio::test]
    async fn full_queue_drops_push() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Some(Duration::from_millis(50)));
        let config = EngineConfig {
            push_queue_capacity: 1,
            ..EngineConfig::default()
        };
        let (engine, _) = engine(Arc::new(MemoryMirrorStore::new()), remote, config);
        let r = route("holidays/h1/name").unwrap();

        // nothing yields between the sends, so the worker has not started
        assert!(engine.enqueue_push(&r, Some(Node::from("a")), 1));
        assert!(!engine.enqueue_push(&r, Some(Node::from("b")), 2));
        assert_eq!(engine.pending_pushes(&MirrorKey::Holidays), 1);
    }

    #[tokio::test]
    async fn deltas_reach_remote_in_order() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(MemoryMirrorStore::new());
        let (engine, _) = engine(store.clone(), remote.clone(), EngineConfig::default());
        let r = route("config/title").unwrap();
        for (rev, title) in ["one", "two", "three"].into_iter().enumerate() {
            dirty(&store, &MirrorKey::Config, json!({ "title": title })).await;
            assert!(engine.enqueue_push(&r, Some(Node::from(title)), rev as u64 + 1));
        }
        engine.shutdown().await;

        let titles: Vec<_> = remote
            .writes()
            .into_iter()
            .filter_map(|w| w.value.map(|v| v.to_json()))
            .collect();
        assert_eq!(titles, vec![json!("one"), json!("two"), json!("three")]);
        assert!(!store.get(&MirrorKey::Config).await.unwrap().unwrap().dirty);
    }

    #[tokio::test]
    async fn idle_worker_retires_and_key_gets_a_new_one() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(MemoryMirrorStore::new());
        let config = EngineConfig {
            push_worker_idle_ms: 20,
            ..EngineConfig::default()
        };
        let (engine, _) = engine(store.clone(), remote.clone(), config);
        let r = route("config/title").unwrap();

        dirty(&store, &MirrorKey::Config, json!({"title": "one"})).await;
        assert!(engine.enqueue_push(&r, Some(Node::from("one")), 1));
        assert_eq!(engine.active_workers(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.active_workers(), 0);
        assert!(!store.get(&MirrorKey::Config).await.unwrap().unwrap().dirty);

        dirty(&store, &MirrorKey::Config, json!({"title": "two"})).await;
        assert!(engine.enqueue_push(&r, Some(Node::from("two")), 2));
        engine.shutdown().await;
        assert_eq!(remote.value_at("config/title").unwrap().to_json(), json!("two"));
        assert!(!store.get(&MirrorKey::Config).await.unwrap().unwrap().dirty);
    }

    #[tokio::test]
    async fn shutdown_stops_sweep_loop() {
        let config = EngineConfig {
            sweep_interval_ms: 10,
            ..EngineConfig::default()
        };
        let (engine, _) = engine(Arc::new(MemoryMirrorStore::new()), Arc::new(MemoryRemote::new()), config);
        let handle = engine.start();
        engine.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweep loop did not stop")
            .unwrap();
        let r = route("config/x").unwrap();
        assert!(!engine.enqueue_push(&r, None, 1));
    }
}
