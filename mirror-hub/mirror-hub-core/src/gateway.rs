//! The single entry point for writes and subscriptions.

use crate::broker::{Broker, Subscription};
use crate::engine::SyncEngine;
use crate::error::HubError;
use crate::locks::KeyLocks;
use crate::mirror::{retry_once, MirrorRecord, MirrorStore};
use crate::router::{route, MirrorKey};
use crate::tree::apply_deep;
use crate::value::Node;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Result of an accepted write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WriteAck {
    pub key: MirrorKey,
    pub revision: u64,
    /// Subscribers that received the new document.
    pub subscribers: usize,
    /// Whether the remote push was queued. A dropped push leaves the mirror
    /// for the sweep.
    pub queued: bool,
}

pub struct Gateway {
    store: Arc<dyn MirrorStore>,
    broker: Arc<Broker>,
    locks: Arc<KeyLocks>,
    engine: Arc<SyncEngine>,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        broker: Arc<Broker>,
        locks: Arc<KeyLocks>,
        engine: Arc<SyncEngine>,
    ) -> Self {
        Self {
            store,
            broker,
            locks,
            engine,
        }
    }

    /// Apply `value` at `path`, or delete it for `None`.
    ///
    /// Returns once the change is persisted locally and broadcast. The remote
    /// push only gets queued; its outcome never reaches the caller.
    pub async fn write(&self, path: &str, value: Option<Node>) -> Result<WriteAck, HubError> {
        let route = route(path)?;
        let key = &route.key;
        let _guard = self.locks.lock(key).await;

        let mut record = retry_once("get_or_create", key, || self.store.get_or_create(key))
            .await
            .map_err(HubError::LocalPersist)?;
        let document = apply_deep(&record.document, &route.relative[..], value.clone());
        record.apply_local(document);
        retry_once("save", key, || self.store.save(&record))
            .await
            .map_err(HubError::LocalPersist)?;

        let subscribers = self.broker.publish(key, record.document.clone());
        // queued under the key lock so deltas reach the worker in revision order
        let queued = self.engine.enqueue_push(&route, value, record.revision);

        debug!(%key, path, revision = record.revision, subscribers, "applied write");
        Ok(WriteAck {
            key: key.clone(),
            revision: record.revision,
            subscribers,
            queued,
        })
    }

    /// Subscribe to the mirror named exactly by `path`. The first update is
    /// the current document.
    pub async fn subscribe(&self, path: &str) -> Result<Subscription, HubError> {
        let key: MirrorKey = path.parse()?;
        let _guard = self.locks.lock(&key).await;
        let record = retry_once("get_or_create", &key, || self.store.get_or_create(&key))
            .await
            .map_err(HubError::LocalPersist)?;
        let rx = self.broker.register(&key);
        debug!(%key, "new subscriber");
        Ok(Subscription::new(key, record.document, rx))
    }

    /// Current local record of a mirror, created empty if it never existed.
    pub async fn read(&self, path: &str) -> Result<MirrorRecord, HubError> {
        let key: MirrorKey = path.parse()?;
        retry_once("get_or_create", &key, || self.store.get_or_create(&key))
            .await
            .map_err(HubError::LocalPersist)
    }

    pub async fn status(&self) -> Result<Vec<MirrorRecord>, HubError> {
        self.store.list().await.map_err(HubError::LocalPersist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::InvalidPath;
    use crate::mirror::MemoryMirrorStore;
    use crate::remote::{MemoryRemote, RemoteStore};
    use crate::router::SectionKind;
    use serde_json::json;

    fn gateway(store: Arc<MemoryMirrorStore>, remote: Arc<MemoryRemote>) -> Gateway {
        let config = EngineConfig::default();
        let broker = Arc::new(Broker::new(config.broadcast_capacity));
        let locks = Arc::new(KeyLocks::new());
        let store: Arc<dyn MirrorStore> = store;
        let remote: Arc<dyn RemoteStore> = remote;
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote,
            broker.clone(),
            locks.clone(),
            config,
        ));
        Gateway::new(store, broker, locks, engine)
    }

    #[tokio::test]
    async fn invalid_path_has_no_side_effects() {
        let store = Arc::new(MemoryMirrorStore::new());
        let remote = Arc::new(MemoryRemote::new());
        let gw = gateway(store.clone(), remote);

        for path in ["students/1", "sections/101", "sections/101/grades/x", ""] {
            let err = gw.write(path, Some(Node::from(true))).await.unwrap_err();
            assert!(matches!(err, HubError::InvalidPath(InvalidPath { .. })), "{path}");
        }
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_builds_nested_document_and_broadcasts_once() {
        let store = Arc::new(MemoryMirrorStore::new());
        let remote = Arc::new(MemoryRemote::new());
        remote.set_reachable(false);
        let gw = gateway(store.clone(), remote);
        let mut sub = gw.subscribe("sections/101/attendance").await.unwrap();
        assert!(sub.recv().await.unwrap().document.is_empty_map());

        let ack = gw
            .write("sections/101/attendance/2026-01-05/42", Some(Node::from(true)))
            .await
            .unwrap();
        assert_eq!(ack.key, MirrorKey::section("101", SectionKind::Attendance));
        assert_eq!(ack.subscribers, 1);

        let update = sub.recv().await.unwrap();
        assert_eq!(update.document.to_json(), json!({"2026-01-05": {"42": true}}));
        let stored = store.get(&ack.key).await.unwrap().unwrap();
        assert_eq!(stored.document, update.document);
        assert!(stored.dirty);
    }

    #[tokio::test]
    async fn subscribe_requires_exact_key() {
        let gw = gateway(Arc::new(MemoryMirrorStore::new()), Arc::new(MemoryRemote::new()));
        assert!(gw.subscribe("holidays").await.is_ok());
        assert!(matches!(
            gw.subscribe("holidays/2026-01-01").await,
            Err(HubError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn persist_failure_is_retried_once() {
        let store = Arc::new(MemoryMirrorStore::new());
        let gw = gateway(store.clone(), Arc::new(MemoryRemote::new()));

        store.fail_next(1);
        assert!(gw.write("config/appTitle", Some(Node::from("Roll"))).await.is_ok());

        store.fail_next(2);
        let err = gw.write("config/appTitle", Some(Node::from("Call"))).await.unwrap_err();
        assert!(matches!(err, HubError::LocalPersist(_)));

        let record = store.get(&MirrorKey::Config).await.unwrap().unwrap();
        assert_eq!(record.document.to_json(), json!({"appTitle": "Roll"}));
    }

    #[tokio::test]
    async fn read_creates_empty_record() {
        let store = Arc::new(MemoryMirrorStore::new());
        let gw = gateway(store.clone(), Arc::new(MemoryRemote::new()));
        let record = gw.read("sections/7/students").await.unwrap();
        assert!(record.document.is_empty_map());
        assert!(!record.dirty);
        assert_eq!(gw.status().await.unwrap().len(), 1);
    }
}
