//! Per-mirror fan-out of full document snapshots.
//!
//! Every mirror key with live subscribers owns a broadcast channel. Callers
//! publish while holding the key's lock (see [`crate::locks::KeyLocks`]), so
//! updates for one key reach every subscriber in the order they were applied.

use crate::router::MirrorKey;
use crate::value::Node;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::debug;

/// A mirror's full document after a change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MirrorUpdate {
    #[serde(rename = "path")]
    pub key: MirrorKey,
    #[serde(rename = "data")]
    pub document: Node,
}

pub struct Broker {
    channels: Mutex<HashMap<MirrorKey, broadcast::Sender<MirrorUpdate>>>,
    capacity: usize,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a new receiver for `key`. Pair with a snapshot taken under
    /// the same key lock, otherwise an update can slip in between.
    pub fn register(&self, key: &MirrorKey) -> broadcast::Receiver<MirrorUpdate> {
        let mut channels = self.channels.lock();
        channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send `document` to every subscriber of `key`; returns how many there
    /// were. Channels nobody listens to any more are dropped.
    pub fn publish(&self, key: &MirrorKey, document: Node) -> usize {
        let mut channels = self.channels.lock();
        let Some(tx) = channels.get(key) else {
            return 0;
        };
        match tx.send(MirrorUpdate {
            key: key.clone(),
            document,
        }) {
            Ok(n) => n,
            Err(_) => {
                channels.remove(key);
                debug!(%key, "dropped channel without subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self, key: &MirrorKey) -> usize {
        self.channels
            .lock()
            .get(key)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// A live view of one mirror: the snapshot taken at subscribe time, then
/// every later update. Dropping it unsubscribes.
pub struct Subscription {
    key: MirrorKey,
    initial: Option<MirrorUpdate>,
    rx: broadcast::Receiver<MirrorUpdate>,
}

impl Subscription {
    pub fn new(key: MirrorKey, snapshot: Node, rx: broadcast::Receiver<MirrorUpdate>) -> Self {
        Self {
            initial: Some(MirrorUpdate {
                key: key.clone(),
                document: snapshot,
            }),
            key,
            rx,
        }
    }

    pub fn key(&self) -> &MirrorKey {
        &self.key
    }

    /// Next document for this mirror; `None` once the broker is gone.
    ///
    /// A subscriber that falls more than the channel capacity behind skips
    /// ahead; each update is a full document so nothing is lost but
    /// intermediate states.
    pub async fn recv(&mut self) -> Option<MirrorUpdate> {
        if let Some(first) = self.initial.take() {
            return Some(first);
        }
        loop {
            match self.rx.recv().await {
                Ok(update) => return Some(update),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(key = %self.key, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = MirrorUpdate> + Send + 'static {
        let key = self.key;
        let live = BroadcastStream::new(self.rx).filter_map(move |res| {
            let key = key.clone();
            async move {
                match res {
                    Ok(update) => Some(update),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        debug!(%key, skipped, "subscriber lagged");
                        None
                    }
                }
            }
        });
        futures::stream::iter(self.initial).chain(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::SectionKind;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let broker = Broker::new(16);
        let key = MirrorKey::section("101", SectionKind::Attendance);
        let mut sub = Subscription::new(key.clone(), Node::empty(), broker.register(&key));
        for i in 0..3 {
            broker.publish(&key, Node::from(json!({ "n": i })));
        }
        assert!(sub.recv().await.unwrap().document.is_empty_map());
        for i in 0..3 {
            assert_eq!(sub.recv().await.unwrap().document.to_json(), json!({ "n": i }));
        }
    }

    #[tokio::test]
    async fn publish_only_reaches_matching_key() {
        let broker = Broker::new(4);
        let students = MirrorKey::section("1", SectionKind::Students);
        let _rx = broker.register(&students);
        assert_eq!(broker.publish(&MirrorKey::Config, Node::empty()), 0);
        assert_eq!(broker.publish(&students, Node::empty()), 1);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let broker = Broker::new(4);
        let rx = broker.register(&MirrorKey::Holidays);
        assert_eq!(broker.subscriber_count(&MirrorKey::Holidays), 1);
        drop(rx);
        assert_eq!(broker.publish(&MirrorKey::Holidays, Node::empty()), 0);
        assert_eq!(broker.subscriber_count(&MirrorKey::Holidays), 0);
    }

    #[tokio::test]
    async fn stream_starts_with_snapshot() {
        let broker = Broker::new(4);
        let rx = broker.register(&MirrorKey::Config);
        let sub = Subscription::new(MirrorKey::Config, Node::from(json!({"a": 1})), rx);
        let mut stream = Box::pin(sub.into_stream());
        broker.publish(&MirrorKey::Config, Node::from(json!({"a": 2})));
        assert_eq!(stream.next().await.unwrap().document.to_json(), json!({"a": 1}));
        assert_eq!(stream.next().await.unwrap().document.to_json(), json!({"a": 2}));
    }

    #[test]
    fn update_serializes_as_path_and_data() {
        let update = MirrorUpdate {
            key: MirrorKey::Config,
            document: Node::from(json!({"appTitle": "x"})),
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"path": "config", "data": {"appTitle": "x"}})
        );
    }
}
