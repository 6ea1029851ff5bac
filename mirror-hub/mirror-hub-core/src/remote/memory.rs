use super::RemoteStore;
use crate::error::RemoteError;
use crate::router::segments;
use crate::tree::apply_deep;
use crate::value::Node;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A write the remote accepted, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteWrite {
    pub path: String,
    pub value: Option<Node>,
}

/// In-process stand-in for the remote store with a switchable connection.
pub struct MemoryRemote {
    root: Mutex<Node>,
    writes: Mutex<Vec<RemoteWrite>>,
    reachable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::with_data(Node::empty())
    }

    pub fn with_data(root: Node) -> Self {
        Self {
            root: Mutex::new(root),
            writes: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            latency: Mutex::new(None),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`, to exercise timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn snapshot(&self) -> Node {
        self.root.lock().clone()
    }

    pub fn value_at(&self, path: &str) -> Option<Node> {
        let parts = segments(path).ok()?;
        self.root.lock().get_path(&parts[..]).cloned()
    }

    pub fn writes(&self) -> Vec<RemoteWrite> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unreachable)
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn read_at(&self, path: &str) -> Result<Option<Node>, RemoteError> {
        self.delay().await;
        self.ensure_reachable()?;
        let parts = segments(path).map_err(|e| RemoteError::Rejected(e.to_string()))?;
        Ok(self.root.lock().get_path(&parts[..]).cloned())
    }

    async fn write_at(&self, path: &str, value: Option<&Node>) -> Result<(), RemoteError> {
        self.delay().await;
        self.ensure_reachable()?;
        let parts = segments(path).map_err(|e| RemoteError::Rejected(e.to_string()))?;
        {
            let mut root = self.root.lock();
            *root = apply_deep(&root, &parts[..], value.cloned());
        }
        self.writes.lock().push(RemoteWrite {
            path: path.to_string(),
            value: value.cloned(),
        });
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        self.delay().await;
        self.reachable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_land_in_tree() {
        let remote = MemoryRemote::new();
        remote
            .write_at("sections/1/attendance/2026-01-05/42", Some(&Node::from(true)))
            .await
            .unwrap();
        let read = remote.read_at("sections/1/attendance").await.unwrap().unwrap();
        assert_eq!(read.to_json(), json!({"2026-01-05": {"42": true}}));

        remote.write_at("sections/1/attendance", None).await.unwrap();
        assert!(remote.read_at("sections/1/attendance").await.unwrap().is_none());
        assert_eq!(remote.writes().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_rejects_calls() {
        let remote = MemoryRemote::new();
        remote.set_reachable(false);
        assert!(!remote.is_reachable().await);
        assert!(matches!(
            remote.write_at("config/appTitle", Some(&Node::from("x"))).await,
            Err(RemoteError::Unreachable)
        ));
        assert!(remote.writes().is_empty());
    }
}
