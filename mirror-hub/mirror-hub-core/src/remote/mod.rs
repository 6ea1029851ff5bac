//! The authoritative remote store, as seen by the sync engine.
//!
//! The engine only needs three operations: read a subtree, write or delete a
//! subtree, and a cheap connectivity probe.

use crate::error::RemoteError;
use crate::value::Node;
use async_trait::async_trait;

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteWrite};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Value stored at `path`, `None` when absent.
    async fn read_at(&self, path: &str) -> Result<Option<Node>, RemoteError>;

    /// Set `path` to `value`, or delete it for `None`.
    async fn write_at(&self, path: &str, value: Option<&Node>) -> Result<(), RemoteError>;

    async fn is_reachable(&self) -> bool;
}

/// Remote used when none is configured: every call fails as unreachable, so
/// all mirrors stay dirty and the service runs purely on local state.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineRemote;

#[async_trait]
impl RemoteStore for OfflineRemote {
    async fn read_at(&self, _path: &str) -> Result<Option<Node>, RemoteError> {
        Err(RemoteError::Unreachable)
    }

    async fn write_at(&self, _path: &str, _value: Option<&Node>) -> Result<(), RemoteError> {
        Err(RemoteError::Unreachable)
    }

    async fn is_reachable(&self) -> bool {
        false
    }
}
