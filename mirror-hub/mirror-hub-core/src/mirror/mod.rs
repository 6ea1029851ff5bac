//! Durable table of mirror documents.
//!
//! Each mirror key owns exactly one [`MirrorRecord`]. Records are created
//! lazily with an empty document and are never deleted.

use crate::error::StoreError;
use crate::router::MirrorKey;
use crate::value::Node;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::warn;

mod file;
mod memory;

pub use file::FileMirrorStore;
pub use memory::MemoryMirrorStore;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub key: MirrorKey,
    pub document: Node,
    pub dirty: bool,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every local mutation.
    #[serde(default)]
    pub revision: u64,
    /// Last revision confirmed by the remote store.
    #[serde(default)]
    pub synced_revision: u64,
}

impl MirrorRecord {
    pub fn new(key: MirrorKey) -> Self {
        Self {
            key,
            document: Node::empty(),
            dirty: false,
            updated_at: Utc::now(),
            revision: 0,
            synced_revision: 0,
        }
    }

    /// Record a local mutation. The mirror is dirty until the remote
    /// acknowledges this revision.
    pub fn apply_local(&mut self, document: Node) {
        self.document = document;
        self.revision += 1;
        self.dirty = true;
        self.updated_at = Utc::now();
    }

    /// Replace the document with state read from the remote; the result is
    /// already in sync.
    pub fn apply_remote(&mut self, document: Node) {
        self.document = document;
        self.revision += 1;
        self.synced_revision = self.revision;
        self.dirty = false;
        self.updated_at = Utc::now();
    }

    /// Apply a remote acknowledgment. Returns true if the record changed.
    pub fn acknowledge(&mut self, ack: Ack) -> bool {
        let before = (self.synced_revision, self.dirty);
        match ack {
            Ack::Full { revision } => {
                if revision <= self.revision {
                    self.synced_revision = revision;
                }
            }
            Ack::Delta { revision } => {
                if revision <= self.revision && self.synced_revision + 1 == revision {
                    self.synced_revision = revision;
                }
            }
        }
        self.dirty = self.synced_revision != self.revision;
        before != (self.synced_revision, self.dirty)
    }

    /// Keep an acknowledgment `stored` received after this copy was read.
    /// Stores call this on save so a read-modify-write never rolls back
    /// `synced_revision`.
    pub fn keep_acknowledged(&mut self, stored: &MirrorRecord) {
        if stored.synced_revision > self.synced_revision && stored.synced_revision <= self.revision {
            self.synced_revision = stored.synced_revision;
            self.dirty = self.synced_revision != self.revision;
        }
    }
}

/// What the remote store confirmed for a mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    /// The whole document as of `revision` was written.
    Full { revision: u64 },
    /// The single change that produced `revision` was written.
    Delta { revision: u64 },
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Return the record for `key`, inserting an empty one if absent. Insert
    /// must be atomic: concurrent callers observe a single record.
    async fn get_or_create(&self, key: &MirrorKey) -> Result<MirrorRecord, StoreError>;

    async fn get(&self, key: &MirrorKey) -> Result<Option<MirrorRecord>, StoreError>;

    /// Persist the full record, last writer wins, except that a newer
    /// acknowledgment already stored is kept.
    async fn save(&self, record: &MirrorRecord) -> Result<(), StoreError>;

    /// Atomically apply a remote acknowledgment to the stored record.
    async fn acknowledge(&self, key: &MirrorKey, ack: Ack) -> Result<Option<MirrorRecord>, StoreError>;

    async fn list_dirty(&self) -> Result<Vec<MirrorRecord>, StoreError>;

    async fn list(&self) -> Result<Vec<MirrorRecord>, StoreError>;
}

/// Run a storage call, retrying a single time on failure.
pub(crate) async fn retry_once<T, F, Fut>(op: &str, key: &MirrorKey, mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(%key, op, error = %e, "storage call failed, retrying once");
            call().await
        }
    }
}
