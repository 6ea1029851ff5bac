use super::{Ack, MirrorRecord, MirrorStore};
use crate::error::StoreError;
use crate::router::MirrorKey;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// `None` until the record has been written for the first time.
type Slot = Arc<AsyncMutex<Option<MirrorRecord>>>;

/// Filesystem-backed mirror table: one JSON file per mirror, loaded at open.
pub struct FileMirrorStore {
    dir: PathBuf,
    index: Mutex<HashMap<MirrorKey, Slot>>,
}

impl FileMirrorStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            match Self::load(&path) {
                Ok(record) => {
                    index.insert(record.key.clone(), Arc::new(AsyncMutex::new(Some(record))));
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable mirror file"),
            }
        }
        debug!(dir = %dir.display(), mirrors = index.len(), "opened mirror store");
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    /// Directory where mirrors are persisted.
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    fn load(path: &Path) -> Result<MirrorRecord, StoreError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn path(&self, key: &MirrorKey) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(key.to_string());
        self.dir.join(format!("{}.json", name))
    }

    async fn write(&self, record: &MirrorRecord) -> Result<(), StoreError> {
        let path = self.path(&record.key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(record)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn slot(&self, key: &MirrorKey) -> Slot {
        self.index
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    fn slots(&self) -> Vec<Slot> {
        self.index.lock().values().cloned().collect()
    }

    async fn collect(&self, dirty_only: bool) -> Vec<MirrorRecord> {
        let mut out = Vec::new();
        for slot in self.slots() {
            if let Some(rec) = slot.lock().await.as_ref() {
                if !dirty_only || rec.dirty {
                    out.push(rec.clone());
                }
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

#[async_trait]
impl MirrorStore for FileMirrorStore {
    async fn get_or_create(&self, key: &MirrorKey) -> Result<MirrorRecord, StoreError> {
        // the slot is inserted under the index lock and the record is created
        // under the slot lock, so concurrent callers all land on one record
        let slot = self.slot(key);
        let mut current = slot.lock().await;
        if let Some(record) = current.as_ref() {
            return Ok(record.clone());
        }
        let record = MirrorRecord::new(key.clone());
        self.write(&record).await?;
        *current = Some(record.clone());
        Ok(record)
    }

    async fn get(&self, key: &MirrorKey) -> Result<Option<MirrorRecord>, StoreError> {
        let slot = self.index.lock().get(key).cloned();
        match slot {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &MirrorRecord) -> Result<(), StoreError> {
        let slot = self.slot(&record.key);
        let mut current = slot.lock().await;
        let mut record = record.clone();
        if let Some(stored) = current.as_ref() {
            record.keep_acknowledged(stored);
        }
        self.write(&record).await?;
        *current = Some(record);
        Ok(())
    }

    async fn acknowledge(
        &self,
        key: &MirrorKey,
        ack: Ack,
    ) -> Result<Option<MirrorRecord>, StoreError> {
        let slot = match self.index.lock().get(key).cloned() {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let mut current = slot.lock().await;
        let Some(record) = current.as_ref() else {
            return Ok(None);
        };
        let mut updated = record.clone();
        if updated.acknowledge(ack) {
            self.write(&updated).await?;
            *current = Some(updated.clone());
        }
        Ok(Some(updated))
    }

    async fn list_dirty(&self) -> Result<Vec<MirrorRecord>, StoreError> {
        Ok(self.collect(true).await)
    }

    async fn list(&self) -> Result<Vec<MirrorRecord>, StoreError> {
        Ok(self.collect(false).await)
    }
}
