use super::{Ack, MirrorRecord, MirrorStore};
use crate::error::StoreError;
use crate::router::MirrorKey;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-local mirror table. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryMirrorStore {
    records: Mutex<HashMap<MirrorKey, MirrorRecord>>,
    failures: AtomicUsize,
}

impl MemoryMirrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` storage calls fail with contention.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check(&self, key: &MirrorKey) -> Result<(), StoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Contention {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for MemoryMirrorStore {
    async fn get_or_create(&self, key: &MirrorKey) -> Result<MirrorRecord, StoreError> {
        self.check(key)?;
        let mut records = self.records.lock();
        Ok(records
            .entry(key.clone())
            .or_insert_with(|| MirrorRecord::new(key.clone()))
            .clone())
    }

    async fn get(&self, key: &MirrorKey) -> Result<Option<MirrorRecord>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn save(&self, record: &MirrorRecord) -> Result<(), StoreError> {
        self.check(&record.key)?;
        let mut record = record.clone();
        let mut records = self.records.lock();
        if let Some(stored) = records.get(&record.key) {
            record.keep_acknowledged(stored);
        }
        records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn acknowledge(
        &self,
        key: &MirrorKey,
        ack: Ack,
    ) -> Result<Option<MirrorRecord>, StoreError> {
        let mut records = self.records.lock();
        Ok(records.get_mut(key).map(|rec| {
            rec.acknowledge(ack);
            rec.clone()
        }))
    }

    async fn list_dirty(&self) -> Result<Vec<MirrorRecord>, StoreError> {
        let mut dirty: Vec<_> = self
            .records
            .lock()
            .values()
            .filter(|r| r.dirty)
            .cloned()
            .collect();
        dirty.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(dirty)
    }

    async fn list(&self) -> Result<Vec<MirrorRecord>, StoreError> {
        let mut all: Vec<_> = self.records.lock().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}
