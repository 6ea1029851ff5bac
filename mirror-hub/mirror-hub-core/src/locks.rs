use crate::router::MirrorKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Above this many entries, locks nobody holds or waits on are dropped.
const PRUNE_ABOVE: usize = 256;

/// One async mutex per mirror key.
///
/// Holding a key's guard serializes read-modify-write of that mirror and the
/// broadcast that follows; different keys never contend.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<MirrorKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &MirrorKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > PRUNE_ABOVE {
                // clones only happen under this lock, so a count of one
                // means no holder and no waiter
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
