//! Per-record async locks

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// One async mutex per key, created on first use
#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mutex for `key`; lock it with `.lock().await`
    pub(crate) fn get(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().clone()
    }

    pub(crate) fn remove(&self, key: &str) {
        self.locks.remove(key);
    }

    /// Drop the mutex for `key` unless someone still holds or awaits it
    pub(crate) fn remove_idle(&self, key: &str) -> bool {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
