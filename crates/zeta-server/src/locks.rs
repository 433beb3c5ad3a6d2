use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-function start locks.
///
/// Holding a function's lock serializes its cold start, warm start and
/// delete paths, so two concurrent invocations of a cold function never
/// double-start it. The table is bounded: `forget` drops an entry once its
/// function is deleted and no start still holds the lock.
#[derive(Debug, Default)]
pub struct StartLocks {
    table: DashMap<String, Arc<Mutex<()>>>,
}

impl StartLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .table
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry unless a guard is still alive somewhere.
    pub fn forget(&self, name: &str) {
        self.table
            .remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
