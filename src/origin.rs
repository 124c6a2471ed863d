//! Per-origin replication progress tracking.
//!
//! Advancement happens only at COMMIT, atomically with the local commit —
//! see `apply::engine`. This module only defines the storage contract and a
//! `HashMap`-backed implementation for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::ReplicationResult;

/// Persistence surface for per-origin end-LSNs. A real deployment backs
/// this with a WAL-logged store so `advance` survives a crash; the `durable`
/// flag distinguishes a forced-flush call from an opportunistic one, though
/// every implementation is expected to persist before returning regardless.
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, origin_id: u32) -> ReplicationResult<Option<i64>>;
    async fn advance(&self, origin_id: u32, end_lsn: i64, durable: bool) -> ReplicationResult<()>;
}

/// In-memory `ProgressStore` used by tests and by the `MemoryHost` example
/// deployment. Not a real persistence layer — progress is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    progress: Mutex<HashMap<u32, i64>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, origin_id: u32) -> ReplicationResult<Option<i64>> {
        Ok(self.progress.lock().unwrap().get(&origin_id).copied())
    }

    async fn advance(&self, origin_id: u32, end_lsn: i64, _durable: bool) -> ReplicationResult<()> {
        let mut guard = self.progress.lock().unwrap();
        let entry = guard.entry(origin_id).or_insert(0);
        *entry = (*entry).max(end_lsn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advancement_is_monotonic() {
        let store = MemoryProgressStore::new();
        store.advance(1, 100, true).await.unwrap();
        store.advance(1, 50, true).await.unwrap();
        assert_eq!(store.load(1).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn unknown_origin_loads_as_none() {
        let store = MemoryProgressStore::new();
        assert_eq!(store.load(42).await.unwrap(), None);
    }
}
