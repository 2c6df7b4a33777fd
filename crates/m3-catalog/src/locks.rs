//! Per-dataset reader/writer locks.
//!
//! Queries hold a read guard for their dataset; `init` and `use` hold the
//! write guard, so a catalog is never swapped under a running query in the
//! same process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Clone, Default)]
pub struct CatalogLocks {
    inner: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl CatalogLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, dataset: &str) -> Arc<RwLock<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(dataset.to_lowercase())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub async fn read(&self, dataset: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(dataset).read_owned().await
    }

    pub async fn write(&self, dataset: &str) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(dataset).write_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_writer_waits_for_readers() {
        let locks = CatalogLocks::new();
        let reader = locks.read("mimic-iv-demo").await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.write("MIMIC-IV-DEMO")).await;
        assert!(blocked.is_err());

        drop(reader);
        let writer = tokio::time::timeout(Duration::from_millis(500), locks.write("mimic-iv-demo")).await;
        assert!(writer.is_ok());
    }

    #[tokio::test]
    async fn test_datasets_are_independent() {
        let locks = CatalogLocks::new();
        let _writer = locks.write("a").await;
        let other = tokio::time::timeout(Duration::from_millis(100), locks.read("b")).await;
        assert!(other.is_ok());
    }
}
