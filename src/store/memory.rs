//! In-process store used by tests and embedders.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use super::{BrowserCounterRow, Store, Tables};
use crate::errors::{RankerError, Result};
use crate::key::Namespace;
use crate::ranker::{Ranker, RankerKind};

/// A [`Store`] held entirely in memory.
///
/// Optional simulated latency and write-deadline failures make it usable
/// for exercising timeout handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    latency: Option<Duration>,
    writes_before_timeout: Mutex<Option<usize>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Let `writes` more writes succeed, then fail every write with a
    /// timeout error.
    pub fn fail_writes_after(&self, writes: usize) {
        if let Ok(mut remaining) = self.writes_before_timeout.lock() {
            *remaining = Some(writes);
        }
    }

    /// Stop injecting write failures.
    pub fn heal(&self) {
        if let Ok(mut remaining) = self.writes_before_timeout.lock() {
            *remaining = None;
        }
    }

    /// Number of successful write operations so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| RankerError::store("memory store lock poisoned"))
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            sleep(latency).await;
        }
    }

    fn begin_write(&self) -> Result<()> {
        let mut remaining = self
            .writes_before_timeout
            .lock()
            .map_err(|_| RankerError::store("memory store lock poisoned"))?;
        match remaining.as_mut() {
            Some(0) => {
                return Err(RankerError::timeout("simulated store deadline"))
            }
            Some(left) => *left -= 1,
            None => {}
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Store for MemoryStore {
    async fn get_rankers(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) -> Result<Vec<Option<Ranker>>> {
        self.pause().await;
        Ok(self.lock()?.get_rankers(namespace, kind, key_names))
    }

    async fn get_or_insert_ranker(
        &self,
        namespace: Namespace,
        key_name: &str,
        default: Ranker,
    ) -> Result<Ranker> {
        self.pause().await;
        self.begin_write()?;
        Ok(self.lock()?.get_or_insert_ranker(namespace, key_name, default))
    }

    async fn put_rankers(
        &self,
        namespace: Namespace,
        rows: &[(String, Ranker)],
    ) -> Result<()> {
        self.pause().await;
        self.begin_write()?;
        self.lock()?.put_rankers(namespace, rows);
        Ok(())
    }

    async fn delete_rankers(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) -> Result<()> {
        self.pause().await;
        self.begin_write()?;
        self.lock()?.delete_rankers(namespace, kind, key_names);
        Ok(())
    }

    async fn scan_rankers(
        &self,
        namespace: Namespace,
        limit: usize,
    ) -> Result<Vec<(String, Ranker)>> {
        self.pause().await;
        Ok(self.lock()?.scan_rankers(namespace, limit))
    }

    async fn update_counter<F>(
        &self,
        key_name: &str,
        update: F,
    ) -> Result<BrowserCounterRow>
    where
        F: FnOnce(Option<BrowserCounterRow>) -> BrowserCounterRow + Send,
    {
        self.pause().await;
        self.begin_write()?;
        Ok(self.lock()?.update_counter(key_name, update))
    }

    async fn counters_for_category(
        &self,
        category: &str,
    ) -> Result<Vec<BrowserCounterRow>> {
        self.pause().await;
        Ok(self.lock()?.counters_for_category(category))
    }

    async fn get_marker(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lock()?.get_marker(name))
    }

    async fn set_marker(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        self.begin_write()?;
        self.lock()?.set_marker(name, at);
        Ok(())
    }

    async fn clear_marker(&self, name: &str) -> Result<()> {
        self.begin_write()?;
        self.lock()?.clear_marker(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::ranker::Rank;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStore::new();
        let mut ranker = Ranker::empty(RankerKind::Sample, 100);
        ranker.add(42);
        store
            .put_rankers(Namespace::Live, &[("k".to_string(), ranker.clone())])
            .await
            .unwrap();

        let keys = vec!["k".to_string(), "missing".to_string()];
        let rows = store
            .get_rankers(Namespace::Live, RankerKind::Sample, &keys)
            .await
            .unwrap();
        assert_eq!(rows, vec![Some(ranker), None]);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_write_timeouts() {
        let store = MemoryStore::new();
        store.fail_writes_after(1);
        let row = ("k".to_string(), Ranker::empty(RankerKind::Histogram, 100));

        store.put_rankers(Namespace::Live, &[row.clone()]).await.unwrap();
        let err = store.put_rankers(Namespace::Live, &[row.clone()]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);

        store.heal();
        store.put_rankers(Namespace::Live, &[row]).await.unwrap();
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_markers() {
        let store = MemoryStore::new();
        assert_eq!(store.get_marker("m").await.unwrap(), None);

        let now = Utc::now();
        store.set_marker("m", now).await.unwrap();
        assert_eq!(store.get_marker("m").await.unwrap(), Some(now));

        store.clear_marker("m").await.unwrap();
        assert_eq!(store.get_marker("m").await.unwrap(), None);
    }
}
