//! Durable storage for rankers, browser counters and maintenance markers.
//!
//! The [`Store`] trait is the engine's view of a transactional key-value
//! row store. Rankers live in one table per namespace and per ranker kind,
//! so batched reads are always homogeneous. Two implementations ship with
//! the crate: [`MemoryStore`] for tests and embedding, and
//! [`JsonFileStore`] which backs the command line tool.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::Result;
use crate::key::Namespace;
use crate::ranker::{HistogramRanker, Rank, Ranker, RankerKind, SampleRanker};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Marker set while the staging namespace holds unreleased data.
pub const DIRTY_MARKER: &str = "rankers_dirty";

/// Marker holding the time of the last completed release.
pub const RELEASED_MARKER: &str = "rankers_released";

/// Occurrence count for one browser at every version level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCounterRow {
    pub key_name: String,
    pub category: String,
    /// Browser strings from family (index 0) to the most specific version.
    pub browsers: Vec<String>,
    pub count: u64,
}

/// A transactional key-value row store.
///
/// Every method must complete within the platform deadline; the repository
/// wraps calls in a timeout and reports a miss as
/// [`crate::errors::ErrorKind::Timeout`].
#[allow(async_fn_in_trait)]
pub trait Store: Send + Sync {
    /// Batch fetch rankers of one kind, aligned with `key_names`.
    async fn get_rankers(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) -> Result<Vec<Option<Ranker>>>;

    /// Return the existing ranker for `key_name`, or insert `default` and
    /// return it. Atomic with respect to concurrent callers.
    async fn get_or_insert_ranker(
        &self,
        namespace: Namespace,
        key_name: &str,
        default: Ranker,
    ) -> Result<Ranker>;

    /// Write whole rows, replacing any existing row with the same key.
    async fn put_rankers(
        &self,
        namespace: Namespace,
        rows: &[(String, Ranker)],
    ) -> Result<()>;

    /// Delete rows of one kind.
    async fn delete_rankers(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) -> Result<()>;

    /// Up to `limit` rows from the start of the namespace in a stable order.
    async fn scan_rankers(
        &self,
        namespace: Namespace,
        limit: usize,
    ) -> Result<Vec<(String, Ranker)>>;

    /// Read-modify-write a counter row inside a transaction.
    async fn update_counter<F>(
        &self,
        key_name: &str,
        update: F,
    ) -> Result<BrowserCounterRow>
    where
        F: FnOnce(Option<BrowserCounterRow>) -> BrowserCounterRow + Send;

    /// All counter rows of a category.
    async fn counters_for_category(
        &self,
        category: &str,
    ) -> Result<Vec<BrowserCounterRow>>;

    async fn get_marker(&self, name: &str) -> Result<Option<DateTime<Utc>>>;

    async fn set_marker(&self, name: &str, at: DateTime<Utc>) -> Result<()>;

    async fn clear_marker(&self, name: &str) -> Result<()>;
}

/// Rankers of one namespace, one map per kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RankerTable {
    #[serde(default)]
    histogram: BTreeMap<String, HistogramRanker>,
    #[serde(default)]
    sample: BTreeMap<String, SampleRanker>,
}

impl RankerTable {
    fn get(&self, kind: RankerKind, key_name: &str) -> Option<Ranker> {
        match kind {
            RankerKind::Histogram => {
                self.histogram.get(key_name).cloned().map(Ranker::Histogram)
            }
            RankerKind::Sample => {
                self.sample.get(key_name).cloned().map(Ranker::Sample)
            }
        }
    }

    fn put(&mut self, key_name: &str, ranker: Ranker) {
        match ranker {
            Ranker::Histogram(histogram) => {
                self.histogram.insert(key_name.to_string(), histogram);
            }
            Ranker::Sample(sample) => {
                self.sample.insert(key_name.to_string(), sample);
            }
        }
    }

    fn delete(&mut self, kind: RankerKind, key_name: &str) {
        match kind {
            RankerKind::Histogram => {
                self.histogram.remove(key_name);
            }
            RankerKind::Sample => {
                self.sample.remove(key_name);
            }
        }
    }
}

/// The complete state of an in-process store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(default)]
    live: RankerTable,
    #[serde(default)]
    staging: RankerTable,
    #[serde(default)]
    counters: BTreeMap<String, BrowserCounterRow>,
    #[serde(default)]
    markers: BTreeMap<String, DateTime<Utc>>,
}

impl Tables {
    fn table(&self, namespace: Namespace) -> &RankerTable {
        match namespace {
            Namespace::Live => &self.live,
            Namespace::Staging => &self.staging,
        }
    }

    fn table_mut(&mut self, namespace: Namespace) -> &mut RankerTable {
        match namespace {
            Namespace::Live => &mut self.live,
            Namespace::Staging => &mut self.staging,
        }
    }

    pub(crate) fn get_rankers(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) -> Vec<Option<Ranker>> {
        let table = self.table(namespace);
        key_names.iter().map(|key_name| table.get(kind, key_name)).collect()
    }

    pub(crate) fn get_or_insert_ranker(
        &mut self,
        namespace: Namespace,
        key_name: &str,
        default: Ranker,
    ) -> Ranker {
        let table = self.table_mut(namespace);
        if let Some(existing) = table.get(default.kind(), key_name) {
            return existing;
        }
        table.put(key_name, default.clone());
        default
    }

    pub(crate) fn put_rankers(
        &mut self,
        namespace: Namespace,
        rows: &[(String, Ranker)],
    ) {
        let table = self.table_mut(namespace);
        for (key_name, ranker) in rows {
            table.put(key_name, ranker.clone());
        }
    }

    pub(crate) fn delete_rankers(
        &mut self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) {
        let table = self.table_mut(namespace);
        for key_name in key_names {
            table.delete(kind, key_name);
        }
    }

    /// Histogram rows first, then sample rows, each in key order.
    pub(crate) fn scan_rankers(
        &self,
        namespace: Namespace,
        limit: usize,
    ) -> Vec<(String, Ranker)> {
        let table = self.table(namespace);
        let histograms = table.histogram.iter().map(|(key_name, ranker)| {
            (key_name.clone(), Ranker::Histogram(ranker.clone()))
        });
        let samples = table.sample.iter().map(|(key_name, ranker)| {
            (key_name.clone(), Ranker::Sample(ranker.clone()))
        });
        histograms.chain(samples).take(limit).collect()
    }

    pub(crate) fn update_counter<F>(
        &mut self,
        key_name: &str,
        update: F,
    ) -> BrowserCounterRow
    where
        F: FnOnce(Option<BrowserCounterRow>) -> BrowserCounterRow,
    {
        let current = self.counters.get(key_name).cloned();
        let updated = update(current);
        self.counters.insert(key_name.to_string(), updated.clone());
        updated
    }

    pub(crate) fn counters_for_category(
        &self,
        category: &str,
    ) -> Vec<BrowserCounterRow> {
        self.counters
            .values()
            .filter(|row| row.category == category)
            .cloned()
            .collect()
    }

    pub(crate) fn get_marker(&self, name: &str) -> Option<DateTime<Utc>> {
        self.markers.get(name).copied()
    }

    pub(crate) fn set_marker(&mut self, name: &str, at: DateTime<Utc>) {
        self.markers.insert(name.to_string(), at);
    }

    pub(crate) fn clear_marker(&mut self, name: &str) {
        self.markers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram_of(scores: &[i64]) -> Ranker {
        let mut ranker = Ranker::empty(RankerKind::Histogram, 100);
        for &score in scores {
            ranker.add(score);
        }
        ranker
    }

    #[test]
    fn test_get_or_insert_keeps_existing_row() {
        let mut tables = Tables::default();
        tables.put_rankers(Namespace::Live, &[("k".to_string(), histogram_of(&[7]))]);

        let fetched = tables.get_or_insert_ranker(
            Namespace::Live,
            "k",
            Ranker::empty(RankerKind::Histogram, 100),
        );
        assert_eq!(fetched.median(), Some(7));
    }

    #[test]
    fn test_namespaces_are_separate() {
        let mut tables = Tables::default();
        tables.put_rankers(Namespace::Staging, &[("k".to_string(), histogram_of(&[3]))]);

        let keys = vec!["k".to_string()];
        assert_eq!(
            tables.get_rankers(Namespace::Live, RankerKind::Histogram, &keys),
            vec![None]
        );
        assert!(tables.get_rankers(Namespace::Staging, RankerKind::Histogram, &keys)[0]
            .is_some());
    }

    #[test]
    fn test_kinds_are_separate_tables() {
        let mut tables = Tables::default();
        tables.put_rankers(Namespace::Live, &[("k".to_string(), histogram_of(&[3]))]);

        let keys = vec!["k".to_string()];
        assert_eq!(
            tables.get_rankers(Namespace::Live, RankerKind::Sample, &keys),
            vec![None]
        );
    }

    #[test]
    fn test_scan_is_ordered_and_limited() {
        let mut tables = Tables::default();
        let mut sample = Ranker::empty(RankerKind::Sample, 100);
        sample.add(500);
        tables.put_rankers(
            Namespace::Staging,
            &[
                ("b".to_string(), histogram_of(&[1])),
                ("a".to_string(), sample),
                ("c".to_string(), histogram_of(&[2])),
            ],
        );

        let keys: Vec<String> = tables
            .scan_rankers(Namespace::Staging, 10)
            .into_iter()
            .map(|(key_name, _)| key_name)
            .collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
        assert_eq!(tables.scan_rankers(Namespace::Staging, 2).len(), 2);
    }

    #[test]
    fn test_counters_filter_by_category() {
        let mut tables = Tables::default();
        for (key_name, category) in [("a", "cat"), ("b", "dog"), ("c", "cat")] {
            tables.update_counter(key_name, |_| BrowserCounterRow {
                key_name: key_name.to_string(),
                category: category.to_string(),
                browsers: vec!["IE".to_string()],
                count: 1,
            });
        }
        assert_eq!(tables.counters_for_category("cat").len(), 2);
    }
}
