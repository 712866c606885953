//! Cache and store façade for rankers.
//!
//! Reads go to the cache first and fall back to one batched store lookup
//! per ranker kind, backfilling the cache with whatever the store returns.
//! Writes go to the store first and then to the cache. A failed store
//! write evicts the cache entry, so the cache never serves state the store
//! does not have. Every store call runs under a deadline.

use futures::future::join_all;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::cache::Cache;
use crate::errors::{RankerError, Result};
use crate::key::{Namespace, RankerKey};
use crate::ranker::{Rank, Ranker, RankerKind, ScoreAdmission};
use crate::ranker::sample::MAX_SAMPLE_SIZE;
use crate::store::Store;

/// Default base name of the cache namespace.
pub const DEFAULT_CACHE_NAMESPACE: &str = "result_ranker";

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a [`RankerRepository`].
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Base cache namespace; staging appends `_next`.
    pub cache_namespace: String,
    /// Deadline applied to every store call.
    pub store_timeout: Duration,
    /// Capacity applied to sample rankers when they are loaded or created.
    pub sample_capacity: usize,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            sample_capacity: MAX_SAMPLE_SIZE,
        }
    }
}

/// A ranker together with the row it was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct RankerEntry {
    pub key_name: String,
    pub namespace: Namespace,
    pub ranker: Ranker,
}

impl RankerEntry {
    pub fn new(
        key_name: impl Into<String>,
        namespace: Namespace,
        ranker: Ranker,
    ) -> Self {
        Self { key_name: key_name.into(), namespace, ranker }
    }

    pub fn kind(&self) -> RankerKind {
        self.ranker.kind()
    }

    pub fn median_and_num_scores(&self) -> (Option<i64>, u64) {
        self.ranker.median_and_num_scores()
    }
}

/// One ranker to look up: its logical key and the kind its test uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankerLookup {
    pub key: RankerKey,
    pub kind: RankerKind,
}

impl RankerLookup {
    pub fn new(key: RankerKey, kind: RankerKind) -> Self {
        Self { key, kind }
    }
}

/// Result of a batch read.
#[derive(Debug, Default)]
pub struct BatchRankers {
    /// One slot per lookup, in input order; `None` when missing or corrupt.
    pub rankers: Vec<Option<RankerEntry>>,
    /// Keys whose cached state could not be decoded.
    pub failures: Vec<(String, RankerError)>,
}

/// Rankers of one kind fetched in a single pass.
struct KindFetch {
    rankers: Vec<Option<Ranker>>,
    failures: Vec<(String, RankerError)>,
}

/// Access to persisted rankers through the cache.
pub struct RankerRepository<S, C> {
    store: S,
    cache: C,
    options: RepositoryOptions,
}

impl<S: Store, C: Cache> RankerRepository<S, C> {
    pub fn new(store: S, cache: C, options: RepositoryOptions) -> Self {
        Self { store, cache, options }
    }

    /// The underlying durable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The cache tier.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    /// The cache namespace used for `namespace`.
    pub fn cache_namespace(&self, namespace: Namespace) -> String {
        namespace.cache_namespace(&self.options.cache_namespace)
    }

    /// Run a store call under the configured deadline.
    pub async fn with_deadline<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout(self.options.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RankerError::timeout(format!(
                "store {} did not finish within {:?}",
                operation, self.options.store_timeout
            ))),
        }
    }

    async fn fetch_kind(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
        cache_only: bool,
    ) -> Result<KindFetch> {
        let cache_namespace = self.cache_namespace(namespace);
        let capacity = self.options.sample_capacity;
        let cached = self.cache.get_multi(&cache_namespace, key_names).await;

        let mut rankers = vec![None; key_names.len()];
        let mut failures = Vec::new();
        let mut misses = Vec::new();
        for (index, key_name) in key_names.iter().enumerate() {
            let Some(bytes) = cached.get(key_name) else {
                misses.push(index);
                continue;
            };
            match Ranker::decode_as(kind, bytes, capacity) {
                Ok(ranker) => rankers[index] = Some(ranker),
                Err(err) => {
                    warn!(
                        "Evicting undecodable cache entry {}/{}: {}",
                        cache_namespace, key_name, err.message
                    );
                    self.cache.delete(&cache_namespace, key_name).await;
                    failures.push((key_name.clone(), err));
                }
            }
        }

        if cache_only || misses.is_empty() {
            return Ok(KindFetch { rankers, failures });
        }

        let miss_keys: Vec<String> =
            misses.iter().map(|&index| key_names[index].clone()).collect();
        debug!(
            "Cache missed {} of {} {} rankers in {}",
            miss_keys.len(),
            key_names.len(),
            kind,
            namespace
        );
        let fetched = self
            .with_deadline(
                "get",
                self.store.get_rankers(namespace, kind, &miss_keys),
            )
            .await?;
        for (index, ranker) in misses.into_iter().zip(fetched) {
            if let Some(ranker) = ranker {
                let ranker = ranker.resized(capacity);
                self.cache
                    .set(&cache_namespace, &key_names[index], ranker.encode())
                    .await;
                rankers[index] = Some(ranker);
            }
        }
        Ok(KindFetch { rankers, failures })
    }

    /// Fetch one ranker. Corrupt cached state is an error.
    pub async fn get_ranker(
        &self,
        namespace: Namespace,
        lookup: &RankerLookup,
    ) -> Result<Option<RankerEntry>> {
        let key_name = lookup.key.key_name();
        let mut fetch = self
            .fetch_kind(namespace, lookup.kind, &[key_name.clone()], false)
            .await?;
        if let Some((_, err)) = fetch.failures.pop() {
            return Err(err);
        }
        Ok(fetch
            .rankers
            .pop()
            .flatten()
            .map(|ranker| RankerEntry::new(key_name, namespace, ranker)))
    }

    /// Fetch many rankers, aligned with `lookups`.
    ///
    /// Lookups are grouped by kind and each group is fetched with one
    /// batched call; groups run concurrently. Corrupt cache entries are
    /// reported in [`BatchRankers::failures`] without failing the batch.
    pub async fn get_rankers(
        &self,
        namespace: Namespace,
        lookups: &[RankerLookup],
        cache_only: bool,
    ) -> Result<BatchRankers> {
        let key_names: Vec<String> =
            lookups.iter().map(|lookup| lookup.key.key_name()).collect();

        let mut groups: BTreeMap<RankerKind, Vec<usize>> = BTreeMap::new();
        for (index, lookup) in lookups.iter().enumerate() {
            groups.entry(lookup.kind).or_default().push(index);
        }

        let fetches = join_all(groups.iter().map(|(&kind, indices)| {
            let group_keys: Vec<String> =
                indices.iter().map(|&index| key_names[index].clone()).collect();
            async move {
                self.fetch_kind(namespace, kind, &group_keys, cache_only).await
            }
        }))
        .await;

        let mut batch = BatchRankers {
            rankers: vec![None; lookups.len()],
            failures: Vec::new(),
        };
        for (indices, fetch) in groups.values().zip(fetches) {
            let fetch = fetch?;
            for (&index, ranker) in indices.iter().zip(fetch.rankers) {
                batch.rankers[index] = ranker.map(|ranker| {
                    RankerEntry::new(key_names[index].clone(), namespace, ranker)
                });
            }
            batch.failures.extend(fetch.failures);
        }
        Ok(batch)
    }

    /// Fetch a ranker, creating an empty one if none exists.
    ///
    /// Creation goes through the store's atomic insert-if-absent, so a
    /// concurrent creator's row is returned instead of being overwritten.
    pub async fn get_or_create_ranker(
        &self,
        namespace: Namespace,
        lookup: &RankerLookup,
    ) -> Result<RankerEntry> {
        if let Some(entry) = self.get_cached(namespace, lookup).await? {
            return Ok(entry);
        }
        self.create_ranker(namespace, lookup.key.key_name(), lookup.kind)
            .await
    }

    /// Fetch or create the rankers of one test for several browsers.
    pub async fn get_or_create_rankers(
        &self,
        namespace: Namespace,
        lookups: &[RankerLookup],
    ) -> Result<Vec<RankerEntry>> {
        let mut batch = self.get_rankers(namespace, lookups, false).await?;
        if let Some((_, err)) = batch.failures.pop() {
            return Err(err);
        }

        let created = join_all(
            lookups
                .iter()
                .zip(&batch.rankers)
                .filter(|(_, found)| found.is_none())
                .map(|(lookup, _)| {
                    self.create_ranker(
                        namespace,
                        lookup.key.key_name(),
                        lookup.kind,
                    )
                }),
        )
        .await;

        let mut created = created.into_iter();
        let mut entries = Vec::with_capacity(lookups.len());
        for found in batch.rankers {
            let entry = match found {
                Some(entry) => entry,
                None => created.next().ok_or_else(|| {
                    RankerError::store("ranker creation returned too few rows")
                })??,
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn get_cached(
        &self,
        namespace: Namespace,
        lookup: &RankerLookup,
    ) -> Result<Option<RankerEntry>> {
        let key_name = lookup.key.key_name();
        let mut fetch = self
            .fetch_kind(namespace, lookup.kind, &[key_name.clone()], true)
            .await?;
        if let Some((_, err)) = fetch.failures.pop() {
            return Err(err);
        }
        Ok(fetch
            .rankers
            .pop()
            .flatten()
            .map(|ranker| RankerEntry::new(key_name, namespace, ranker)))
    }

    async fn create_ranker(
        &self,
        namespace: Namespace,
        key_name: String,
        kind: RankerKind,
    ) -> Result<RankerEntry> {
        let capacity = self.options.sample_capacity;
        let ranker = self
            .with_deadline(
                "get_or_insert",
                self.store.get_or_insert_ranker(
                    namespace,
                    &key_name,
                    Ranker::empty(kind, capacity),
                ),
            )
            .await?
            .resized(capacity);
        self.cache
            .set(&self.cache_namespace(namespace), &key_name, ranker.encode())
            .await;
        Ok(RankerEntry::new(key_name, namespace, ranker))
    }

    /// Write one ranker through to the store and the cache.
    pub async fn put(&self, entry: &RankerEntry) -> Result<()> {
        self.put_many(entry.namespace, std::slice::from_ref(entry)).await
    }

    /// Write several rankers of one namespace with a single store call.
    pub async fn put_many(
        &self,
        namespace: Namespace,
        entries: &[RankerEntry],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let cache_namespace = self.cache_namespace(namespace);
        let rows: Vec<(String, Ranker)> = entries
            .iter()
            .map(|entry| (entry.key_name.clone(), entry.ranker.clone()))
            .collect();

        match self
            .with_deadline("put", self.store.put_rankers(namespace, &rows))
            .await
        {
            Ok(()) => {
                for (key_name, ranker) in &rows {
                    self.cache
                        .set(&cache_namespace, key_name, ranker.encode())
                        .await;
                }
                Ok(())
            }
            Err(err) => {
                for (key_name, _) in &rows {
                    self.cache.delete(&cache_namespace, key_name).await;
                }
                Err(err)
            }
        }
    }

    /// Delete rankers of one kind from the store and the cache.
    pub async fn delete_many(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) -> Result<()> {
        if key_names.is_empty() {
            return Ok(());
        }
        let cache_namespace = self.cache_namespace(namespace);
        let result = self
            .with_deadline(
                "delete",
                self.store.delete_rankers(namespace, kind, key_names),
            )
            .await;
        for key_name in key_names {
            self.cache.delete(&cache_namespace, key_name).await;
        }
        result
    }

    /// Up to `limit` rows of a namespace straight from the store.
    pub async fn scan(
        &self,
        namespace: Namespace,
        limit: usize,
    ) -> Result<Vec<RankerEntry>> {
        let capacity = self.options.sample_capacity;
        let rows = self
            .with_deadline("scan", self.store.scan_rankers(namespace, limit))
            .await?;
        Ok(rows
            .into_iter()
            .map(|(key_name, ranker)| {
                RankerEntry::new(key_name, namespace, ranker.resized(capacity))
            })
            .collect())
    }

    /// Record one score and write the ranker through.
    ///
    /// Scores outside a histogram's domain are clamped and logged.
    pub async fn add_score(
        &self,
        entry: &mut RankerEntry,
        score: i64,
    ) -> Result<ScoreAdmission> {
        let admission = entry.ranker.add(score);
        if let ScoreAdmission::Clamped { original, recorded } = admission {
            warn!(
                "Score {} for {} is outside the histogram domain, recorded as {}",
                original, entry.key_name, recorded
            );
        }
        self.put(entry).await?;
        Ok(admission)
    }

    /// Replace a ranker's state and write it through.
    pub async fn set_values(
        &self,
        entry: &mut RankerEntry,
        values: Vec<i64>,
        total_count: u64,
    ) -> Result<()> {
        entry.ranker.set_values(values, total_count)?;
        self.put(entry).await
    }
}
