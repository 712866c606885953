//! Maintenance pipelines: bulk upload, staged rebuild and release.
//!
//! Rebuild and release are driven in steps. Each step does a bounded
//! amount of work and returns the state needed to resume, so a caller can
//! schedule them as short-lived tasks. A rebuild only ever writes the
//! staging namespace; release then promotes staging into live.

pub mod rebuild;
pub mod release;
pub mod upload;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{RankerError, Result};

pub use rebuild::{rebuild_step, RebuildRequest, RebuildResponse};
pub use release::{release_step, ReleaseRequest, ReleaseResponse};
pub use upload::{upload_rankers, UploadResponse, UploadRow};

/// One historical submission as kept by the raw result log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResult {
    /// Position in the log; results are replayed in ascending id order.
    pub id: u64,
    pub category: String,
    pub browsers: Vec<String>,
    #[serde(default)]
    pub params_str: Option<String>,
    pub scores: BTreeMap<String, i64>,
}

/// Read access to the raw result log.
#[allow(async_fn_in_trait)]
pub trait ResultSource: Send + Sync {
    /// Up to `limit` results of `category` with an id above `after`, in id
    /// order.
    async fn fetch(
        &self,
        category: &str,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<RawResult>>;
}

/// A [`ResultSource`] over an in-memory list.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSource {
    results: Vec<RawResult>,
}

impl MemoryResultSource {
    pub fn new(mut results: Vec<RawResult>) -> Self {
        results.sort_by_key(|result| result.id);
        Self { results }
    }

    /// Parse a JSON array of results.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let results: Vec<RawResult> = serde_json::from_slice(bytes).map_err(|e| {
            RankerError::malformed("raw results are not a JSON array of results")
                .with_source(e)
        })?;
        Ok(Self::new(results))
    }

    /// Read a JSON array of results from `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RankerError::not_found(format!(
                "Failed to read raw results from {}",
                path.display()
            ))
            .with_source(e)
        })?;
        Self::from_json(&bytes)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl ResultSource for MemoryResultSource {
    async fn fetch(
        &self,
        category: &str,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<RawResult>> {
        Ok(self
            .results
            .iter()
            .filter(|result| result.category == category)
            .filter(|result| after.is_none_or(|after| result.id > after))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn raw(id: u64, browsers: &[&str], scores: &[(&str, i64)]) -> RawResult {
        RawResult {
            id,
            category: "cat".to_string(),
            browsers: browsers.iter().map(|browser| browser.to_string()).collect(),
            params_str: None,
            scores: scores
                .iter()
                .map(|(key, score)| (key.to_string(), *score))
                .collect(),
        }
    }
}
