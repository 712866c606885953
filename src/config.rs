//! Engine configuration.
//!
//! Loaded from a JSON file; every field has a default so a file only needs
//! to name what it changes. Test sets are defined here too, together with
//! the threshold policy that scores them.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::MemoryCache;
use crate::errors::{RankerError, Result};
use crate::ranker::sample::MAX_SAMPLE_SIZE;
use crate::repository::{RepositoryOptions, DEFAULT_CACHE_NAMESPACE};
use crate::scoring::{RowSummary, ThresholdPolicy};
use crate::test_set::{BenchmarkTest, TestCatalog, TestSet};

/// One category as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSetConfig {
    pub category: String,
    #[serde(default)]
    pub category_name: String,
    pub tests: Vec<BenchmarkTest>,
    /// Parameters used when a submission sends none.
    #[serde(default)]
    pub default_params: Option<String>,
    #[serde(default)]
    pub policy: ThresholdPolicy,
}

impl TestSetConfig {
    fn build(&self) -> Result<TestSet> {
        for test_key in self.policy.tests.keys() {
            if !self.tests.iter().any(|test| &test.key == test_key) {
                warn!(
                    "Thresholds for unknown test '{}' in category '{}' are ignored",
                    test_key, self.category
                );
            }
        }
        if let RowSummary::PassRate { passed, failed } = &self.policy.row {
            for test_key in [passed, failed] {
                if !self.tests.iter().any(|test| &test.key == test_key) {
                    return Err(RankerError::config(format!(
                        "pass rate of category '{}' names unknown test '{}'",
                        self.category, test_key
                    )));
                }
            }
        }

        let name = if self.category_name.is_empty() {
            self.category.clone()
        } else {
            self.category_name.clone()
        };
        let test_set = TestSet::new(
            self.category.clone(),
            name,
            self.tests.clone(),
            Arc::new(self.policy.clone()),
        )?;
        Ok(match &self.default_params {
            Some(params) => test_set.with_default_params(params.clone()),
            None => test_set,
        })
    }
}

/// Configuration for the ranking engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scores kept by each sample ranker.
    /// Default: 100
    pub max_sample_size: usize,

    /// Base cache namespace; staging appends `_next`.
    /// Default: "result_ranker"
    pub cache_namespace: String,

    /// Deadline for a single store call (in ms).
    /// Default: 5000ms
    pub store_timeout_ms: u64,

    /// Cache entry lifetime (in seconds).
    /// Default: entries never expire
    pub cache_ttl_secs: Option<u64>,

    /// Cache size bound.
    /// Default: unbounded
    pub cache_max_entries: Option<usize>,

    pub test_sets: Vec<TestSetConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sample_size: MAX_SAMPLE_SIZE,
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            store_timeout_ms: 5000,
            cache_ttl_secs: None,
            cache_max_entries: None,
            test_sets: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text).map_err(|e| {
            RankerError::config(format!("Invalid config: {}", e)).with_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the config file at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            RankerError::config(format!("Failed to read config {}", path.display()))
                .with_suggestion("Pass an existing file with --config.")
                .with_source(e)
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sample_size == 0 {
            return Err(RankerError::config("max_sample_size must be at least 1"));
        }
        if self.store_timeout_ms == 0 {
            return Err(RankerError::config("store_timeout_ms must be at least 1"));
        }
        if self.cache_namespace.is_empty() {
            return Err(RankerError::config("cache_namespace is empty"));
        }
        self.build_catalog().map(|_| ())
    }

    /// Every configured test set, in file order.
    pub fn build_catalog(&self) -> Result<TestCatalog> {
        let test_sets = self
            .test_sets
            .iter()
            .map(TestSetConfig::build)
            .collect::<Result<Vec<_>>>()?;
        TestCatalog::new(test_sets)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            cache_namespace: self.cache_namespace.clone(),
            store_timeout: self.store_timeout(),
            sample_capacity: self.max_sample_size,
        }
    }

    pub fn build_cache(&self) -> MemoryCache {
        let mut cache = MemoryCache::new();
        if let Some(ttl) = self.cache_ttl_secs {
            cache = cache.with_ttl(Duration::from_secs(ttl));
        }
        if let Some(max_entries) = self.cache_max_entries {
            cache = cache.with_max_entries(max_entries);
        }
        cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::errors::ErrorKind;
    use crate::stats::get_stats;

    const EXAMPLE: &str = include_str!("../engine.example.json");

    fn test_set(tests: serde_json::Value) -> String {
        serde_json::json!({
            "test_sets": [{"category": "cat", "tests": tests}]
        })
        .to_string()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_sample_size, 100);
        assert_eq!(config.cache_namespace, "result_ranker");
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert!(config.test_sets.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_example_config() {
        let config = EngineConfig::from_json(EXAMPLE).unwrap();
        let catalog = config.build_catalog().unwrap();
        assert_eq!(catalog.len(), 2);

        let selectors = catalog.require("selectors").unwrap();
        let raw = [
            ("passed".to_string(), Some(2050)),
            ("failed".to_string(), Some(3)),
        ]
        .into_iter()
        .collect();
        let row = get_stats(selectors, &raw);
        assert_eq!(row.results["passed"].score, 9);
        assert_eq!(row.results["failed"].score, 9);
        assert_eq!(row.summary_display, "99.9%");

        let options = config.repository_options();
        assert_eq!(options.sample_capacity, 100);
        assert_eq!(options.cache_namespace, "result_ranker");
    }

    #[test]
    fn test_rejects_bad_test_sets() {
        let duplicate = test_set(serde_json::json!([
            {"key": "a", "name": "A", "min_value": 0, "max_value": 1},
            {"key": "a", "name": "A", "min_value": 0, "max_value": 1}
        ]));
        let inverted = test_set(serde_json::json!([
            {"key": "a", "name": "A", "min_value": 5, "max_value": 1}
        ]));
        let unnamed = serde_json::json!({
            "test_sets": [{"category": "", "tests": []}]
        })
        .to_string();

        for text in [duplicate, inverted, unnamed] {
            let err = EngineConfig::from_json(&text).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Config);
        }
    }

    #[test]
    fn test_rejects_zero_sample_size() {
        let err = EngineConfig::from_json(r#"{"max_sample_size": 0}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_pass_rate_needs_known_tests() {
        let text = serde_json::json!({
            "test_sets": [{
                "category": "cat",
                "tests": [{"key": "passed", "name": "P", "min_value": 0, "max_value": 10}],
                "policy": {"row": {"type": "pass_rate", "passed": "passed", "failed": "nope"}}
            }]
        })
        .to_string();
        assert!(EngineConfig::from_json(&text).is_err());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = EngineConfig::from_json("{not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/engine.json"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert!(err.suggestion.is_some());
    }

    #[tokio::test]
    async fn test_build_cache_applies_bounds() {
        let config = EngineConfig {
            cache_max_entries: Some(1),
            ..EngineConfig::default()
        };
        let cache = config.build_cache();
        for key in ["a", "b", "c"] {
            cache.set("ns", key, vec![1]).await;
        }
        assert!(cache.len().await <= 1);
    }
}
