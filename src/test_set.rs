//! Benchmark test definitions grouped by category.
//!
//! A [`TestSet`] owns every test of one category together with the
//! [`ScoringPolicy`] that turns medians into table cells. Submissions
//! arrive as `"key=score,key=score"` strings and must name every test of
//! the set exactly once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{RankerError, Result};
use crate::key::RankerKey;
use crate::ranker::RankerKind;
use crate::repository::RankerLookup;
use crate::scoring::ScoringPolicy;

/// Parsed submission scores keyed by test key.
pub type ParsedResults = BTreeMap<String, i64>;

/// How a test's raw score is turned into a table cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreType {
    /// Range `[0, 1]`; rendered as yes/no.
    Boolean,
    /// Anything else; rendered by the test set's policy.
    Custom,
}

/// A single benchmark test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkTest {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub doc: String,
    #[serde(default)]
    pub url: String,
    pub min_value: i64,
    pub max_value: i64,
    /// Hidden tests are ranked but left out of stats tables.
    #[serde(default)]
    pub is_hidden_stat: bool,
}

impl BenchmarkTest {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        min_value: i64,
        max_value: i64,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            doc: String::new(),
            url: String::new(),
            min_value,
            max_value,
            is_hidden_stat: false,
        }
    }

    /// Mark the test as hidden from stats tables.
    pub fn hidden(mut self) -> Self {
        self.is_hidden_stat = true;
        self
    }

    pub fn score_type(&self) -> ScoreType {
        if (self.min_value, self.max_value) == (0, 1) {
            ScoreType::Boolean
        } else {
            ScoreType::Custom
        }
    }

    /// The ranker variant this test's bounds call for.
    pub fn ranker_kind(&self) -> RankerKind {
        RankerKind::for_bounds(self.min_value, self.max_value)
    }

    pub fn is_visible(&self) -> bool {
        !self.is_hidden_stat
    }
}

/// All tests of one category.
#[derive(Clone)]
pub struct TestSet {
    category: String,
    category_name: String,
    tests: Vec<BenchmarkTest>,
    default_params: Option<String>,
    policy: Arc<dyn ScoringPolicy>,
}

impl fmt::Debug for TestSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSet")
            .field("category", &self.category)
            .field("category_name", &self.category_name)
            .field("tests", &self.tests)
            .field("default_params", &self.default_params)
            .field("policy", &self.policy)
            .finish()
    }
}

impl TestSet {
    /// Build a test set, rejecting inconsistent definitions.
    pub fn new(
        category: impl Into<String>,
        category_name: impl Into<String>,
        tests: Vec<BenchmarkTest>,
        policy: Arc<dyn ScoringPolicy>,
    ) -> Result<Self> {
        let category = category.into();
        if category.is_empty() {
            return Err(RankerError::config("test set category is empty"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for test in &tests {
            if !seen.insert(test.key.as_str()) {
                return Err(RankerError::config(format!(
                    "test key '{}' appears twice in category '{}'",
                    test.key, category
                )));
            }
            if test.min_value > test.max_value {
                return Err(RankerError::config(format!(
                    "test '{}' in category '{}' has min_value {} above max_value {}",
                    test.key, category, test.min_value, test.max_value
                )));
            }
        }
        Ok(Self {
            category,
            category_name: category_name.into(),
            tests,
            default_params: None,
            policy,
        })
    }

    /// Parameters used when a caller supplies none.
    pub fn with_default_params(mut self, params: impl Into<String>) -> Self {
        self.default_params = Some(params.into());
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn category_name(&self) -> &str {
        &self.category_name
    }

    pub fn tests(&self) -> &[BenchmarkTest] {
        &self.tests
    }

    pub fn default_params(&self) -> Option<&str> {
        self.default_params.as_deref()
    }

    pub fn policy(&self) -> &dyn ScoringPolicy {
        self.policy.as_ref()
    }

    /// The test for `test_key`; `None` for keys that were removed from the
    /// set but may still have persisted data.
    pub fn get_test(&self, test_key: &str) -> Option<&BenchmarkTest> {
        self.tests.iter().find(|test| test.key == test_key)
    }

    pub fn is_visible_test(&self, test_key: &str) -> bool {
        self.get_test(test_key).is_some_and(BenchmarkTest::is_visible)
    }

    pub fn is_boolean_test(&self, test_key: &str) -> bool {
        self.get_test(test_key)
            .is_some_and(|test| test.score_type() == ScoreType::Boolean)
    }

    /// Test keys in sorted order.
    pub fn test_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> =
            self.tests.iter().map(|test| test.key.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// Parse a `"key=score,key=score"` submission.
    ///
    /// The keys must match the set's tests exactly and every score must be
    /// an integer; otherwise nothing is returned.
    pub fn parse_results(&self, results_str: &str) -> Result<ParsedResults> {
        let mut pairs = Vec::new();
        for part in results_str.split(',') {
            let (key, score) = part.split_once('=').ok_or_else(|| {
                RankerError::malformed(format!(
                    "result '{}' is not of the form key=score",
                    part
                ))
            })?;
            pairs.push((key, score));
        }

        let mut actual: Vec<&str> = pairs.iter().map(|(key, _)| *key).collect();
        actual.sort_unstable();
        let expected = self.test_keys();
        if actual != expected {
            return Err(RankerError::malformed(format!(
                "Keys mismatch: expected={:?}, actual={:?}",
                expected, actual
            )));
        }

        pairs
            .into_iter()
            .map(|(key, score)| {
                let score = score.trim().parse::<i64>().map_err(|e| {
                    RankerError::malformed(format!(
                        "score '{}' for test '{}' is not an integer",
                        score, key
                    ))
                    .with_source(e)
                })?;
                Ok((key.to_string(), score))
            })
            .collect()
    }

    /// Parse a submission and let the policy rewrite it.
    pub fn get_results(&self, results_str: &str) -> Result<ParsedResults> {
        let parsed = self.parse_results(results_str)?;
        Ok(self.policy.adjust_results(parsed))
    }

    /// One ranker lookup per test for `browser`.
    ///
    /// `params_str` falls back to the set's default parameters.
    pub fn lookups(
        &self,
        browser: &str,
        params_str: Option<&str>,
    ) -> Vec<RankerLookup> {
        let params_str = params_str.or(self.default_params.as_deref());
        self.tests
            .iter()
            .map(|test| {
                RankerLookup::new(
                    RankerKey::new(&self.category, &test.key, browser, params_str),
                    test.ranker_kind(),
                )
            })
            .collect()
    }
}

/// Every configured test set, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct TestCatalog {
    test_sets: Vec<TestSet>,
}

impl TestCatalog {
    /// Build a catalog, rejecting duplicate categories.
    pub fn new(test_sets: Vec<TestSet>) -> Result<Self> {
        for (index, test_set) in test_sets.iter().enumerate() {
            if test_sets[..index]
                .iter()
                .any(|other| other.category == test_set.category)
            {
                return Err(RankerError::config(format!(
                    "category '{}' is defined twice",
                    test_set.category
                )));
            }
        }
        Ok(Self { test_sets })
    }

    pub fn get(&self, category: &str) -> Option<&TestSet> {
        self.test_sets.iter().find(|test_set| test_set.category == category)
    }

    /// Like [`TestCatalog::get`] but a missing category is an error.
    pub fn require(&self, category: &str) -> Result<&TestSet> {
        self.get(category).ok_or_else(|| {
            RankerError::not_found(format!("unknown category '{}'", category))
        })
    }

    /// The test set at `index` in configuration order.
    pub fn by_index(&self, index: usize) -> Option<&TestSet> {
        self.test_sets.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestSet> {
        self.test_sets.iter()
    }

    pub fn len(&self) -> usize {
        self.test_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.test_sets.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::scoring::ThresholdPolicy;

    /// The three-test set used across the crate's tests: one histogram
    /// test and two sample tests.
    pub(crate) fn fruit_set() -> TestSet {
        TestSet::new(
            "cat",
            "Fruit",
            vec![
                BenchmarkTest::new("apple", "Apple", 0, 1),
                BenchmarkTest::new("banana", "Banana", 0, 100),
                BenchmarkTest::new("coconut", "Coconut", 0, 1000),
            ],
            Arc::new(ThresholdPolicy::default()),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::fruit_set;
    use super::*;
    use crate::errors::ErrorKind;
    use crate::scoring::ThresholdPolicy;

    #[test]
    fn test_score_types() {
        assert_eq!(BenchmarkTest::new("a", "A", 0, 1).score_type(), ScoreType::Boolean);
        assert_eq!(BenchmarkTest::new("a", "A", 0, 2).score_type(), ScoreType::Custom);
    }

    #[test]
    fn test_ranker_kinds() {
        let test_set = fruit_set();
        let kinds: Vec<RankerKind> =
            test_set.tests().iter().map(BenchmarkTest::ranker_kind).collect();
        assert_eq!(
            kinds,
            vec![RankerKind::Histogram, RankerKind::Histogram, RankerKind::Sample]
        );
    }

    #[test]
    fn test_parse_results() {
        let parsed = fruit_set()
            .parse_results("apple=1,banana=20,coconut=400")
            .unwrap();
        assert_eq!(parsed["apple"], 1);
        assert_eq!(parsed["banana"], 20);
        assert_eq!(parsed["coconut"], 400);
    }

    #[test]
    fn test_parse_results_any_order() {
        let parsed = fruit_set()
            .parse_results("coconut=400,apple=1,banana=20")
            .unwrap();
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_parse_results_missing_key() {
        let err = fruit_set().parse_results("apple=1,banana=20").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
        assert!(err.message.contains("Keys mismatch"));
    }

    #[test]
    fn test_parse_results_unknown_key() {
        let err = fruit_set()
            .parse_results("apple=1,banana=20,coconut=4,durian=5")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn test_parse_results_duplicate_key() {
        let err = fruit_set()
            .parse_results("apple=1,apple=1,banana=20")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn test_parse_results_bad_value() {
        let err = fruit_set()
            .parse_results("apple=1,banana=2.5,coconut=4")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
        assert!(err.message.contains("banana"));
    }

    #[test]
    fn test_parse_results_no_equals() {
        let err = fruit_set().parse_results("apple").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn test_visibility() {
        let test_set = TestSet::new(
            "cat",
            "Cat",
            vec![
                BenchmarkTest::new("shown", "Shown", 0, 1),
                BenchmarkTest::new("secret", "Secret", 0, 1).hidden(),
            ],
            Arc::new(ThresholdPolicy::default()),
        )
        .unwrap();
        assert!(test_set.is_visible_test("shown"));
        assert!(!test_set.is_visible_test("secret"));
        assert!(!test_set.is_visible_test("missing"));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let err = TestSet::new(
            "cat",
            "Cat",
            vec![BenchmarkTest::new("a", "A", 0, 1), BenchmarkTest::new("a", "A", 0, 1)],
            Arc::new(ThresholdPolicy::default()),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = TestSet::new(
            "cat",
            "Cat",
            vec![BenchmarkTest::new("a", "A", 10, 1)],
            Arc::new(ThresholdPolicy::default()),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_lookups_use_default_params() {
        let test_set = fruit_set().with_default_params("mode=fast");
        let lookups = test_set.lookups("Firefox 3", None);
        assert_eq!(lookups.len(), 3);
        assert_eq!(lookups[0].key.params_str.as_deref(), Some("mode=fast"));
        assert_eq!(lookups[2].kind, RankerKind::Sample);

        let explicit = test_set.lookups("Firefox 3", Some("mode=slow"));
        assert_eq!(explicit[0].key.params_str.as_deref(), Some("mode=slow"));
    }

    #[test]
    fn test_catalog_rejects_duplicate_categories() {
        let err = TestCatalog::new(vec![fruit_set(), fruit_set()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = TestCatalog::new(vec![fruit_set()]).unwrap();
        assert!(catalog.get("cat").is_some());
        assert_eq!(catalog.by_index(0).map(TestSet::category), Some("cat"));
        assert_eq!(
            catalog.require("dog").unwrap_err().kind,
            ErrorKind::NotFound
        );
    }
}
