//! Per-browser stats tables built from live rankers.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::browser_counter::{self, VersionLevel};
use crate::cache::Cache;
use crate::errors::Result;
use crate::key::Namespace;
use crate::repository::RankerRepository;
use crate::scoring::{boolean_scores, STATS_SCORE_FALSE, STATS_SCORE_TRUE};
use crate::store::Store;
use crate::test_set::TestSet;

/// Medians keyed by test key; `None` when a test has no data yet.
pub type RawScores = BTreeMap<String, Option<i64>>;

/// One table cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub raw_score: Option<i64>,
    /// Normalized score from 1 to 10, or 0 without data.
    pub score: i64,
    pub display: String,
}

impl TestResult {
    /// The cell for a test with no data.
    pub fn blank() -> Self {
        Self { raw_score: None, score: 0, display: String::new() }
    }
}

/// One table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowStats {
    pub summary_score: i64,
    pub summary_display: String,
    pub results: BTreeMap<String, TestResult>,
    pub total_runs: u64,
}

/// Score a row of medians with the test set's policy.
///
/// Unknown test keys and hidden tests are left out of the row.
pub fn get_stats(test_set: &TestSet, raw_scores: &RawScores) -> RowStats {
    let policy = test_set.policy();
    let mut results = BTreeMap::new();

    for (test_key, raw_score) in raw_scores {
        let Some(test) = test_set.get_test(test_key) else {
            warn!(
                "Skipping stats for unknown test '{}' in category '{}'",
                test_key,
                test_set.category()
            );
            continue;
        };
        if !test.is_visible() {
            continue;
        }

        let result = match raw_score {
            None => TestResult::blank(),
            Some(raw) if test_set.is_boolean_test(test_key) => {
                let (score, display) = if *raw != 0 {
                    (boolean_scores::TRUE, STATS_SCORE_TRUE)
                } else {
                    (boolean_scores::FALSE, STATS_SCORE_FALSE)
                };
                TestResult {
                    raw_score: Some(*raw),
                    score,
                    display: display.to_string(),
                }
            }
            Some(raw) => {
                let (score, display) =
                    policy.test_score_and_display(test, raw_scores);
                TestResult { raw_score: Some(*raw), score, display }
            }
        };
        results.insert(test_key.clone(), result);
    }

    let (summary_score, summary_display) = policy.row_score_and_display(&results);
    RowStats { summary_score, summary_display, results, total_runs: 0 }
}

/// Stats for one browser of a category table.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserStats {
    pub browser: String,
    #[serde(flatten)]
    pub row: RowStats,
}

/// A complete category table.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub category_name: String,
    pub level: Option<VersionLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_str: Option<String>,
    pub browsers: Vec<BrowserStats>,
}

/// Builds category tables from browser counters and live rankers.
pub struct CategoryStatsManager<'a, S, C> {
    repository: &'a RankerRepository<S, C>,
}

impl<'a, S: Store, C: Cache> CategoryStatsManager<'a, S, C> {
    pub fn new(repository: &'a RankerRepository<S, C>) -> Self {
        Self { repository }
    }

    /// Live medians of every test for one browser.
    ///
    /// `params_str` selects a parameter set; `None` means the test set's
    /// default parameters.
    pub async fn get_medians(
        &self,
        test_set: &TestSet,
        browser: &str,
        params_str: Option<&str>,
    ) -> Result<RawScores> {
        let lookups = test_set.lookups(browser, params_str);
        let batch = self
            .repository
            .get_rankers(Namespace::Live, &lookups, false)
            .await?;
        for (key_name, err) in &batch.failures {
            warn!("Ignoring unreadable ranker {}: {}", key_name, err.message);
        }

        let mut raw_scores = RawScores::new();
        for (test, entry) in test_set.tests().iter().zip(batch.rankers) {
            let median = match entry {
                Some(entry) => entry.median_and_num_scores().0,
                None => {
                    debug!(
                        "No ranker for {}/{} on {}",
                        test_set.category(),
                        test.key,
                        browser
                    );
                    None
                }
            };
            raw_scores.insert(test.key.clone(), median);
        }
        Ok(raw_scores)
    }

    /// The stats table for a category.
    ///
    /// Rows follow [`browser_counter::get_counts`]: an explicit browser list
    /// wins over `level`, and without either the top browsers are used.
    pub async fn get_stats(
        &self,
        test_set: &TestSet,
        level: Option<VersionLevel>,
        browsers: Option<&[String]>,
        params_str: Option<&str>,
    ) -> Result<CategoryStats> {
        let counts = browser_counter::get_counts(
            self.repository,
            test_set.category(),
            level,
            browsers,
        )
        .await?;

        let mut rows = Vec::with_capacity(counts.len());
        for (browser, total_runs) in counts {
            let medians = self.get_medians(test_set, &browser, params_str).await?;
            let mut row = get_stats(test_set, &medians);
            row.total_runs = total_runs;
            rows.push(BrowserStats { browser, row });
        }

        Ok(CategoryStats {
            timestamp: Utc::now(),
            category: test_set.category().to_string(),
            category_name: test_set.category_name().to_string(),
            level,
            params_str: params_str.map(str::to_string),
            browsers: rows,
        })
    }
}
