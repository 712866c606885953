//! Turning medians into normalized table scores.
//!
//! Every test set carries a [`ScoringPolicy`] that maps one test's raw
//! median to a 1 to 10 score plus a display string, and folds a row of
//! per-test results into a summary cell. [`ThresholdPolicy`] is the
//! configuration-driven implementation used by the command line tool.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::stats::{RawScores, TestResult};
use crate::test_set::{BenchmarkTest, ParsedResults};

/// Display string for a passing boolean test.
pub const STATS_SCORE_TRUE: &str = "yes";

/// Display string for a failing boolean test.
pub const STATS_SCORE_FALSE: &str = "no";

/// Fixed scores for boolean tests.
pub mod boolean_scores {
    /// Score of a passing boolean test.
    pub const TRUE: i64 = 10;
    /// Score of a failing boolean test.
    pub const FALSE: i64 = 1;
}

/// Lowest and highest normalized scores.
pub const MIN_NORMALIZED_SCORE: i64 = 1;
pub const MAX_NORMALIZED_SCORE: i64 = 10;

/// Convert a value from the 1 to 100 range to the 1 to 10 range.
///
/// Rounds half up and never returns less than 1.
pub fn convert_100_to_10_base(value: i64) -> i64 {
    (value + 5).div_euclid(10).max(MIN_NORMALIZED_SCORE)
}

/// A test set's extension point for scoring.
pub trait ScoringPolicy: Send + Sync + fmt::Debug {
    /// Score one custom test. `raw_scores` holds the whole row so a policy
    /// can relate tests to each other.
    fn test_score_and_display(
        &self,
        test: &BenchmarkTest,
        raw_scores: &RawScores,
    ) -> (i64, String);

    /// Fold a row of per-test results into its summary cell.
    fn row_score_and_display(
        &self,
        results: &BTreeMap<String, TestResult>,
    ) -> (i64, String);

    /// Rewrite parsed submission scores before they are ranked.
    fn adjust_results(&self, results: ParsedResults) -> ParsedResults {
        results
    }
}

/// Whether larger raw scores are better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}

/// One rung of a threshold ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    /// Minimum raw score (or maximum, for lower-is-better tests).
    pub bound: i64,
    pub score: i64,
}

/// The ladder for one test, checked in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestThresholds {
    #[serde(default)]
    pub direction: Direction,
    pub thresholds: Vec<Threshold>,
    /// Score when no rung matches.
    #[serde(default = "default_floor_score")]
    pub floor_score: i64,
}

fn default_floor_score() -> i64 {
    MIN_NORMALIZED_SCORE
}

impl TestThresholds {
    fn score(&self, raw_score: i64) -> i64 {
        self.thresholds
            .iter()
            .find(|threshold| match self.direction {
                Direction::HigherIsBetter => raw_score >= threshold.bound,
                Direction::LowerIsBetter => raw_score <= threshold.bound,
            })
            .map(|threshold| threshold.score)
            .unwrap_or(self.floor_score)
    }
}

/// How a row summary is computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowSummary {
    /// Mean of the scored tests, shown as `n/10`.
    #[default]
    Average,
    /// Mean of the scored tests, showing the sum of their raw scores.
    Sum,
    /// Share of passed checks, from two count tests.
    PassRate { passed: String, failed: String },
}

/// A scoring policy driven entirely by configuration.
///
/// Custom tests without a ladder are scaled linearly from their declared
/// range onto 1 to 10.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    #[serde(default)]
    pub tests: BTreeMap<String, TestThresholds>,
    #[serde(default)]
    pub row: RowSummary,
}

impl ThresholdPolicy {
    pub fn new(row: RowSummary) -> Self {
        Self { tests: BTreeMap::new(), row }
    }

    /// Add a threshold ladder for `test_key`.
    pub fn with_test(
        mut self,
        test_key: impl Into<String>,
        thresholds: TestThresholds,
    ) -> Self {
        self.tests.insert(test_key.into(), thresholds);
        self
    }

    fn scaled_score(test: &BenchmarkTest, raw_score: i64) -> i64 {
        let span = test.max_value - test.min_value;
        if span <= 0 {
            return MAX_NORMALIZED_SCORE;
        }
        let offset = raw_score.clamp(test.min_value, test.max_value) - test.min_value;
        let percent = i64::try_from(i128::from(offset) * 100 / i128::from(span))
            .unwrap_or(100);
        convert_100_to_10_base(percent)
    }

    fn scored(results: &BTreeMap<String, TestResult>) -> Vec<&TestResult> {
        results.values().filter(|result| result.raw_score.is_some()).collect()
    }
}

impl ScoringPolicy for ThresholdPolicy {
    fn test_score_and_display(
        &self,
        test: &BenchmarkTest,
        raw_scores: &RawScores,
    ) -> (i64, String) {
        let raw_score = raw_scores.get(&test.key).copied().flatten().unwrap_or(0);
        let score = match self.tests.get(&test.key) {
            Some(ladder) => ladder.score(raw_score),
            None => Self::scaled_score(test, raw_score),
        };
        (score, raw_score.to_string())
    }

    fn row_score_and_display(
        &self,
        results: &BTreeMap<String, TestResult>,
    ) -> (i64, String) {
        match &self.row {
            RowSummary::Average | RowSummary::Sum => {
                let scored = Self::scored(results);
                if scored.is_empty() {
                    return (0, String::new());
                }
                let count = scored.len() as i64;
                let total: i64 = scored.iter().map(|result| result.score).sum();
                // Rounded mean.
                let mean = (total * 2 + count).div_euclid(count * 2);
                let display = match self.row {
                    RowSummary::Sum => scored
                        .iter()
                        .filter_map(|result| result.raw_score)
                        .sum::<i64>()
                        .to_string(),
                    _ => format!("{}/{}", mean, MAX_NORMALIZED_SCORE),
                };
                (mean, display)
            }
            RowSummary::PassRate { passed, failed } => {
                let passed = results.get(passed).and_then(|result| result.raw_score);
                let failed = results.get(failed).and_then(|result| result.raw_score);
                match (passed, failed) {
                    (Some(passed), Some(failed)) if passed + failed > 0 => {
                        let percent = 100.0 * passed as f64 / (passed + failed) as f64;
                        if percent > 0.0 {
                            (
                                convert_100_to_10_base(percent as i64),
                                format!("{:.1}%", percent),
                            )
                        } else {
                            (MIN_NORMALIZED_SCORE, "0%".to_string())
                        }
                    }
                    (Some(_), Some(_)) => (MIN_NORMALIZED_SCORE, "0%".to_string()),
                    _ => (0, String::new()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(raw_score: Option<i64>, score: i64) -> TestResult {
        TestResult { raw_score, score, display: String::new() }
    }

    fn selectors_policy() -> ThresholdPolicy {
        ThresholdPolicy::new(RowSummary::PassRate {
            passed: "passed".to_string(),
            failed: "failed".to_string(),
        })
        .with_test(
            "passed",
            TestThresholds {
                direction: Direction::HigherIsBetter,
                thresholds: vec![
                    Threshold { bound: 2100, score: 10 },
                    Threshold { bound: 2000, score: 9 },
                    Threshold { bound: 1950, score: 8 },
                    Threshold { bound: 1800, score: 7 },
                ],
                floor_score: 5,
            },
        )
        .with_test(
            "failed",
            TestThresholds {
                direction: Direction::LowerIsBetter,
                thresholds: vec![
                    Threshold { bound: 0, score: 10 },
                    Threshold { bound: 5, score: 9 },
                    Threshold { bound: 20, score: 8 },
                ],
                floor_score: 5,
            },
        )
    }

    #[test]
    fn test_convert_100_to_10_base() {
        assert_eq!(convert_100_to_10_base(0), 1);
        assert_eq!(convert_100_to_10_base(4), 1);
        assert_eq!(convert_100_to_10_base(15), 2);
        assert_eq!(convert_100_to_10_base(94), 9);
        assert_eq!(convert_100_to_10_base(95), 10);
        assert_eq!(convert_100_to_10_base(100), 10);
    }

    #[test]
    fn test_threshold_ladders() {
        let policy = selectors_policy();
        let passed = BenchmarkTest::new("passed", "Passed", 0, 2200);
        let failed = BenchmarkTest::new("failed", "Failed", 0, 2200);

        let raw: RawScores =
            [("passed".to_string(), Some(2050)), ("failed".to_string(), Some(3))].into();
        assert_eq!(policy.test_score_and_display(&passed, &raw), (9, "2050".to_string()));
        assert_eq!(policy.test_score_and_display(&failed, &raw), (9, "3".to_string()));

        let raw: RawScores =
            [("passed".to_string(), Some(10)), ("failed".to_string(), Some(500))].into();
        assert_eq!(policy.test_score_and_display(&passed, &raw).0, 5);
        assert_eq!(policy.test_score_and_display(&failed, &raw).0, 5);
    }

    #[test]
    fn test_linear_fallback() {
        let policy = ThresholdPolicy::default();
        let test = BenchmarkTest::new("speed", "Speed", 0, 1000);
        let raw: RawScores = [("speed".to_string(), Some(500))].into();
        assert_eq!(policy.test_score_and_display(&test, &raw), (5, "500".to_string()));

        let raw: RawScores = [("speed".to_string(), Some(5000))].into();
        assert_eq!(policy.test_score_and_display(&test, &raw).0, 10);
    }

    #[test]
    fn test_pass_rate_row() {
        let policy = selectors_policy();
        let results: BTreeMap<String, TestResult> = [
            ("passed".to_string(), result(Some(90), 5)),
            ("failed".to_string(), result(Some(10), 5)),
        ]
        .into();
        assert_eq!(policy.row_score_and_display(&results), (9, "90.0%".to_string()));

        let results: BTreeMap<String, TestResult> = [
            ("passed".to_string(), result(Some(0), 5)),
            ("failed".to_string(), result(Some(10), 5)),
        ]
        .into();
        assert_eq!(policy.row_score_and_display(&results), (1, "0%".to_string()));

        let results: BTreeMap<String, TestResult> =
            [("passed".to_string(), result(Some(90), 5))].into();
        assert_eq!(policy.row_score_and_display(&results), (0, String::new()));
    }

    #[test]
    fn test_average_row_ignores_missing() {
        let policy = ThresholdPolicy::default();
        let results: BTreeMap<String, TestResult> = [
            ("a".to_string(), result(Some(1), 10)),
            ("b".to_string(), result(Some(0), 1)),
            ("c".to_string(), result(None, 0)),
        ]
        .into();
        assert_eq!(policy.row_score_and_display(&results), (6, "6/10".to_string()));
    }

    #[test]
    fn test_sum_row_displays_raw_total() {
        let policy = ThresholdPolicy::new(RowSummary::Sum);
        let results: BTreeMap<String, TestResult> = [
            ("a".to_string(), result(Some(40), 4)),
            ("b".to_string(), result(Some(60), 6)),
        ]
        .into();
        assert_eq!(policy.row_score_and_display(&results), (5, "100".to_string()));
    }

    #[test]
    fn test_empty_row() {
        let policy = ThresholdPolicy::default();
        assert_eq!(
            policy.row_score_and_display(&BTreeMap::new()),
            (0, String::new())
        );
    }

    #[test]
    fn test_policy_from_json() {
        let policy: ThresholdPolicy = serde_json::from_str(
            r#"{
                "row": {"type": "pass_rate", "passed": "passed", "failed": "failed"},
                "tests": {
                    "failed": {
                        "direction": "lower_is_better",
                        "thresholds": [{"bound": 0, "score": 10}]
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(policy.tests["failed"].floor_score, 1);
        assert!(matches!(policy.row, RowSummary::PassRate { .. }));
    }
}
