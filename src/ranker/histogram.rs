//! Exact median over a small integer domain.

use serde::{Deserialize, Serialize};

use super::{Rank, RankerKind, ScoreAdmission};
use crate::codec;
use crate::errors::{RankerError, Result};

/// Per-score observation counts for scores in `[MIN_SCORE, MAX_SCORE]`.
///
/// `counts[score]` is the number of times `score` was observed. The vector
/// only grows as far as the highest score seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramRanker {
    counts: Vec<u64>,
}

impl HistogramRanker {
    /// Lowest representable score.
    pub const MIN_SCORE: i64 = 0;
    /// Highest representable score.
    pub const MAX_SCORE: i64 = 100;
    /// Maximum number of buckets.
    pub const MAX_BUCKETS: usize = Self::MAX_SCORE as usize + 1;

    /// An empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a histogram from existing counts.
    pub fn from_counts(counts: Vec<u64>) -> Result<Self> {
        if counts.len() > Self::MAX_BUCKETS {
            return Err(RankerError::malformed(format!(
                "{} buckets exceed the histogram domain of {}",
                counts.len(),
                Self::MAX_BUCKETS
            )));
        }
        Ok(Self { counts })
    }

    /// The raw counts, indexed by score.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total number of observations.
    pub fn num_scores(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl Rank for HistogramRanker {
    fn kind(&self) -> RankerKind {
        RankerKind::Histogram
    }

    fn add(&mut self, score: i64) -> ScoreAdmission {
        let recorded = score.clamp(Self::MIN_SCORE, Self::MAX_SCORE);
        let index = recorded as usize;
        if index >= self.counts.len() {
            self.counts.resize(index + 1, 0);
        }
        self.counts[index] += 1;

        if recorded == score {
            ScoreAdmission::Accepted
        } else {
            ScoreAdmission::Clamped { original: score, recorded }
        }
    }

    fn set_values(&mut self, values: Vec<i64>, _total_count: u64) -> Result<()> {
        let counts = values
            .into_iter()
            .map(|value| {
                u64::try_from(value).map_err(|_| {
                    RankerError::malformed(format!(
                        "histogram count {} is negative",
                        value
                    ))
                })
            })
            .collect::<Result<Vec<u64>>>()?;
        *self = Self::from_counts(counts)?;
        Ok(())
    }

    fn median_and_num_scores(&self) -> (Option<i64>, u64) {
        let num_scores = self.num_scores();
        if num_scores == 0 {
            return (None, 0);
        }

        let median_rank = num_scores / 2;
        let mut seen = 0u64;
        for (score, count) in self.counts.iter().enumerate() {
            seen += count;
            if median_rank < seen {
                return (Some(score as i64), num_scores);
            }
        }

        // Unreachable while num_scores > 0; the last bucket always exceeds
        // median_rank.
        (self.counts.len().checked_sub(1).map(|s| s as i64), num_scores)
    }

    fn encode(&self) -> Vec<u8> {
        codec::encode_counts(&self.counts)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let counts = codec::decode_counts(bytes, Self::MAX_BUCKETS)?;
        Ok(Self { counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use proptest::prelude::*;

    fn ranker_with(scores: &[i64]) -> HistogramRanker {
        let mut ranker = HistogramRanker::new();
        for &score in scores {
            ranker.add(score);
        }
        ranker
    }

    #[test]
    fn test_add_grows_counts() {
        let mut ranker = HistogramRanker::new();
        ranker.add(2);
        assert_eq!(ranker.counts(), &[0, 0, 1]);
        assert_eq!(ranker.median(), Some(2));

        ranker.add(4);
        assert_eq!(ranker.counts(), &[0, 0, 1, 0, 1]);
        assert_eq!(ranker.median(), Some(4));

        ranker.add(2);
        assert_eq!(ranker.counts(), &[0, 0, 2, 0, 1]);
        assert_eq!(ranker.median(), Some(2));
    }

    #[test]
    fn test_median_of_mixed_counts() {
        let ranker = ranker_with(&[0, 0, 0, 1, 1, 2, 2, 2, 2, 2]);
        assert_eq!(ranker.median_and_num_scores(), (Some(2), 10));
    }

    #[test]
    fn test_empty_median() {
        assert_eq!(HistogramRanker::new().median_and_num_scores(), (None, 0));
    }

    #[test]
    fn test_add_too_big_is_clamped() {
        let mut ranker = HistogramRanker::new();
        let admission = ranker.add(101);
        assert_eq!(
            admission,
            ScoreAdmission::Clamped { original: 101, recorded: 100 }
        );
        assert_eq!(ranker.median(), Some(100));
        assert_eq!(ranker.counts().len(), HistogramRanker::MAX_BUCKETS);
    }

    #[test]
    fn test_add_too_small_is_clamped() {
        let mut ranker = HistogramRanker::new();
        let admission = ranker.add(-1);
        assert_eq!(admission, ScoreAdmission::Clamped { original: -1, recorded: 0 });
        assert_eq!(ranker.median(), Some(0));
    }

    #[test]
    fn test_set_values_replaces_counts() {
        let mut ranker = ranker_with(&[50, 60, 70]);
        ranker.set_values(vec![0, 3, 1, 3], 0).unwrap();
        assert_eq!(ranker.median(), Some(2));

        ranker.set_values(vec![4, 3], 0).unwrap();
        assert_eq!(ranker.counts(), &[4, 3]);
        assert_eq!(ranker.median_and_num_scores(), (Some(0), 7));

        ranker.add(1);
        ranker.add(1);
        assert_eq!(ranker.median(), Some(1));
    }

    #[test]
    fn test_set_values_rejects_negative_counts() {
        let mut ranker = HistogramRanker::new();
        let err = ranker.set_values(vec![1, -2], 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn test_set_values_rejects_oversized_domain() {
        let mut ranker = HistogramRanker::new();
        let err = ranker.set_values(vec![1; 102], 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: the histogram median is the element at sorted index
        /// n/2 and the count is exact.
        #[test]
        fn histogram_median_is_exact(
            scores in prop::collection::vec(0i64..=100, 1..500),
        ) {
            let ranker = ranker_with(&scores);
            let mut sorted = scores.clone();
            sorted.sort_unstable();

            let (median, count) = ranker.median_and_num_scores();
            prop_assert_eq!(count, scores.len() as u64);
            prop_assert_eq!(median, Some(sorted[sorted.len() / 2]));
        }

        /// Property: a second bulk replace leaves no trace of the first.
        #[test]
        fn set_values_overwrites(
            first in prop::collection::vec(0i64..1000, 0..=101),
            second in prop::collection::vec(0i64..1000, 0..=101),
        ) {
            let mut ranker = HistogramRanker::new();
            ranker.set_values(first, 0).unwrap();
            ranker.set_values(second.clone(), 0).unwrap();

            let expected: Vec<u64> = second.iter().map(|&v| v as u64).collect();
            prop_assert_eq!(ranker.counts(), expected.as_slice());
        }

        /// Property: decode(encode(r)) == r.
        #[test]
        fn histogram_round_trips(
            scores in prop::collection::vec(-10i64..=110, 0..300),
        ) {
            let ranker = ranker_with(&scores);
            let decoded = HistogramRanker::decode(&ranker.encode()).unwrap();
            prop_assert_eq!(decoded, ranker);
        }
    }
}
