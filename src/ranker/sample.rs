//! Approximate median over an unbounded domain.
//!
//! The ranker retains at most `capacity` scores in ascending order. Once
//! full, every new score is inserted and one score is evicted from the end
//! farther away from where the new score landed, so the retained window
//! drifts toward the running median instead of holding the most recent
//! scores.

use serde::{Deserialize, Serialize};

use super::{Rank, RankerKind, ScoreAdmission};
use crate::codec;
use crate::errors::{RankerError, Result};

/// Default number of retained scores.
pub const MAX_SAMPLE_SIZE: usize = 100;

fn default_capacity() -> usize {
    MAX_SAMPLE_SIZE
}

/// A bounded sorted sample plus the count of every score ever added.
///
/// Equality compares the sample and the count; the capacity is a runtime
/// setting and is not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRanker {
    scores: Vec<i64>,
    total_count: u64,
    #[serde(skip, default = "default_capacity")]
    capacity: usize,
}

impl PartialEq for SampleRanker {
    fn eq(&self, other: &Self) -> bool {
        self.scores == other.scores && self.total_count == other.total_count
    }
}

impl Eq for SampleRanker {}

impl Default for SampleRanker {
    fn default() -> Self {
        Self::with_capacity(MAX_SAMPLE_SIZE)
    }
}

impl SampleRanker {
    /// An empty sample with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty sample retaining at most `capacity` scores.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { scores: Vec::new(), total_count: 0, capacity: capacity.max(1) }
    }

    /// Change the capacity, trimming the sample around its middle if it no
    /// longer fits.
    pub fn resized(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        trim_to_center(&mut self.scores, self.capacity);
        self
    }

    /// The retained scores in ascending order.
    pub fn scores(&self) -> &[i64] {
        &self.scores
    }

    /// Number of scores ever added.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Maximum number of retained scores.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Keep the central `capacity` values of a sorted vector.
fn trim_to_center(scores: &mut Vec<i64>, capacity: usize) {
    if scores.len() <= capacity {
        return;
    }
    let excess = scores.len() - capacity;
    let drop_low = excess / 2;
    scores.drain(..drop_low);
    scores.truncate(capacity);
}

impl Rank for SampleRanker {
    fn kind(&self) -> RankerKind {
        RankerKind::Sample
    }

    fn add(&mut self, score: i64) -> ScoreAdmission {
        let sampled = self.scores.len();
        if sampled < self.capacity {
            let index = self.scores.partition_point(|&s| s <= score);
            self.scores.insert(index, score);
        } else {
            let left = self.scores.partition_point(|&s| s < score);
            let right = self.scores.partition_point(|&s| s <= score);
            let center = left + (right - left) / 2;
            self.scores.insert(left, score);
            if center < sampled / 2 {
                self.scores.pop();
            } else {
                self.scores.remove(0);
            }
        }
        self.total_count += 1;
        ScoreAdmission::Accepted
    }

    fn set_values(&mut self, mut values: Vec<i64>, total_count: u64) -> Result<()> {
        if total_count < values.len() as u64 {
            return Err(RankerError::malformed(format!(
                "total count {} is smaller than the {} sampled values",
                total_count,
                values.len()
            )));
        }
        values.sort_unstable();
        trim_to_center(&mut values, self.capacity);
        self.scores = values;
        self.total_count = total_count;
        Ok(())
    }

    fn median_and_num_scores(&self) -> (Option<i64>, u64) {
        if self.scores.is_empty() {
            return (None, 0);
        }
        (Some(self.scores[self.scores.len() / 2]), self.total_count)
    }

    fn encode(&self) -> Vec<u8> {
        codec::encode_samples(&self.scores, self.total_count)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let (scores, total_count) = codec::decode_samples(bytes)?;
        let capacity = scores.len().max(MAX_SAMPLE_SIZE);
        Ok(Self { scores, total_count, capacity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use proptest::prelude::*;

    fn sample_of(capacity: usize, scores: &[i64]) -> SampleRanker {
        let mut ranker = SampleRanker::with_capacity(capacity);
        ranker.set_values(scores.to_vec(), scores.len() as u64).unwrap();
        ranker
    }

    #[test]
    fn test_add_score() {
        let mut ranker = SampleRanker::new();
        ranker.add(1000);
        assert_eq!(ranker.scores(), &[1000]);
        assert_eq!(ranker.median(), Some(1000));

        ranker.add(0);
        assert_eq!(ranker.scores(), &[0, 1000]);
        assert_eq!(ranker.median(), Some(1000));

        ranker.add(500);
        assert_eq!(ranker.scores(), &[0, 500, 1000]);
        assert_eq!(ranker.median_and_num_scores(), (Some(500), 3));
    }

    #[test]
    fn test_set_values_then_add() {
        let mut ranker = sample_of(MAX_SAMPLE_SIZE, &[4, 4, 5, 5, 6]);
        assert_eq!(ranker.median(), Some(5));

        ranker.add(4);
        assert_eq!(ranker.median(), Some(5));

        ranker.add(4);
        assert_eq!(ranker.scores(), &[4, 4, 4, 4, 5, 5, 6]);
        assert_eq!(ranker.median(), Some(4));
    }

    #[test]
    fn test_full_sample_drops_low_score() {
        let mut ranker = sample_of(5, &[4, 4, 5, 5, 6]);
        ranker.add(5);
        assert_eq!(ranker.scores(), &[4, 5, 5, 5, 6]);
        assert_eq!(ranker.median(), Some(5));
        assert_eq!(ranker.total_count(), 6);
    }

    #[test]
    fn test_full_sample_drops_high_score() {
        let mut ranker = sample_of(4, &[4, 4, 5, 5]);
        ranker.add(4);
        assert_eq!(ranker.scores(), &[4, 4, 4, 5]);
        assert_eq!(ranker.median(), Some(4));
        assert_eq!(ranker.total_count(), 5);
    }

    #[test]
    fn test_total_count_exceeds_sample() {
        let mut ranker = SampleRanker::with_capacity(3);
        for score in [10, 20, 30, 40, 50] {
            ranker.add(score);
        }
        assert_eq!(ranker.scores().len(), 3);
        assert_eq!(ranker.total_count(), 5);
    }

    #[test]
    fn test_empty_median() {
        assert_eq!(SampleRanker::new().median_and_num_scores(), (None, 0));
    }

    #[test]
    fn test_set_values_sorts_and_keeps_center() {
        let mut ranker = SampleRanker::with_capacity(3);
        ranker.set_values(vec![9, 1, 5, 7, 3], 40).unwrap();
        assert_eq!(ranker.scores(), &[3, 5, 7]);
        assert_eq!(ranker.median_and_num_scores(), (Some(5), 40));
    }

    #[test]
    fn test_set_values_rejects_short_total() {
        let mut ranker = SampleRanker::new();
        let err = ranker.set_values(vec![1, 2, 3], 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn test_resized_trims_sample() {
        let ranker = sample_of(10, &[1, 2, 3, 4, 5, 6]).resized(2);
        assert_eq!(ranker.scores(), &[3, 4]);
        assert_eq!(ranker.total_count(), 6);
    }

    #[test]
    fn test_decode_equals_small_capacity_sample() {
        let ranker = sample_of(3, &[9, 1, 5, 7, 3]);
        let decoded = SampleRanker::decode(&ranker.encode()).unwrap();
        assert_eq!(decoded, ranker);
        assert_eq!(decoded.capacity(), MAX_SAMPLE_SIZE);
        assert_ne!(decoded.capacity(), ranker.capacity());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: decoding restores the sample and count whatever the
        /// capacity was.
        #[test]
        fn decode_restores_any_capacity(
            capacity in 1usize..20,
            scores in prop::collection::vec(-1_000i64..1_000, 0..60),
        ) {
            let mut ranker = SampleRanker::with_capacity(capacity);
            for &score in &scores {
                ranker.add(score);
            }
            let decoded = SampleRanker::decode(&ranker.encode()).unwrap();
            prop_assert_eq!(decoded, ranker);
        }

        /// Property: after 1000 uniform draws the retained-sample median
        /// stays within 10% of the range of the true median.
        #[test]
        fn sample_median_tracks_true_median(
            scores in prop::collection::vec(0i64..=10_000, 1000),
        ) {
            let mut ranker = SampleRanker::new();
            for &score in &scores {
                ranker.add(score);
            }
            let mut sorted = scores.clone();
            sorted.sort_unstable();
            let truth = sorted[sorted.len() / 2];

            let (median, count) = ranker.median_and_num_scores();
            let median = median.unwrap();
            prop_assert_eq!(count, 1000);
            prop_assert!(
                (median - truth).abs() <= 1_000,
                "approximate median {} too far from true median {}",
                median,
                truth
            );
        }

        /// Property: the sample stays sorted and bounded, and the total
        /// counts every add.
        #[test]
        fn sample_invariants_hold(
            capacity in 1usize..20,
            scores in prop::collection::vec(any::<i64>(), 0..200),
        ) {
            let mut ranker = SampleRanker::with_capacity(capacity);
            for &score in &scores {
                ranker.add(score);
            }
            prop_assert!(ranker.scores().windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(ranker.scores().len() <= capacity);
            prop_assert_eq!(ranker.total_count(), scores.len() as u64);
        }

        /// Property: a second bulk replace leaves no trace of the first.
        #[test]
        fn set_values_overwrites(
            first in prop::collection::vec(any::<i64>(), 0..100),
            second in prop::collection::vec(any::<i64>(), 0..100),
        ) {
            let mut ranker = SampleRanker::new();
            ranker.set_values(first.clone(), first.len() as u64 + 7).unwrap();
            ranker.set_values(second.clone(), second.len() as u64).unwrap();

            let mut expected = second.clone();
            expected.sort_unstable();
            prop_assert_eq!(ranker.scores(), expected.as_slice());
            prop_assert_eq!(ranker.total_count(), second.len() as u64);
        }

        /// Property: decode(encode(r)) == r.
        #[test]
        fn sample_round_trips(
            scores in prop::collection::vec(any::<i64>(), 0..150),
        ) {
            let mut ranker = SampleRanker::new();
            for &score in &scores {
                ranker.add(score);
            }
            let decoded = SampleRanker::decode(&ranker.encode()).unwrap();
            prop_assert_eq!(decoded, ranker);
        }
    }
}
