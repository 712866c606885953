//! Score aggregators that answer median and count queries.
//!
//! Two variants share the [`Rank`] capability:
//!
//! - [`HistogramRanker`] keeps exact per-score counts for tests whose
//!   declared range fits inside `[0, 100]`.
//! - [`SampleRanker`] keeps a bounded sorted sample for everything else
//!   and approximates the median from it.
//!
//! Which variant a test gets is a pure function of its declared bounds,
//! see [`RankerKind::for_bounds`]. Rankers are plain values; persisting
//! them is the job of [`crate::repository::RankerRepository`].

pub mod histogram;
pub mod sample;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{RankerError, Result};

pub use histogram::HistogramRanker;
pub use sample::SampleRanker;

/// Outcome of adding a single score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreAdmission {
    /// The score was recorded as given.
    Accepted,
    /// The score was outside the ranker's domain and was clamped.
    Clamped {
        /// The submitted score.
        original: i64,
        /// The score actually recorded.
        recorded: i64,
    },
}

/// Capabilities shared by both ranker variants.
pub trait Rank {
    /// Which variant this is.
    fn kind(&self) -> RankerKind;

    /// Record one observation.
    fn add(&mut self, score: i64) -> ScoreAdmission;

    /// Replace all state with `values`.
    ///
    /// Histograms interpret `values` as per-score counts and ignore
    /// `total_count`. Samples interpret `values` as the retained sample and
    /// take `total_count` as the true number of observations.
    fn set_values(&mut self, values: Vec<i64>, total_count: u64) -> Result<()>;

    /// The median and the number of observations, `(None, 0)` when empty.
    fn median_and_num_scores(&self) -> (Option<i64>, u64);

    /// Serialize to the compact cache encoding.
    fn encode(&self) -> Vec<u8>;

    /// Deserialize from the compact cache encoding.
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;

    /// The median alone.
    fn median(&self) -> Option<i64> {
        self.median_and_num_scores().0
    }
}

/// The two storage shapes a ranker can take.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RankerKind {
    /// Exact per-score counts.
    Histogram,
    /// Bounded sorted sample.
    Sample,
}

impl RankerKind {
    /// Choose the variant for a test's declared score bounds.
    ///
    /// Histograms are used when the whole domain fits in
    /// `[HistogramRanker::MIN_SCORE, HistogramRanker::MAX_SCORE]`.
    pub fn for_bounds(min_value: i64, max_value: i64) -> Self {
        if min_value >= HistogramRanker::MIN_SCORE
            && max_value <= HistogramRanker::MAX_SCORE
        {
            RankerKind::Histogram
        } else {
            RankerKind::Sample
        }
    }

    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            RankerKind::Histogram => "histogram",
            RankerKind::Sample => "sample",
        }
    }

    /// Parse a label, accepting the legacy class names used by old dumps.
    pub fn parse(label: &str) -> Result<Self> {
        match label {
            "histogram" | "CountRanker" => Ok(RankerKind::Histogram),
            "sample" | "LastNRanker" => Ok(RankerKind::Sample),
            other => Err(RankerError::malformed(format!(
                "unknown ranker kind '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RankerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranker of either variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ranker {
    /// Exact per-score counts.
    Histogram(HistogramRanker),
    /// Bounded sorted sample.
    Sample(SampleRanker),
}

impl Ranker {
    /// An empty ranker of the given kind.
    ///
    /// `sample_capacity` only applies to sample rankers.
    pub fn empty(kind: RankerKind, sample_capacity: usize) -> Self {
        match kind {
            RankerKind::Histogram => Ranker::Histogram(HistogramRanker::new()),
            RankerKind::Sample => {
                Ranker::Sample(SampleRanker::with_capacity(sample_capacity))
            }
        }
    }

    /// Decode bytes produced by [`Rank::encode`] for a ranker of `kind`.
    pub fn decode_as(
        kind: RankerKind,
        bytes: &[u8],
        sample_capacity: usize,
    ) -> Result<Self> {
        Ok(match kind {
            RankerKind::Histogram => {
                Ranker::Histogram(HistogramRanker::decode(bytes)?)
            }
            RankerKind::Sample => Ranker::Sample(
                SampleRanker::decode(bytes)?.resized(sample_capacity),
            ),
        })
    }

    /// Apply a configured sample capacity; histograms are unchanged.
    pub fn resized(self, sample_capacity: usize) -> Self {
        match self {
            Ranker::Sample(sample) => {
                Ranker::Sample(sample.resized(sample_capacity))
            }
            histogram => histogram,
        }
    }
}

impl Rank for Ranker {
    fn kind(&self) -> RankerKind {
        match self {
            Ranker::Histogram(_) => RankerKind::Histogram,
            Ranker::Sample(_) => RankerKind::Sample,
        }
    }

    fn add(&mut self, score: i64) -> ScoreAdmission {
        match self {
            Ranker::Histogram(ranker) => ranker.add(score),
            Ranker::Sample(ranker) => ranker.add(score),
        }
    }

    fn set_values(&mut self, values: Vec<i64>, total_count: u64) -> Result<()> {
        match self {
            Ranker::Histogram(ranker) => ranker.set_values(values, total_count),
            Ranker::Sample(ranker) => ranker.set_values(values, total_count),
        }
    }

    fn median_and_num_scores(&self) -> (Option<i64>, u64) {
        match self {
            Ranker::Histogram(ranker) => ranker.median_and_num_scores(),
            Ranker::Sample(ranker) => ranker.median_and_num_scores(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Ranker::Histogram(ranker) => ranker.encode(),
            Ranker::Sample(ranker) => ranker.encode(),
        }
    }

    /// The encoding carries no variant tag, so a bare decode cannot tell a
    /// histogram from a sample. Use [`Ranker::decode_as`].
    fn decode(_bytes: &[u8]) -> Result<Self> {
        Err(RankerError::corruption(
            "untagged ranker bytes cannot be decoded without a kind",
        ))
    }
}
