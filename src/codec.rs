//! Fixed-width binary encoding of ranker state for the cache tier.
//!
//! Histogram counts are written as little-endian `u64` words in index
//! order. Samples are written as little-endian `i64` words followed by one
//! trailing `i64` holding the total observation count. Decoding never
//! returns a partially decoded value: any inconsistency is corruption.

use crate::errors::{RankerError, Result};

/// Width of one encoded word in bytes.
pub const WORD_BYTES: usize = 8;

/// Encode histogram counts.
pub fn encode_counts(counts: &[u64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(counts.len() * WORD_BYTES);
    for count in counts {
        bytes.extend_from_slice(&count.to_le_bytes());
    }
    bytes
}

/// Decode histogram counts, rejecting payloads longer than `max_len` words.
pub fn decode_counts(bytes: &[u8], max_len: usize) -> Result<Vec<u64>> {
    let counts: Vec<u64> = words(bytes)?.map(u64::from_le_bytes).collect();
    if counts.len() > max_len {
        return Err(RankerError::corruption(format!(
            "histogram payload has {} buckets, at most {} allowed",
            counts.len(),
            max_len
        )));
    }
    Ok(counts)
}

/// Encode a sorted sample followed by its total count.
pub fn encode_samples(scores: &[i64], total_count: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((scores.len() + 1) * WORD_BYTES);
    for score in scores {
        bytes.extend_from_slice(&score.to_le_bytes());
    }
    // Counts above i64::MAX are not reachable; saturate rather than wrap.
    let total = i64::try_from(total_count).unwrap_or(i64::MAX);
    bytes.extend_from_slice(&total.to_le_bytes());
    bytes
}

/// Decode a sample payload into `(scores, total_count)`.
pub fn decode_samples(bytes: &[u8]) -> Result<(Vec<i64>, u64)> {
    let mut scores: Vec<i64> = words(bytes)?.map(i64::from_le_bytes).collect();
    let Some(total) = scores.pop() else {
        return Err(RankerError::corruption(
            "sample payload is missing its trailing total count",
        ));
    };
    let total_count = u64::try_from(total).map_err(|_| {
        RankerError::corruption(format!("negative total count {}", total))
    })?;
    if total_count < scores.len() as u64 {
        return Err(RankerError::corruption(format!(
            "total count {} is smaller than the sample size {}",
            total_count,
            scores.len()
        )));
    }
    if scores.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err(RankerError::corruption("sample payload is not sorted"));
    }
    Ok((scores, total_count))
}

fn words(bytes: &[u8]) -> Result<impl Iterator<Item = [u8; WORD_BYTES]> + '_> {
    if bytes.len() % WORD_BYTES != 0 {
        return Err(RankerError::corruption(format!(
            "payload length {} is not a multiple of {}",
            bytes.len(),
            WORD_BYTES
        )));
    }
    Ok(bytes.chunks_exact(WORD_BYTES).map(|chunk| {
        let mut word = [0u8; WORD_BYTES];
        word.copy_from_slice(chunk);
        word
    }))
}
