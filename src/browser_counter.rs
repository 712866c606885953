//! How many results each browser has submitted, per category.
//!
//! A submission names its browser at up to four version levels, from
//! family to full version, e.g. `["Safari", "Safari 4", "Safari 4.3"]`.
//! One counter row is kept per most-specific browser; missing levels repeat
//! the last one given, so the row above is stored as
//! `["Safari", "Safari 4", "Safari 4.3", "Safari 4.3"]`.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::cache::Cache;
use crate::errors::{RankerError, Result};
use crate::repository::RankerRepository;
use crate::store::{BrowserCounterRow, Store};

/// Number of version levels kept per counter row.
pub const VERSION_LEVELS: usize = 4;

/// Browsers shown when no level or browser list is requested.
pub const TOP_BROWSERS: &[&str] = &[
    "Chrome 2",
    "Chrome 3",
    "Chrome 4",
    "Firefox 3.0",
    "Firefox 3.5",
    "IE 6",
    "IE 7",
    "IE 8",
    "iPhone 2.2",
    "iPhone 3.1",
    "Opera 9.64",
    "Opera 10",
    "Safari 3.2",
    "Safari 4.0",
];

/// Granularity of a browser table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionLevel {
    /// The fixed [`TOP_BROWSERS`] list.
    Top,
    /// Level 0, e.g. `Firefox`.
    Family,
    /// Level 1, e.g. `Firefox 3`.
    Major,
    /// Level 2, e.g. `Firefox 3.5`.
    Minor,
    /// Level 3, e.g. `Firefox 3.5.1`.
    Full,
}

impl VersionLevel {
    /// Index into a counter row's browser list; `None` for [`Self::Top`].
    pub fn index(&self) -> Option<usize> {
        match self {
            VersionLevel::Top => None,
            VersionLevel::Family => Some(0),
            VersionLevel::Major => Some(1),
            VersionLevel::Minor => Some(2),
            VersionLevel::Full => Some(3),
        }
    }

    /// Heading for tables at this level.
    pub fn label(&self) -> &'static str {
        match self {
            VersionLevel::Top => "Top Browsers",
            VersionLevel::Family => "Browser Families",
            VersionLevel::Major => "Major Versions",
            VersionLevel::Minor => "Minor Versions",
            VersionLevel::Full => "All Versions",
        }
    }
}

impl FromStr for VersionLevel {
    type Err = RankerError;

    fn from_str(label: &str) -> Result<Self> {
        match label {
            "top" => Ok(VersionLevel::Top),
            "0" => Ok(VersionLevel::Family),
            "1" => Ok(VersionLevel::Major),
            "2" => Ok(VersionLevel::Minor),
            "3" => Ok(VersionLevel::Full),
            other => Err(RankerError::malformed(format!(
                "version level '{}' is not one of top, 0, 1, 2, 3",
                other
            ))),
        }
    }
}

impl fmt::Display for VersionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(index) => write!(f, "{}", index),
            None => f.write_str("top"),
        }
    }
}

/// Counter key for a category and its most specific browser.
pub fn key_name(category: &str, browser: &str) -> String {
    format!("{}_{}_browser", category, browser)
}

/// Fill a browser list up to [`VERSION_LEVELS`] entries by repeating the
/// last one.
pub fn pad_browsers(browsers: &[String]) -> Result<Vec<String>> {
    let Some(last) = browsers.last() else {
        return Err(RankerError::malformed("browser list is empty"));
    };
    let mut padded = browsers.to_vec();
    while padded.len() < VERSION_LEVELS {
        padded.push(last.clone());
    }
    Ok(padded)
}

async fn update<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    category: &str,
    browsers: &[String],
    apply: impl FnOnce(u64) -> u64 + Send,
) -> Result<BrowserCounterRow> {
    let browsers = pad_browsers(browsers)?;
    let most_specific = browsers.last().cloned().unwrap_or_default();
    let key = key_name(category, &most_specific);
    let fresh = BrowserCounterRow {
        key_name: key.clone(),
        category: category.to_string(),
        browsers,
        count: 0,
    };
    repository
        .with_deadline(
            "update_counter",
            repository.store().update_counter(&key, move |current| {
                let mut row = current.unwrap_or(fresh);
                row.count = apply(row.count);
                row
            }),
        )
        .await
}

/// Count one more result for `browsers` in a single transaction.
pub async fn increment<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    category: &str,
    browsers: &[String],
) -> Result<BrowserCounterRow> {
    update(repository, category, browsers, |count| count + 1).await
}

/// Overwrite the count for `browsers`.
pub async fn set_count<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    category: &str,
    browsers: &[String],
    count: u64,
) -> Result<BrowserCounterRow> {
    update(repository, category, browsers, move |_| count).await
}

/// Result counts per browser.
///
/// An explicit browser list wins: each counter row is credited to the most
/// specific of its levels that appears in the list, and the result follows
/// the list's order. Otherwise `level` picks which version level to group
/// by, sorted by browser name, and `Top` (or no level at all) uses
/// [`TOP_BROWSERS`].
pub async fn get_counts<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    category: &str,
    level: Option<VersionLevel>,
    browsers: Option<&[String]>,
) -> Result<Vec<(String, u64)>> {
    let rows = repository
        .with_deadline(
            "counters_for_category",
            repository.store().counters_for_category(category),
        )
        .await?;

    let top: Vec<String>;
    let browsers = match (browsers, level.and_then(|level| level.index())) {
        (Some(browsers), _) => browsers,
        (None, Some(index)) => return Ok(counts_at_level(&rows, index)),
        (None, None) => {
            top = TOP_BROWSERS.iter().map(|browser| browser.to_string()).collect();
            &top
        }
    };
    Ok(counts_for_browsers(&rows, browsers))
}

fn counts_for_browsers(
    rows: &[BrowserCounterRow],
    browsers: &[String],
) -> Vec<(String, u64)> {
    let mut counts: Vec<(String, u64)> =
        browsers.iter().map(|browser| (browser.clone(), 0)).collect();
    for row in rows {
        let matched = row.browsers.iter().rev().find_map(|level_browser| {
            counts.iter().position(|(browser, _)| browser == level_browser)
        });
        if let Some(index) = matched {
            counts[index].1 += row.count;
        }
    }
    counts
}

fn counts_at_level(rows: &[BrowserCounterRow], index: usize) -> Vec<(String, u64)> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for row in rows {
        match row.browsers.get(index) {
            Some(browser) => *counts.entry(browser.clone()).or_default() += row.count,
            None => warn!(
                "Counter {} has no browser at level {}",
                row.key_name, index
            ),
        }
    }
    counts.into_iter().collect()
}
