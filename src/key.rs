//! Deterministic ranker identifiers.
//!
//! A ranker is identified by `(category, test_key, browser, params)`.
//! The key name joins those parts with `_`; parameter strings are replaced
//! by their MD5 hex digest so identifiers stay short and encoding-safe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between key name segments.
pub const KEY_SEPARATOR: &str = "_";

/// Version tag of the staging namespace.
pub const STAGING_TAG: &str = "next";

/// Which copy of the rankers an operation reads or writes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Rankers served to readers and updated by ingestion.
    #[default]
    Live,
    /// Rankers being rebuilt, waiting to be released.
    Staging,
}

impl Namespace {
    /// The cache namespace for this copy, derived from `base`.
    pub fn cache_namespace(&self, base: &str) -> String {
        match self {
            Namespace::Live => base.to_string(),
            Namespace::Staging => {
                format!("{}{}{}", base, KEY_SEPARATOR, STAGING_TAG)
            }
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Live => f.write_str("live"),
            Namespace::Staging => f.write_str(STAGING_TAG),
        }
    }
}

/// The logical identity of one ranking stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RankerKey {
    pub category: String,
    pub test_key: String,
    pub browser: String,
    pub params_str: Option<String>,
}

impl RankerKey {
    pub fn new(
        category: impl Into<String>,
        test_key: impl Into<String>,
        browser: impl Into<String>,
        params_str: Option<&str>,
    ) -> Self {
        Self {
            category: category.into(),
            test_key: test_key.into(),
            browser: browser.into(),
            params_str: params_str.map(str::to_string),
        }
    }

    /// The stable identifier for this key.
    pub fn key_name(&self) -> String {
        key_name(
            &self.category,
            &self.test_key,
            &self.browser,
            self.params_str.as_deref(),
        )
    }
}

/// Lowercase hex MD5 digest of a parameter string.
pub fn params_hash(params_str: &str) -> String {
    format!("{:x}", md5::compute(params_str.as_bytes()))
}

/// Build the key name for a ranker.
///
/// An absent or empty `params_str` omits the hash segment entirely.
pub fn key_name(
    category: &str,
    test_key: &str,
    browser: &str,
    params_str: Option<&str>,
) -> String {
    match params_str.filter(|params| !params.is_empty()) {
        Some(params) => {
            let hash = params_hash(params);
            [category, test_key, browser, hash.as_str()].join(KEY_SEPARATOR)
        }
        None => [category, test_key, browser].join(KEY_SEPARATOR),
    }
}
