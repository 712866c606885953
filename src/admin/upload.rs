//! Direct bulk upload of ranker state, used for data migration.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::cache::Cache;
use crate::errors::{RankerError, Result};
use crate::key::{Namespace, RankerKey};
use crate::ranker::RankerKind;
use crate::repository::{RankerLookup, RankerRepository};
use crate::store::Store;
use crate::test_set::TestCatalog;

/// Message returned when the time limit cut an upload short.
pub const OVER_TIME_LIMIT: &str = "Over time limit";

/// Default upload time limit.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(3);

/// One ranker's complete state.
///
/// Serialized as a 7-element array:
/// `[category, test_key, browser, params_str, ranker_kind, total_count,
/// "v1|v2|..."]`. Histogram values are per-score counts; sample values are
/// the retained scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRow {
    pub category: String,
    pub test_key: String,
    pub browser: String,
    pub params_str: Option<String>,
    pub ranker_kind: String,
    pub total_count: u64,
    pub values: String,
}

/// `(category, test_key, browser, params_str)` of an applied row.
pub type UpdatedRanker = (String, String, String, Option<String>);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadResponse {
    /// Applied rows, sorted.
    pub updated_rankers: Vec<UpdatedRanker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Rows skipped because they did not match the catalog or failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

fn parse_values(values: &str) -> Result<Vec<i64>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    values
        .split('|')
        .map(|value| {
            value.trim().parse::<i64>().map_err(|e| {
                RankerError::malformed(format!("value '{}' is not an integer", value))
                    .with_source(e)
            })
        })
        .collect()
}

async fn apply_row<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    catalog: &TestCatalog,
    row: &UploadRow,
    namespace: Namespace,
) -> Result<()> {
    let test_set = catalog.require(&row.category)?;
    let test = test_set.get_test(&row.test_key).ok_or_else(|| {
        RankerError::not_found(format!(
            "unknown test '{}' in category '{}'",
            row.test_key, row.category
        ))
    })?;
    let kind = RankerKind::parse(&row.ranker_kind)?;
    if kind != test.ranker_kind() {
        return Err(RankerError::malformed(format!(
            "test '{}' uses {} rankers, row holds {}",
            test.key,
            test.ranker_kind(),
            kind
        )));
    }
    let values = parse_values(&row.values)?;

    let lookup = RankerLookup::new(
        RankerKey::new(
            &row.category,
            &row.test_key,
            &row.browser,
            row.params_str.as_deref(),
        ),
        kind,
    );
    let mut entry = repository.get_or_create_ranker(namespace, &lookup).await?;
    repository.set_values(&mut entry, values, row.total_count).await
}

/// Apply rows in order until `time_limit` has passed.
///
/// A row that times out in the store is skipped without a note; any other
/// failure is reported in [`UploadResponse::errors`].
pub async fn upload_rankers<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    catalog: &TestCatalog,
    rows: &[UploadRow],
    time_limit: Duration,
    namespace: Namespace,
) -> UploadResponse {
    let start = Instant::now();
    let mut updated: BTreeSet<UpdatedRanker> = BTreeSet::new();
    let mut response = UploadResponse::default();

    for row in rows {
        if start.elapsed() > time_limit {
            response.message = Some(OVER_TIME_LIMIT.to_string());
            break;
        }
        match apply_row(repository, catalog, row, namespace).await {
            Ok(()) => {
                updated.insert((
                    row.category.clone(),
                    row.test_key.clone(),
                    row.browser.clone(),
                    row.params_str.clone(),
                ));
            }
            Err(err) if err.is_timeout() => {
                debug!(
                    "Store timeout uploading {}/{}/{}, skipping",
                    row.category, row.test_key, row.browser
                );
            }
            Err(err) => {
                warn!(
                    "Skipping upload row {}/{}/{}: {}",
                    row.category, row.test_key, row.browser, err.message
                );
                response.errors.push(format!(
                    "{}/{}/{}: {}",
                    row.category, row.test_key, row.browser, err.message
                ));
            }
        }
    }

    info!(
        "Uploaded {} of {} rankers into {}",
        updated.len(),
        rows.len(),
        namespace
    );
    response.updated_rankers = updated.into_iter().collect();
    response
}
