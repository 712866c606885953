//! Recording one benchmark submission.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::browser_counter;
use crate::cache::Cache;
use crate::errors::{RankerError, Result};
use crate::key::{Namespace, RankerKey};
use crate::ranker::ScoreAdmission;
use crate::repository::{RankerLookup, RankerRepository};
use crate::store::Store;
use crate::test_set::{ParsedResults, TestSet};

/// Parameter strings that older clients send when they mean "no
/// parameters"; both are rejected.
const REJECTED_PARAMS: &[&str] = &["", "None"];

/// One client's results for a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub category: String,
    /// The client browser from family to most specific version, e.g.
    /// `["Firefox", "Firefox 3", "Firefox 3.5"]`.
    pub browsers: Vec<String>,
    /// `"test_key=score,test_key=score,..."`.
    pub results_str: String,
    #[serde(default)]
    pub params_str: Option<String>,
}

/// What an accepted submission changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    pub category: String,
    /// Scores as recorded, after the policy adjusted them.
    pub results: ParsedResults,
    /// Distinct browser strings whose rankers were updated.
    pub browsers: Vec<String>,
    pub rankers_updated: usize,
    /// Scores clamped into a histogram's domain.
    pub scores_clamped: usize,
    /// The browser's result count after this submission.
    pub browser_count: u64,
}

/// Validate and record a submission.
///
/// The payload is parsed and checked completely before anything is
/// written, so a malformed submission leaves no trace. Every version level
/// of the browser gets its own rankers updated.
pub async fn add_result<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    test_set: &TestSet,
    submission: &Submission,
) -> Result<IngestReceipt> {
    if submission.category != test_set.category() {
        return Err(RankerError::malformed(format!(
            "submission for category '{}' sent to test set '{}'",
            submission.category,
            test_set.category()
        )));
    }
    if let Some(params) = submission.params_str.as_deref() {
        if REJECTED_PARAMS.contains(&params) {
            return Err(RankerError::malformed(format!(
                "params_str '{}' is not a parameter string; omit it instead",
                params
            )));
        }
    }

    let mut browsers: Vec<String> = Vec::with_capacity(submission.browsers.len());
    for browser in &submission.browsers {
        if !browsers.contains(browser) {
            browsers.push(browser.clone());
        }
    }
    if browsers.is_empty() {
        return Err(RankerError::malformed("submission names no browser"));
    }

    let results = test_set.get_results(&submission.results_str)?;
    let params_str = submission
        .params_str
        .as_deref()
        .or(test_set.default_params());

    let mut rankers_updated = 0;
    let mut scores_clamped = 0;
    for test in test_set.tests() {
        let Some(&score) = results.get(&test.key) else {
            debug!("Policy dropped test '{}' from submission", test.key);
            continue;
        };
        let lookups: Vec<RankerLookup> = browsers
            .iter()
            .map(|browser| {
                RankerLookup::new(
                    RankerKey::new(test_set.category(), &test.key, browser, params_str),
                    test.ranker_kind(),
                )
            })
            .collect();

        let mut entries = repository
            .get_or_create_rankers(Namespace::Live, &lookups)
            .await?;
        for entry in &mut entries {
            if let ScoreAdmission::Clamped { .. } =
                repository.add_score(entry, score).await?
            {
                scores_clamped += 1;
            }
            rankers_updated += 1;
        }
    }

    let counter = browser_counter::increment(
        repository,
        test_set.category(),
        &submission.browsers,
    )
    .await?;

    info!(
        "Recorded {} results for {} on {} ({} rankers updated)",
        results.len(),
        test_set.category(),
        browsers.last().map(String::as_str).unwrap_or_default(),
        rankers_updated
    );

    Ok(IngestReceipt {
        category: test_set.category().to_string(),
        results,
        browsers,
        rankers_updated,
        scores_clamped,
        browser_count: counter.count,
    })
}
