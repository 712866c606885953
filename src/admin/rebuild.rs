//! Replaying the raw result log into staging rankers.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::{RawResult, ResultSource};
use crate::cache::Cache;
use crate::errors::Result;
use crate::key::{Namespace, RankerKey};
use crate::ranker::{Rank, RankerKind, ScoreAdmission};
use crate::repository::{RankerEntry, RankerLookup, RankerRepository};
use crate::store::{Store, DIRTY_MARKER};
use crate::test_set::{TestCatalog, TestSet};

pub const DEFAULT_FETCH_LIMIT: usize = 500;
pub const DEFAULT_RANKER_LIMIT: usize = 500;

/// Where a rebuild step starts and how much it may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildRequest {
    /// Id of the last result already folded in the current category.
    pub bookmark: Option<u64>,
    pub category_index: usize,
    pub fetch_limit: usize,
    /// Most distinct rankers one step may touch.
    pub ranker_limit: usize,
}

impl Default for RebuildRequest {
    fn default() -> Self {
        Self {
            bookmark: None,
            category_index: 0,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            ranker_limit: DEFAULT_RANKER_LIMIT,
        }
    }
}

impl RebuildRequest {
    /// The request that picks up where `response` left off.
    pub fn resume(&self, response: &RebuildResponse) -> Self {
        Self {
            bookmark: response.bookmark,
            category_index: response.category_index,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildResponse {
    /// Every category has been replayed.
    pub is_done: bool,
    pub bookmark: Option<u64>,
    pub category_index: usize,
    pub rankers_updated: usize,
    pub total_results: usize,
    /// A store call missed its deadline; nothing from this step was kept.
    pub timed_out: bool,
}

impl RebuildResponse {
    fn unchanged(request: &RebuildRequest, is_done: bool, timed_out: bool) -> Self {
        Self {
            is_done,
            bookmark: request.bookmark,
            category_index: request.category_index,
            rankers_updated: 0,
            total_results: 0,
            timed_out,
        }
    }
}

/// Rankers and scores one raw result contributes to.
fn result_scores(test_set: &TestSet, result: &RawResult) -> Vec<(RankerLookup, i64)> {
    let scores = test_set.policy().adjust_results(result.scores.clone());
    let params_str = result
        .params_str
        .as_deref()
        .or(test_set.default_params());

    let mut browsers: Vec<&String> = Vec::with_capacity(result.browsers.len());
    for browser in &result.browsers {
        if !browsers.contains(&browser) {
            browsers.push(browser);
        }
    }

    let mut contributions = Vec::new();
    for (test_key, &score) in &scores {
        let Some(test) = test_set.get_test(test_key) else {
            debug!(
                "Result {} has a score for unknown test '{}'",
                result.id, test_key
            );
            continue;
        };
        for browser in &browsers {
            contributions.push((
                RankerLookup::new(
                    RankerKey::new(
                        test_set.category(),
                        &test.key,
                        browser.as_str(),
                        params_str,
                    ),
                    test.ranker_kind(),
                ),
                score,
            ));
        }
    }
    contributions
}

/// Delete every staging row, one page at a time.
async fn clear_staging<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    page_size: usize,
) -> Result<usize> {
    let mut cleared = 0;
    loop {
        let page = repository.scan(Namespace::Staging, page_size.max(1)).await?;
        if page.is_empty() {
            return Ok(cleared);
        }
        let mut by_kind: BTreeMap<RankerKind, Vec<String>> = BTreeMap::new();
        for entry in &page {
            by_kind
                .entry(entry.kind())
                .or_default()
                .push(entry.key_name.clone());
        }
        for (kind, key_names) in &by_kind {
            repository
                .delete_many(Namespace::Staging, *kind, key_names)
                .await?;
        }
        cleared += page.len();
    }
}

/// Fold one bounded batch of raw results into the staging namespace.
///
/// A pass starts at category 0 without a bookmark; that first step empties
/// staging so a repeated pass replaces rows instead of adding to them.
/// Every touched ranker is written once, with a single store call, after
/// folding. A store timeout discards the step's work and returns the
/// request's own position with `timed_out` set, so resuming from the
/// response never counts a result twice.
pub async fn rebuild_step<S: Store, C: Cache, R: ResultSource>(
    repository: &RankerRepository<S, C>,
    catalog: &TestCatalog,
    source: &R,
    request: &RebuildRequest,
    budget: Duration,
) -> Result<RebuildResponse> {
    let start = Instant::now();
    let Some(test_set) = catalog.by_index(request.category_index) else {
        return Ok(RebuildResponse::unchanged(request, true, false));
    };

    if request.category_index == 0 && request.bookmark.is_none() {
        match clear_staging(repository, request.fetch_limit).await {
            Ok(0) => {}
            Ok(cleared) => info!("Rebuild cleared {} stale staging rankers", cleared),
            Err(err) if err.is_timeout() => {
                warn!("Rebuild could not clear staging: {}", err.message);
                return Ok(RebuildResponse::unchanged(request, false, true));
            }
            Err(err) => return Err(err),
        }
    }

    let results = match source
        .fetch(test_set.category(), request.bookmark, request.fetch_limit)
        .await
    {
        Ok(results) => results,
        Err(err) if err.is_timeout() => {
            warn!("Rebuild fetch for {} timed out", test_set.category());
            return Ok(RebuildResponse::unchanged(request, false, true));
        }
        Err(err) => return Err(err),
    };

    if results.is_empty() {
        let category_index = request.category_index + 1;
        info!(
            "Rebuild finished category {} ({}/{})",
            test_set.category(),
            category_index,
            catalog.len()
        );
        return Ok(RebuildResponse {
            is_done: category_index >= catalog.len(),
            bookmark: None,
            category_index,
            rankers_updated: 0,
            total_results: 0,
            timed_out: false,
        });
    }

    let mut staged: BTreeMap<String, RankerEntry> = BTreeMap::new();
    let mut bookmark = request.bookmark;
    let mut folded = 0;
    let mut clamped = 0;

    for result in &results {
        if start.elapsed() >= budget {
            debug!("Rebuild budget spent after {} results", folded);
            break;
        }
        let contributions = result_scores(test_set, result);
        let missing: Vec<RankerLookup> = contributions
            .iter()
            .filter(|(lookup, _)| !staged.contains_key(&lookup.key.key_name()))
            .map(|(lookup, _)| lookup.clone())
            .collect();
        if !staged.is_empty() && staged.len() + missing.len() > request.ranker_limit {
            debug!(
                "Rebuild stops before result {}: ranker limit {} reached",
                result.id, request.ranker_limit
            );
            break;
        }

        let loaded = match repository
            .get_or_create_rankers(Namespace::Staging, &missing)
            .await
        {
            Ok(loaded) => loaded,
            Err(err) if err.is_timeout() => {
                warn!("Rebuild load timed out: {}", err.message);
                return Ok(RebuildResponse::unchanged(request, false, true));
            }
            Err(err) => return Err(err),
        };
        for entry in loaded {
            staged.insert(entry.key_name.clone(), entry);
        }

        for (lookup, score) in contributions {
            if let Some(entry) = staged.get_mut(&lookup.key.key_name()) {
                if let ScoreAdmission::Clamped { .. } = entry.ranker.add(score) {
                    clamped += 1;
                }
            }
        }
        bookmark = Some(result.id);
        folded += 1;
    }

    if folded == 0 {
        return Ok(RebuildResponse::unchanged(request, false, false));
    }

    if let Err(err) = repository
        .with_deadline(
            "set_marker",
            repository.store().set_marker(DIRTY_MARKER, chrono::Utc::now()),
        )
        .await
    {
        if err.is_timeout() {
            warn!("Rebuild could not mark staging dirty: {}", err.message);
            return Ok(RebuildResponse::unchanged(request, false, true));
        }
        return Err(err);
    }

    let entries: Vec<RankerEntry> = staged.into_values().collect();
    match repository.put_many(Namespace::Staging, &entries).await {
        Ok(()) => {}
        Err(err) if err.is_timeout() => {
            warn!("Rebuild flush timed out: {}", err.message);
            return Ok(RebuildResponse::unchanged(request, false, true));
        }
        Err(err) => return Err(err),
    }
    if clamped > 0 {
        warn!("Rebuild clamped {} out-of-range scores", clamped);
    }

    // A short page means the category has no results left.
    let exhausted = folded == results.len() && results.len() < request.fetch_limit;
    let (bookmark, category_index) = if exhausted {
        (None, request.category_index + 1)
    } else {
        (bookmark, request.category_index)
    };

    info!(
        "Rebuilt {} rankers from {} results of {}",
        entries.len(),
        folded,
        test_set.category()
    );
    Ok(RebuildResponse {
        is_done: category_index >= catalog.len(),
        bookmark,
        category_index,
        rankers_updated: entries.len(),
        total_results: folded,
        timed_out: false,
    })
}
