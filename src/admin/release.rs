//! Promoting staged rankers into the live namespace.

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::Cache;
use crate::errors::Result;
use crate::key::Namespace;
use crate::ranker::RankerKind;
use crate::repository::{RankerEntry, RankerRepository};
use crate::store::{Store, DIRTY_MARKER, RELEASED_MARKER};

pub const DEFAULT_RELEASE_FETCH_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseRequest {
    pub fetch_limit: usize,
    /// Rows promoted by earlier steps.
    pub total: usize,
}

impl Default for ReleaseRequest {
    fn default() -> Self {
        Self { fetch_limit: DEFAULT_RELEASE_FETCH_LIMIT, total: 0 }
    }
}

impl ReleaseRequest {
    pub fn resume(&self, response: &ReleaseResponse) -> Self {
        Self { total: response.total, ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub is_done: bool,
    pub total: usize,
}

/// Promote one page of staging rows.
///
/// Rows are copied into live before their staging copies are deleted, so
/// an interrupted step is repeated safely and progress needs no cursor.
pub async fn release_step<S: Store, C: Cache>(
    repository: &RankerRepository<S, C>,
    request: &ReleaseRequest,
) -> Result<ReleaseResponse> {
    let staged = repository
        .scan(Namespace::Staging, request.fetch_limit)
        .await?;

    if staged.is_empty() {
        repository
            .with_deadline("clear_marker", repository.store().clear_marker(DIRTY_MARKER))
            .await?;
        repository
            .with_deadline(
                "set_marker",
                repository.store().set_marker(RELEASED_MARKER, Utc::now()),
            )
            .await?;
        info!("Release complete: {} rankers promoted", request.total);
        return Ok(ReleaseResponse { is_done: true, total: request.total });
    }

    let live: Vec<RankerEntry> = staged
        .iter()
        .map(|entry| {
            RankerEntry::new(entry.key_name.clone(), Namespace::Live, entry.ranker.clone())
        })
        .collect();
    repository.put_many(Namespace::Live, &live).await?;

    let mut by_kind: BTreeMap<RankerKind, Vec<String>> = BTreeMap::new();
    for entry in &staged {
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

    let total = request.total + staged.len();
    info!("Promoted {} rankers ({} so far)", staged.len(), total);
    Ok(ReleaseResponse { is_done: false, total })
}
