//! Running medians of browser benchmark scores.
//!
//! Every `(category, test, browser, params)` combination has a ranker that
//! summarizes the scores submitted for it: an exact histogram for tests
//! scored 0 to 100, and a bounded sorted sample for everything else.
//! Rankers live in a durable [`store::Store`] behind a best-effort
//! [`cache::Cache`], and [`stats`] turns their medians into comparison
//! tables. The [`admin`] pipelines rebuild rankers from the raw result log
//! into a staging namespace and promote them to live.

pub mod admin;
pub mod browser_counter;
pub mod cache;
pub mod codec;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod key;
pub mod ranker;
pub mod report;
pub mod repository;
pub mod scoring;
pub mod stats;
pub mod store;
pub mod test_set;

pub use errors::{ErrorKind, RankerError, Result};
pub use key::{Namespace, RankerKey};
pub use ranker::{Rank, Ranker, RankerKind};
pub use repository::{RankerEntry, RankerLookup, RankerRepository};
