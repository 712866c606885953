extern crate clap;

use browser_ranker::admin::{
    self, MemoryResultSource, RebuildRequest, ReleaseRequest, UploadRow,
};
use browser_ranker::browser_counter::VersionLevel;
use browser_ranker::cache::MemoryCache;
use browser_ranker::config::EngineConfig;
use browser_ranker::errors::{exit_codes, format_error_for_display};
use browser_ranker::ingest::{self, Submission};
use browser_ranker::report;
use browser_ranker::stats::CategoryStatsManager;
use browser_ranker::store::JsonFileStore;
use browser_ranker::test_set::TestCatalog;
use browser_ranker::{
    Namespace, RankerError, RankerKey, RankerLookup, RankerRepository, Result,
};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colored::Colorize;
use log::debug;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

type Repository = RankerRepository<JsonFileStore, MemoryCache>;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (rev ",
    env!("BROWSER_RANKER_BUILD_GIT_HASH"),
    ")"
);

#[derive(Parser)]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,

    /// Engine config with the test set definitions.
    #[arg(long, default_value = "engine.json")]
    config: PathBuf,

    /// JSON file holding rankers, counters and markers.
    #[arg(long, default_value = "rankers.json")]
    store: PathBuf,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one benchmark result.
    Add {
        #[arg(long)]
        category: String,
        /// Browser from family to full version, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        browser: Vec<String>,
        /// "test_key=score,test_key=score,..."
        #[arg(long)]
        results: String,
        #[arg(long)]
        params: Option<String>,
    },
    /// Print the median and score count of one ranker.
    Median {
        #[arg(long)]
        category: String,
        #[arg(long)]
        test: String,
        #[arg(long)]
        browser: String,
        #[arg(long)]
        params: Option<String>,
        #[arg(long)]
        staging: bool,
    },
    /// Print the stats table of a category.
    Stats {
        #[arg(long)]
        category: String,
        /// top, or a version level from 0 (family) to 3 (full version).
        #[arg(long)]
        level: Option<VersionLevel>,
        /// Explicit browsers, comma separated; overrides --level.
        #[arg(long, value_delimiter = ',')]
        browsers: Option<Vec<String>>,
        #[arg(long)]
        params: Option<String>,
    },
    /// Overwrite rankers from a JSON array of upload rows.
    Upload {
        #[arg(long)]
        file: PathBuf,
        /// Seconds before the upload stops.
        #[arg(long, default_value_t = 3.0)]
        time_limit: f64,
        #[arg(long)]
        staging: bool,
    },
    /// Replay raw results into the staging namespace.
    Rebuild {
        /// JSON array of raw results.
        #[arg(long)]
        results: PathBuf,
        #[arg(long, default_value_t = admin::rebuild::DEFAULT_FETCH_LIMIT)]
        fetch_limit: usize,
        #[arg(long, default_value_t = admin::rebuild::DEFAULT_RANKER_LIMIT)]
        ranker_limit: usize,
        /// Seconds each step may spend folding results.
        #[arg(long, default_value_t = 10.0)]
        budget_secs: f64,
        #[arg(long)]
        bookmark: Option<u64>,
        #[arg(long, default_value_t = 0)]
        category_index: usize,
        /// Keep stepping until every category is replayed.
        #[arg(long)]
        until_done: bool,
    },
    /// Promote staged rankers to live.
    Release {
        #[arg(long, default_value_t = admin::release::DEFAULT_RELEASE_FETCH_LIMIT)]
        fetch_limit: usize,
        #[arg(long)]
        until_done: bool,
    },
}

#[derive(Serialize)]
struct MedianReport {
    key_name: String,
    namespace: String,
    median: Option<i64>,
    num_scores: u64,
}

fn namespace(staging: bool) -> Namespace {
    if staging {
        Namespace::Staging
    } else {
        Namespace::Live
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", report::to_json(value)?);
    } else {
        print!("{}", text(value));
    }
    Ok(())
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        RankerError::config(format!("--{} must be a non-negative number of seconds", flag))
            .with_source(e)
    })
}

async fn run(cli: Cli) -> Result<i32> {
    let config = EngineConfig::load(&cli.config).await?;
    let catalog: TestCatalog = config.build_catalog()?;
    let store = JsonFileStore::open(cli.store.clone()).await?;
    let repository: Repository = RankerRepository::new(
        store,
        config.build_cache(),
        config.repository_options(),
    );
    debug!(
        "Loaded {} test sets; store at {}",
        catalog.len(),
        cli.store.display()
    );

    match cli.command {
        Command::Add { category, browser, results, params } => {
            let test_set = catalog.require(&category)?;
            let submission = Submission {
                category,
                browsers: browser,
                results_str: results,
                params_str: params,
            };
            let receipt = ingest::add_result(&repository, test_set, &submission).await?;
            emit(cli.json, &receipt, report::receipt_text)?;
        }
        Command::Median { category, test, browser, params, staging } => {
            let test_set = catalog.require(&category)?;
            let benchmark = test_set.get_test(&test).ok_or_else(|| {
                RankerError::not_found(format!(
                    "unknown test '{}' in category '{}'",
                    test, category
                ))
            })?;
            let params_str = params.as_deref().or(test_set.default_params());
            let lookup = RankerLookup::new(
                RankerKey::new(&category, &test, &browser, params_str),
                benchmark.ranker_kind(),
            );
            let namespace = namespace(staging);
            let (median, num_scores) = repository
                .get_ranker(namespace, &lookup)
                .await?
                .map(|entry| entry.median_and_num_scores())
                .unwrap_or((None, 0));
            let median_report = MedianReport {
                key_name: lookup.key.key_name(),
                namespace: namespace.to_string(),
                median,
                num_scores,
            };
            emit(cli.json, &median_report, |r| {
                report::median_text(&r.key_name, r.median, r.num_scores)
            })?;
        }
        Command::Stats { category, level, browsers, params } => {
            let test_set = catalog.require(&category)?;
            let stats = CategoryStatsManager::new(&repository)
                .get_stats(test_set, level, browsers.as_deref(), params.as_deref())
                .await?;
            emit(cli.json, &stats, |stats| report::stats_text(test_set, stats))?;
        }
        Command::Upload { file, time_limit, staging } => {
            let bytes = tokio::fs::read(&file).await.map_err(|e| {
                RankerError::not_found(format!("Failed to read {}", file.display()))
                    .with_source(e)
            })?;
            let rows: Vec<UploadRow> = serde_json::from_slice(&bytes).map_err(|e| {
                RankerError::malformed(format!(
                    "{} is not a JSON array of upload rows",
                    file.display()
                ))
                .with_source(e)
            })?;
            let response = admin::upload_rankers(
                &repository,
                &catalog,
                &rows,
                seconds(time_limit, "time-limit")?,
                namespace(staging),
            )
            .await;
            emit(cli.json, &response, report::upload_text)?;
            if response.message.is_some() || !response.errors.is_empty() {
                return Ok(exit_codes::PARTIAL_FAILURE);
            }
        }
        Command::Rebuild {
            results,
            fetch_limit,
            ranker_limit,
            budget_secs,
            bookmark,
            category_index,
            until_done,
        } => {
            let source = MemoryResultSource::load(&results).await?;
            let budget = seconds(budget_secs, "budget-secs")?;
            let mut request = RebuildRequest {
                bookmark,
                category_index,
                fetch_limit,
                ranker_limit,
            };
            loop {
                let response =
                    admin::rebuild_step(&repository, &catalog, &source, &request, budget)
                        .await?;
                emit(cli.json, &response, report::rebuild_text)?;
                if response.timed_out {
                    return Ok(exit_codes::PARTIAL_FAILURE);
                }
                if response.is_done || !until_done {
                    break;
                }
                request = request.resume(&response);
            }
        }
        Command::Release { fetch_limit, until_done } => {
            let mut request = ReleaseRequest { fetch_limit, total: 0 };
            loop {
                let response = admin::release_step(&repository, &request).await?;
                emit(cli.json, &response, report::release_text)?;
                if response.is_done || !until_done {
                    break;
                }
                request = request.resume(&response);
            }
        }
    }

    Ok(exit_codes::SUCCESS)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", format_error_for_display(&err).red());
            err.exit_code()
        }
    };
    std::process::exit(code);
}
