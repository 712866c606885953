//! Text and JSON rendering for command output.
//!
//! Text output is colored with `colored`; JSON output wraps every result
//! with the time it was produced.

use chrono::{DateTime, Utc};
use colored::{Color, Colorize};
use serde::Serialize;

use crate::admin::{RebuildResponse, ReleaseResponse, UploadResponse};
use crate::errors::{ErrorKind, RankerError, Result};
use crate::ingest::IngestReceipt;
use crate::stats::{CategoryStats, TestResult};
use crate::test_set::TestSet;

const BROWSER_WIDTH: usize = 18;
const CELL_WIDTH: usize = 12;

/// JSON envelope for command output.
#[derive(Debug, Serialize)]
pub struct Timestamped<'a, T> {
    pub timestamp: DateTime<Utc>,
    pub result: &'a T,
}

/// Pretty JSON for `result`, stamped with the current time.
pub fn to_json<T: Serialize>(result: &T) -> Result<String> {
    serde_json::to_string_pretty(&Timestamped { timestamp: Utc::now(), result })
        .map_err(|e| {
            RankerError::new(ErrorKind::Unknown, "Failed to encode output")
                .with_source(e)
        })
}

fn score_color(score: i64) -> Color {
    match score {
        8.. => Color::BrightGreen,
        5..=7 => Color::Yellow,
        1..=4 => Color::Red,
        _ => Color::BrightBlack,
    }
}

fn cell(result: &TestResult) -> String {
    let text = if result.display.is_empty() { "-" } else { result.display.as_str() };
    format!("{:>width$}", text, width = CELL_WIDTH)
        .color(score_color(result.score))
        .to_string()
}

/// A category table, one line per browser.
pub fn stats_text(test_set: &TestSet, stats: &CategoryStats) -> String {
    let mut out = String::new();
    let level = stats
        .level
        .map(|level| level.label())
        .unwrap_or("Selected Browsers");
    out.push_str(&format!(
        "{} {}",
        stats.category_name.bold().white(),
        format!("({})", level).bright_blue()
    ));
    if let Some(params) = &stats.params_str {
        out.push_str(&format!(" [{}]", params));
    }
    out.push('\n');

    let visible: Vec<&str> = test_set
        .tests()
        .iter()
        .filter(|test| test.is_visible())
        .map(|test| test.key.as_str())
        .collect();

    out.push_str(&format!("{:<width$}", "Browser", width = BROWSER_WIDTH));
    out.push_str(&format!("{:>width$}", "Score", width = CELL_WIDTH));
    for key in &visible {
        out.push_str(&format!("{:>width$}", key, width = CELL_WIDTH));
    }
    out.push_str(&format!("{:>width$}\n", "Runs", width = CELL_WIDTH));

    for row in &stats.browsers {
        out.push_str(
            &format!("{:<width$}", row.browser, width = BROWSER_WIDTH)
                .bold()
                .to_string(),
        );
        out.push_str(&cell(&TestResult {
            raw_score: None,
            score: row.row.summary_score,
            display: row.row.summary_display.clone(),
        }));
        for key in &visible {
            match row.row.results.get(*key) {
                Some(result) => out.push_str(&cell(result)),
                None => out.push_str(&cell(&TestResult::blank())),
            }
        }
        out.push_str(&format!("{:>width$}\n", row.row.total_runs, width = CELL_WIDTH));
    }
    out
}

pub fn median_text(key_name: &str, median: Option<i64>, num_scores: u64) -> String {
    let median = match median {
        Some(median) => median.to_string().bright_cyan().to_string(),
        None => "none".dimmed().to_string(),
    };
    format!(
        "{} {}\n{} {}\n{} {}\n",
        "Ranker:".bold().white(),
        key_name,
        "Median:".bold().white(),
        median,
        "Scores:".bold().white(),
        num_scores
    )
}

pub fn receipt_text(receipt: &IngestReceipt) -> String {
    let results: Vec<String> = receipt
        .results
        .iter()
        .map(|(key, score)| format!("{}={}", key, score))
        .collect();
    let mut out = format!(
        "{} {} for {}\n{} {}\n{} {} ({} runs from this browser)\n",
        "Recorded:".bold().white(),
        receipt.category.bright_blue(),
        receipt.browsers.join(", "),
        "Results:".bold().white(),
        results.join(","),
        "Rankers updated:".bold().white(),
        receipt.rankers_updated,
        receipt.browser_count
    );
    if receipt.scores_clamped > 0 {
        out.push_str(&format!(
            "{} {} scores were outside their histogram range\n",
            "Warning:".yellow().bold(),
            receipt.scores_clamped
        ));
    }
    out
}

pub fn upload_text(response: &UploadResponse) -> String {
    let mut out = format!(
        "{} {}\n",
        "Updated rankers:".bold().white(),
        response.updated_rankers.len()
    );
    for (category, test_key, browser, params_str) in &response.updated_rankers {
        match params_str {
            Some(params) => out.push_str(&format!(
                "  {}/{}/{} [{}]\n",
                category, test_key, browser, params
            )),
            None => out.push_str(&format!("  {}/{}/{}\n", category, test_key, browser)),
        }
    }
    if let Some(message) = &response.message {
        out.push_str(&format!("{} {}\n", "Stopped:".yellow().bold(), message));
    }
    for error in &response.errors {
        out.push_str(&format!("{} {}\n", "Skipped:".red().bold(), error));
    }
    out
}

pub fn rebuild_text(response: &RebuildResponse) -> String {
    let status = if response.timed_out {
        "timed out".yellow().bold()
    } else if response.is_done {
        "done".bright_green().bold()
    } else {
        "in progress".bright_blue().bold()
    };
    let bookmark = response
        .bookmark
        .map(|bookmark| bookmark.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {}\n{} {} (bookmark {})\n{} {} from {} results\n",
        "Rebuild:".bold().white(),
        status,
        "Category index:".bold().white(),
        response.category_index,
        bookmark,
        "Rankers updated:".bold().white(),
        response.rankers_updated,
        response.total_results
    )
}

pub fn release_text(response: &ReleaseResponse) -> String {
    let status = if response.is_done {
        "done".bright_green().bold()
    } else {
        "in progress".bright_blue().bold()
    };
    format!(
        "{} {}\n{} {}\n",
        "Release:".bold().white(),
        status,
        "Rankers promoted:".bold().white(),
        response.total
    )
}
