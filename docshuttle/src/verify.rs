//! User-verification workflow.
//!
//! Runs the Filing System's user-list filter once per requested name
//! and reports, in input order, whether an exactly-matching account
//! exists. When it does not, up to two name parts are re-searched to
//! surface partial matches for manual review.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::backend::{origin_of, PageDriver};
use crate::errors::EngineError;
use crate::session::{AuthSurfaceState, Session};
use crate::ui;
use crate::wait::{await_condition, DEFAULT_POLL};

/// One record per input name, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationRecord {
    pub searched_name: String,
    pub exists: bool,
    pub matched_name: Option<String>,
    pub partial_matches: Option<Vec<String>>,
    pub needs_manual_review: bool,
}

const TABLE_TIMEOUT: Duration = Duration::from_secs(60);
const SEARCH_SETTLE: Duration = Duration::from_millis(120);
const MAX_NAME_PARTS: usize = 2;
const MIN_PART_LEN: usize = 3;
const MAX_PARTIAL_MATCHES: usize = 5;

/// Placeholder rows the table renders instead of results.
const EMPTY_TABLE_ROWS: &[&str] = &[
    "no records found",
    "no matching records found",
    "no data available in table",
];

#[instrument(skip(session, names), fields(names = names.len()))]
pub async fn verify_users(
    session: &Session,
    names: &[String],
) -> Result<Vec<VerificationRecord>, EngineError> {
    let driver = session.driver().as_ref();

    if session.classify_filing_surface().await? == AuthSurfaceState::OnLoginPage {
        return Err(EngineError::PreconditionFailure(
            "Filing System login required before user verification".into(),
        ));
    }

    // Derive the environment from wherever the session actually is, so
    // verification follows the live origin rather than configuration.
    let current = driver.current_url().await?;
    let origin = origin_of(&current).ok_or_else(|| {
        EngineError::PreconditionFailure(format!("cannot derive origin from \"{current}\""))
    })?;
    let user_list_url = session.config().filing.user_list_url(&origin);
    debug!(%origin, "filing environment detected");

    driver.navigate(&user_list_url).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    if session.classify_filing_surface().await? == AuthSurfaceState::OnLoginPage {
        return Err(EngineError::Fatal(
            "Filing System redirected back to login while opening the user list".into(),
        ));
    }

    let table = ui::user_list_table();
    let table_ref = &table;
    await_condition("user list table", TABLE_TIMEOUT, DEFAULT_POLL, move || async move {
        driver.count(table_ref).await.unwrap_or(0) > 0
    })
    .await?;
    let filter = ui::user_list_filter();
    let filter_ref = &filter;
    await_condition("user list filter", TABLE_TIMEOUT, DEFAULT_POLL, move || async move {
        driver.count(filter_ref).await.unwrap_or(0) > 0
    })
    .await?;

    let mut records = Vec::with_capacity(names.len());
    for name in names {
        records.push(verify_one(driver, name).await?);
    }

    info!(
        verified = records.iter().filter(|r| r.exists).count(),
        total = records.len(),
        "user verification finished"
    );
    Ok(records)
}

async fn verify_one(driver: &dyn PageDriver, name: &str) -> Result<VerificationRecord, EngineError> {
    let candidates = run_search(driver, name).await?;
    let exact = candidates
        .iter()
        .find(|candidate| is_same_user(candidate, name))
        .cloned();

    let mut partial_matches: Vec<String> = Vec::new();
    if exact.is_none() {
        let parts: Vec<&str> = name
            .split_whitespace()
            .filter(|part| part.len() >= MIN_PART_LEN)
            .take(MAX_NAME_PARTS)
            .collect();

        for part in parts {
            let part_candidates = run_search(driver, part).await?;
            for candidate in part_candidates {
                let contains_part = candidate.to_lowercase().contains(&part.to_lowercase());
                if contains_part
                    && !partial_matches.contains(&candidate)
                    && !is_same_user(&candidate, name)
                {
                    partial_matches.push(candidate);
                }
            }
            if partial_matches.len() >= MAX_PARTIAL_MATCHES {
                partial_matches.truncate(MAX_PARTIAL_MATCHES);
                break;
            }
        }
    }

    if exact.is_none() && partial_matches.is_empty() {
        warn!(name, "no matching user found");
    }

    Ok(VerificationRecord {
        searched_name: name.to_string(),
        exists: exact.is_some(),
        matched_name: exact.clone(),
        needs_manual_review: exact.is_none() && !partial_matches.is_empty(),
        partial_matches: if partial_matches.is_empty() {
            None
        } else {
            Some(partial_matches)
        },
    })
}

/// Fill the filter, submit, settle, read the first-column cells.
async fn run_search(driver: &dyn PageDriver, term: &str) -> Result<Vec<String>, EngineError> {
    let filter = ui::user_list_filter();
    let _ = driver.click(&filter).await;
    driver.fill(&filter, "").await?;
    driver.fill(&filter, term).await?;
    driver.press_key("Enter").await?;
    tokio::time::sleep(SEARCH_SETTLE).await;

    let cells = driver.read_texts(&ui::user_list_name_cells()).await?;
    let mut out: Vec<String> = Vec::new();
    for cell in cells {
        if cell.is_empty() {
            continue;
        }
        if EMPTY_TABLE_ROWS.contains(&cell.to_lowercase().as_str()) {
            continue;
        }
        if !out.contains(&cell) {
            out.push(cell);
        }
    }
    Ok(out)
}

fn is_same_user(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
