//! Batch document-move workflow: scan → filter → confirm → move.
//!
//! Preconditions: a tenant-verified session and an operator-supplied
//! source/destination folder pair, both validated before any
//! irreversible action. Batches execute strictly in partition order; a
//! completed batch is never re-issued, and the first failed batch aborts
//! the run so partial failure is never masked as total success.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::backend::PageDriver;
use crate::cascade::{Cascade, Probe, StrategyAction};
use crate::diagnostics::{self, DebugArtifact};
use crate::dialogs::{drain_blocking_dialogs, DEFAULT_DRAIN_WINDOW};
use crate::errors::EngineError;
use crate::scroll::{scroll_search, ScrollSearchOptions};
use crate::session::Session;
use crate::ui;
use crate::wait::{await_condition, race_with_timeout, DEFAULT_POLL};

/// System-generated documents carry a UUID prefix in their title;
/// human-named ones do not. Only the latter are move candidates.
static UUID_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid regex")
});

pub fn is_uuid_named(title: &str) -> bool {
    UUID_TITLE.is_match(title)
}

/// A document as enumerated from the list. The title is the only
/// identity the UI exposes.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentEntry {
    pub title: String,
    pub is_uuid_named: bool,
}

/// Split titles into `ceil(N/B)` ordered batches of at most
/// `batch_size`, preserving order, no duplicates introduced.
pub fn partition_batches(titles: &[String], batch_size: usize) -> Vec<Vec<String>> {
    let size = batch_size.max(1);
    titles.chunks(size).map(|chunk| chunk.to_vec()).collect()
}

#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub source: String,
    pub destination: String,
    pub batch_size: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveReport {
    pub scanned: usize,
    pub candidates: Vec<String>,
    pub moved: usize,
    pub batches: usize,
    pub dry_run: bool,
}

const FOLDER_LOAD_ATTEMPTS: usize = 3;
const FOLDER_LOAD_TIMEOUT: Duration = Duration::from_secs(15);
const SOURCE_RELOAD_TIMEOUT: Duration = Duration::from_secs(20);
const MARKER_TIMEOUT: Duration = Duration::from_secs(5);
const POST_MOVE_SETTLE: Duration = Duration::from_millis(700);
const SELECTION_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the move workflow against a tenant-verified session.
#[instrument(skip(session, opts), fields(source = %opts.source, destination = %opts.destination, dry_run = opts.dry_run))]
pub async fn clean_folder(
    session: &Session,
    opts: &MoveOptions,
) -> Result<MoveReport, EngineError> {
    let driver = session.driver().as_ref();
    let artifact_dir = session.config().artifact_dir.clone();

    // 1. Load the source folder and wait until the UI reflects it;
    //    reading immediately after the click risks stale contents.
    load_folder(driver, &artifact_dir, &opts.source).await?;

    // 2. Enumerate and classify.
    let titles = driver.read_texts(&ui::document_titles()).await?;
    if titles.is_empty() {
        return Err(EngineError::PreconditionFailure(format!(
            "document list is empty in \"{}\"; the folder may not have loaded",
            opts.source
        )));
    }
    let entries: Vec<DocumentEntry> = titles
        .iter()
        .map(|title| DocumentEntry {
            title: title.clone(),
            is_uuid_named: is_uuid_named(title),
        })
        .collect();
    let candidates: Vec<String> = entries
        .iter()
        .filter(|entry| !entry.is_uuid_named)
        .map(|entry| entry.title.clone())
        .collect();

    info!(
        scanned = entries.len(),
        candidates = candidates.len(),
        "source folder scanned"
    );

    // 3. Nothing to do, or dry run: stop before any mutation.
    if candidates.is_empty() {
        return Ok(MoveReport {
            scanned: entries.len(),
            candidates,
            moved: 0,
            batches: 0,
            dry_run: opts.dry_run,
        });
    }
    if opts.dry_run {
        info!(candidates = ?candidates, "dry run, no changes made");
        return Ok(MoveReport {
            scanned: entries.len(),
            candidates,
            moved: 0,
            batches: 0,
            dry_run: true,
        });
    }

    // Validate the destination exists before any irreversible action.
    let dest_hit = scroll_search(
        driver,
        &ui::folder_pane(),
        &opts.destination,
        &ScrollSearchOptions::default(),
    )
    .await?;
    if dest_hit.is_none() {
        diagnostics::capture(
            driver,
            &artifact_dir,
            &format!("destination-not-found-{}", opts.destination),
            json!({ "destination": opts.destination }),
        )
        .await;
        return Err(EngineError::PreconditionFailure(format!(
            "destination folder \"{}\" not found in folder pane",
            opts.destination
        )));
    }

    // 4. Destination lookup can change UI context on some tenants;
    //    re-open the source folder so selection targets what we scanned.
    race_with_timeout(
        &format!("reload source folder \"{}\" before move", opts.source),
        SOURCE_RELOAD_TIMEOUT,
        load_folder(driver, &artifact_dir, &opts.source),
    )
    .await?;

    // 5. Multi-select mode (idempotent).
    ensure_select_mode(driver, &artifact_dir).await?;

    // 6. Move in strict batch order.
    let batches = partition_batches(&candidates, opts.batch_size);
    let total_batches = batches.len();
    let mut moved = 0usize;

    for (index, batch) in batches.iter().enumerate() {
        let number = index + 1;
        info!(batch = number, total = total_batches, size = batch.len(), "moving batch");

        move_one_batch(driver, &artifact_dir, batch, &opts.destination)
            .await
            .map_err(|e| e.in_batch(number))?;

        moved += batch.len();
        tokio::time::sleep(POST_MOVE_SETTLE).await;
        // The UI can drop out of select mode after a move; re-assert it
        // before the next batch selects anything.
        if number < total_batches {
            ensure_select_mode(driver, &artifact_dir)
                .await
                .map_err(|e| e.in_batch(number + 1))?;
        }
    }

    info!(moved, batches = total_batches, "all documents moved");
    Ok(MoveReport {
        scanned: entries.len(),
        candidates,
        moved,
        batches: total_batches,
        dry_run: false,
    })
}

async fn move_one_batch(
    driver: &dyn PageDriver,
    artifact_dir: &std::path::Path,
    batch: &[String],
    destination: &str,
) -> Result<(), EngineError> {
    drain_blocking_dialogs(driver, DEFAULT_DRAIN_WINDOW, "before selecting documents").await?;
    select_documents_by_title(driver, artifact_dir, batch).await?;
    drain_blocking_dialogs(driver, DEFAULT_DRAIN_WINDOW, "after selecting documents").await?;
    open_change_folder(driver, artifact_dir).await?;
    drain_blocking_dialogs(driver, DEFAULT_DRAIN_WINDOW, "before choosing destination").await?;
    choose_destination_and_confirm(driver, artifact_dir, destination).await?;
    drain_blocking_dialogs(driver, DEFAULT_DRAIN_WINDOW, "after confirming move").await?;
    Ok(())
}

/* ---------------- folder loading ---------------- */

/// Load a folder with up to three independently-bounded attempts, a
/// numbered debug artifact per failure, and a terminal error that names
/// the last artifacts written.
#[instrument(skip(driver, artifact_dir))]
pub async fn load_folder(
    driver: &dyn PageDriver,
    artifact_dir: &std::path::Path,
    folder: &str,
) -> Result<(), EngineError> {
    let mut last_error: Option<EngineError> = None;
    let mut last_artifact: Option<DebugArtifact> = None;

    for attempt in 1..=FOLDER_LOAD_ATTEMPTS {
        debug!(attempt, total = FOLDER_LOAD_ATTEMPTS, "folder load attempt");
        match race_with_timeout(
            &format!("load folder \"{folder}\" attempt {attempt}"),
            FOLDER_LOAD_TIMEOUT,
            load_folder_once(driver, folder),
        )
        .await
        {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, error = %e, "folder load attempt failed");
                last_artifact = diagnostics::capture(
                    driver,
                    artifact_dir,
                    &format!("folder-{folder}-attempt-{attempt}"),
                    json!({ "folder": folder, "attempt": attempt, "error": e.to_string() }),
                )
                .await;
                last_error = Some(e);
            }
        }
    }

    let artifacts = last_artifact
        .map(|a| a.describe())
        .unwrap_or_else(|| "none written".into());
    Err(EngineError::PreconditionFailure(format!(
        "could not load folder \"{folder}\" after {FOLDER_LOAD_ATTEMPTS} attempts; last error: {}; debug files: {artifacts}",
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".into())
    )))
}

async fn load_folder_once(driver: &dyn PageDriver, folder: &str) -> Result<(), EngineError> {
    // Re-activate the filing surface cheaply; the badge click is a
    // no-op if the surface is already up.
    if driver.count(&ui::all_documents_badge()).await.unwrap_or(0) > 0 {
        let _ = driver.click(&ui::all_documents_badge()).await;
    }
    let pane = ui::folder_pane();
    await_condition("folder pane attached", Duration::from_secs(10), DEFAULT_POLL, move || {
        let pane = ui::folder_pane();
        async move { driver.count(&pane).await.unwrap_or(0) > 0 }
    })
    .await?;

    let hit = scroll_search(driver, &pane, folder, &ScrollSearchOptions::default())
        .await?
        .ok_or_else(|| {
            EngineError::PreconditionFailure(format!(
                "folder \"{folder}\" not found in folder pane"
            ))
        })?;
    driver.click(&hit.query).await?;

    // The selected-folder marker must reflect the new folder before the
    // contents can be trusted.
    let marker = ui::selected_folder_marker(folder);
    let marker_ref = &marker;
    await_condition("selected folder marker", MARKER_TIMEOUT, DEFAULT_POLL, move || async move {
        driver.count(marker_ref).await.unwrap_or(0) > 0
    })
    .await?;

    let ready = ui::document_list_ready();
    let ready_ref = &ready;
    await_condition("document list render", MARKER_TIMEOUT, DEFAULT_POLL, move || async move {
        driver.count(ready_ref).await.unwrap_or(0) > 0
    })
    .await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    debug!(folder, "folder loaded");
    Ok(())
}

/* ---------------- select mode ---------------- */

pub async fn is_select_mode_enabled(driver: &dyn PageDriver) -> bool {
    driver
        .count(&ui::select_mode_enabled_markers())
        .await
        .unwrap_or(0)
        > 0
}

/// Enable multi-select mode. Idempotent: enabling twice has no
/// toggle-off side effect because the cascade is skipped entirely when
/// the enabled markers are already present.
#[instrument(skip(driver, artifact_dir))]
pub async fn ensure_select_mode(
    driver: &dyn PageDriver,
    artifact_dir: &std::path::Path,
) -> Result<(), EngineError> {
    if driver.count(&ui::document_list()).await.unwrap_or(0) == 0 {
        diagnostics::capture(
            driver,
            artifact_dir,
            "document-list-not-found-before-select-mode",
            json!({}),
        )
        .await;
        return Err(EngineError::PreconditionFailure(
            "document list not found while enabling select mode".into(),
        ));
    }

    if is_select_mode_enabled(driver).await {
        return Ok(());
    }

    let enabled = Probe::CountAtLeast {
        query: ui::select_mode_enabled_markers(),
        min: 1,
    };
    let cascade = Cascade::new("enable select mode")
        .strategy(
            "direct-toggle",
            StrategyAction::ClickFirst(ui::select_mode_direct()),
            enabled.clone(),
        )
        .strategy(
            "labeled-action",
            StrategyAction::ClickFirstVisible(ui::select_mode_label()),
            enabled.clone(),
        )
        .strategy(
            "overflow-menu",
            StrategyAction::OpenMenuThenClick {
                menu: ui::overflow_menu(),
                item: ui::select_mode_menu_item(),
            },
            enabled,
        )
        // Some tenant variants expose no checkbox state at all; a
        // landed click is the best confirmation available there.
        .strategy(
            "overflow-menu-unverified",
            StrategyAction::OpenMenuThenClick {
                menu: ui::overflow_menu(),
                item: ui::select_mode_menu_item(),
            },
            Probe::Tolerant,
        );

    match cascade.resolve(driver).await {
        Ok(resolution) => {
            debug!(strategy = resolution.strategy, confirmed = resolution.confirmed, "select mode enabled");
            Ok(())
        }
        Err(e) => {
            diagnostics::capture(driver, artifact_dir, "select-mode-not-available", json!({}))
                .await;
            Err(e)
        }
    }
}

/* ---------------- selection ---------------- */

/// Select each batch title against the currently-rendered rows. A title
/// counts as selected only once its checkbox state was observed true
/// after the click; the row-click variant (no checkbox in the DOM) is
/// taken optimistically after a successful click.
async fn select_documents_by_title(
    driver: &dyn PageDriver,
    artifact_dir: &std::path::Path,
    titles: &[String],
) -> Result<(), EngineError> {
    let rendered = driver.read_texts(&ui::document_titles()).await?;
    let mut selected = 0usize;

    for title in titles {
        if !rendered.iter().any(|r| r == title) {
            // Not rendered in this pass, therefore not selectable.
            warn!(title = %title, "title not rendered; skipping in this pass");
            continue;
        }

        let checkbox = ui::document_row_checkbox(title);
        if driver.count(&checkbox).await.unwrap_or(0) > 0 {
            if !driver.is_checked(&checkbox).await.unwrap_or(false) {
                driver.click(&checkbox).await?;
            }
            let checked_query = ui::document_row_checkbox_checked(title);
            let checked_ref = &checked_query;
            let confirmed = await_condition(
                "selection checkbox state",
                SELECTION_CONFIRM_TIMEOUT,
                Duration::from_millis(50),
                move || async move { driver.count(checked_ref).await.unwrap_or(0) > 0 },
            )
            .await;
            if confirmed.is_err() {
                diagnostics::capture(
                    driver,
                    artifact_dir,
                    &format!("selection-not-confirmed-{title}"),
                    json!({ "title": title }),
                )
                .await;
                return Err(EngineError::Fatal(format!(
                    "checkbox for \"{title}\" never reported checked after the click"
                )));
            }
            selected += 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            continue;
        }

        // Row-click selection variant.
        let row = ui::document_row_click_target(title);
        driver.click(&row).await?;
        selected += 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    if selected == 0 {
        warn!("no matching visible documents were selected in this batch");
    }
    debug!(selected, requested = titles.len(), "batch selection done");
    Ok(())
}

/* ---------------- change-folder dialog ---------------- */

async fn open_change_folder(
    driver: &dyn PageDriver,
    artifact_dir: &std::path::Path,
) -> Result<(), EngineError> {
    let dialog = Probe::Visible(ui::change_folder_dialog_markers());
    let cascade = Cascade::new("open change-folder dialog")
        .strategy(
            "direct-action",
            StrategyAction::ClickFirst(ui::change_folder_direct()),
            dialog.clone(),
        )
        .strategy(
            "labeled-action",
            StrategyAction::ClickFirstVisible(ui::change_folder_label()),
            dialog.clone(),
        )
        .strategy(
            "overflow-menu",
            StrategyAction::OpenMenuThenClick {
                menu: ui::overflow_menu(),
                item: ui::change_folder_menu_item(),
            },
            dialog,
        );

    // Dialogs can appear between the attempts and swallow the click, so
    // the cascade gets a second pass after a drain.
    for attempt in 1..=2 {
        match cascade.resolve(driver).await {
            Ok(_) => return Ok(()),
            Err(_) if attempt == 1 => {
                drain_blocking_dialogs(
                    driver,
                    DEFAULT_DRAIN_WINDOW,
                    "change-folder dialog did not appear",
                )
                .await?;
            }
            Err(e) => {
                diagnostics::capture(
                    driver,
                    artifact_dir,
                    "change-folder-dialog-not-visible",
                    json!({}),
                )
                .await;
                return Err(e);
            }
        }
    }
    unreachable!("cascade loop returns on both arms");
}

async fn choose_destination_and_confirm(
    driver: &dyn PageDriver,
    artifact_dir: &std::path::Path,
    destination: &str,
) -> Result<(), EngineError> {
    let by_data = ui::destination_by_data_name(destination);
    let by_text = ui::destination_by_text(destination);

    let has_data = driver.count(&by_data).await.unwrap_or(0) > 0;
    let has_text = driver.count(&by_text).await.unwrap_or(0) > 0;
    if !has_data && !has_text {
        diagnostics::capture(
            driver,
            artifact_dir,
            &format!("destination-not-visible-{destination}"),
            json!({ "destination": destination }),
        )
        .await;
        return Err(EngineError::ResolutionFailure(format!(
            "destination folder \"{destination}\" not visible in change-folder dialog"
        )));
    }

    if has_data {
        driver.click(&by_data).await?;
    } else {
        driver.click(&by_text).await?;
    }

    driver.click(&ui::change_folder_confirm()).await?;
    Ok(())
}
