//! Failure artifact capture.
//!
//! On any workflow-level failure the engine writes a JSON snapshot of
//! the selector counts and visible action labels it was looking at,
//! plus a full-page screenshot. Capture is write-once and best-effort:
//! it never blocks or fails the caller, because diagnostics must not
//! mask the original error.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use tracing::{info, warn};

use crate::backend::PageDriver;
use crate::query::Query;
use crate::ui;

/// A written JSON + screenshot pair.
#[derive(Debug, Clone)]
pub struct DebugArtifact {
    pub json_path: PathBuf,
    pub screenshot_path: PathBuf,
}

impl DebugArtifact {
    pub fn describe(&self) -> String {
        format!(
            "{}, {}",
            self.json_path.display(),
            self.screenshot_path.display()
        )
    }
}

/// Lowercase, squash everything non-alphanumeric to `-`, cap length.
/// Artifact names must be safe for any filesystem the operator runs on.
pub fn sanitize_file_name(value: &str) -> String {
    let mut out = String::new();
    let mut last_dash = true;
    for c in value.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
        if out.len() >= 60 {
            break;
        }
    }
    out.trim_matches('-').to_string()
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Capture a JSON + screenshot pair tagged with the failing
/// folder/action name. Returns `None` if anything at all goes wrong.
pub async fn capture(
    driver: &dyn PageDriver,
    dir: &Path,
    tag: &str,
    context: serde_json::Value,
) -> Option<DebugArtifact> {
    let base = format!("debug-{}-{}", sanitize_file_name(tag), epoch_millis());
    let json_path = dir.join(format!("{base}.json"));
    let screenshot_path = dir.join(format!("{base}.png"));

    let snapshot = json!({
        "captured_at_ms": epoch_millis() as u64,
        "tag": tag,
        "page_url": driver.current_url().await.unwrap_or_default(),
        "page_title": driver.title().await.unwrap_or_default(),
        "selectors": selector_counts(driver).await,
        "visible_action_labels": action_labels(driver).await,
        "context": context,
    });

    let body = match serde_json::to_vec_pretty(&snapshot) {
        Ok(b) => b,
        Err(e) => {
            warn!(tag, error = %e, "debug artifact serialization failed");
            return None;
        }
    };
    if let Err(e) = std::fs::write(&json_path, body) {
        warn!(tag, error = %e, "debug artifact JSON write failed");
        return None;
    }

    // Screenshot is the best-effort half of the pair; a missing PNG
    // still leaves a usable JSON snapshot behind.
    match driver.screenshot().await {
        Ok(png) => {
            if let Err(e) = std::fs::write(&screenshot_path, png) {
                warn!(tag, error = %e, "debug artifact screenshot write failed");
            }
        }
        Err(e) => warn!(tag, error = %e, "debug artifact screenshot capture failed"),
    }

    let artifact = DebugArtifact {
        json_path,
        screenshot_path,
    };
    info!(tag, artifact = %artifact.describe(), "debug artifact saved");
    Some(artifact)
}

async fn selector_counts(driver: &dyn PageDriver) -> serde_json::Value {
    async fn count_of(driver: &dyn PageDriver, query: &Query) -> usize {
        driver.count(query).await.unwrap_or(0)
    }

    json!({
        "folder_pane": count_of(driver, &ui::folder_pane()).await,
        "document_list": count_of(driver, &ui::document_list()).await,
        "document_checkboxes": count_of(driver, &ui::document_checkboxes()).await,
        "select_mode_action": count_of(driver, &ui::select_mode_direct()).await,
        "change_folder_action": count_of(driver, &ui::change_folder_direct()).await,
        "all_documents_badge": count_of(driver, &ui::all_documents_badge()).await,
        "blocking_dialogs": count_of(driver, &ui::blocking_dialog_markers()).await,
    })
}

async fn action_labels(driver: &dyn PageDriver) -> Vec<String> {
    let labels = driver
        .read_texts(&Query::css("#document_list button, #document_list a"))
        .await
        .unwrap_or_default();

    let mut out: Vec<String> = Vec::new();
    for label in labels {
        if label.is_empty() || label.len() > 60 {
            continue;
        }
        if !out.contains(&label) {
            out.push(label);
        }
        if out.len() >= 100 {
            break;
        }
    }
    out
}
