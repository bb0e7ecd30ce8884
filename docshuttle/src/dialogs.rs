//! Blocking-dialog watchdog.
//!
//! Network-error popups and confirmation toasts appear asynchronously,
//! with variable latency relative to the action that triggered them, and
//! block every subsequent click until dismissed. The move workflow
//! drains them defensively before and after each state-changing step.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::backend::PageDriver;
use crate::errors::EngineError;
use crate::ui;

/// Poll interval while draining.
pub const DRAIN_POLL: Duration = Duration::from_millis(150);

/// Default window for an inline drain around a workflow step.
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_millis(2500);

/// Poll for blocking dialogs and dismiss them until a quiet poll is
/// observed or the window expires. Returns the number of dismissals.
#[instrument(level = "debug", skip(driver, window))]
pub async fn drain_blocking_dialogs(
    driver: &dyn PageDriver,
    window: Duration,
    reason: &str,
) -> Result<usize, EngineError> {
    let deadline = Instant::now() + window;
    let mut dismissed = 0usize;

    while Instant::now() < deadline {
        let present = driver
            .is_visible(&ui::blocking_dialog_markers())
            .await
            .unwrap_or(false);
        if !present {
            break;
        }

        dismiss_one(driver).await;
        dismissed += 1;
        tokio::time::sleep(DRAIN_POLL).await;
    }

    if dismissed > 0 {
        warn!(reason, dismissed, "dismissed blocking dialog(s)");
    }
    Ok(dismissed)
}

/// Longer watch used right after Filing login, where dialogs can take
/// seconds to show up. Unlike [`drain_blocking_dialogs`] this keeps
/// watching for the whole window rather than stopping at the first
/// quiet poll.
#[instrument(level = "debug", skip(driver))]
pub async fn post_login_dialog_watch(
    driver: &dyn PageDriver,
    window: Duration,
    poll: Duration,
) -> Result<usize, EngineError> {
    let start = Instant::now();
    let mut dismissed = 0usize;

    debug!("watching for post-login blocking dialogs");
    while start.elapsed() < window {
        let present = driver
            .is_visible(&ui::blocking_dialog_markers())
            .await
            .unwrap_or(false);
        if present {
            dismiss_one(driver).await;
            dismissed += 1;
        }
        tokio::time::sleep(poll).await;
    }

    if dismissed > 0 {
        info!(dismissed, "post-login dialog watch dismissed dialog(s)");
    } else {
        debug!("no blocking dialogs appeared");
    }
    Ok(dismissed)
}

/// Click a recognized affirmative control, falling back to Escape.
/// Either path is best-effort; the next poll decides whether it worked.
async fn dismiss_one(driver: &dyn PageDriver) {
    let affirmative = ui::dialog_affirmative();
    if driver.count(&affirmative).await.unwrap_or(0) > 0 {
        if driver.click(&affirmative).await.is_ok() {
            return;
        }
    }
    let _ = driver.press_key("Escape").await;
}
