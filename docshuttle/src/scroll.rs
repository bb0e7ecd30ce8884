//! Scroll-search over lazily-rendered tree panes.
//!
//! The folder pane only renders a visible window of its contents, so a
//! lookup scrolls in increments and re-queries after each advance. The
//! pass bound and the no-offset-change stop condition guarantee
//! termination even when the name is absent. Assumes the underlying
//! list renders in a stable order and is not mutated mid-search; a
//! mutated list means the caller retries from the top.

use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::backend::PageDriver;
use crate::errors::EngineError;
use crate::query::Query;
use crate::wait::race_with_timeout;

#[derive(Debug, Clone)]
pub struct ScrollSearchOptions {
    pub max_passes: usize,
    /// Fraction of the container's visible height to advance per pass.
    pub advance_fraction: f64,
    pub settle: Duration,
    pub progress_every: usize,
    /// Deadline for each individual find attempt.
    pub find_timeout: Duration,
}

impl Default for ScrollSearchOptions {
    fn default() -> Self {
        Self {
            max_passes: 90,
            advance_fraction: 0.9,
            settle: Duration::from_millis(50),
            progress_every: 10,
            find_timeout: Duration::from_millis(1500),
        }
    }
}

/// A resolved, clickable hit. Valid only for the current render; a
/// navigation invalidates it.
#[derive(Debug, Clone)]
pub struct FolderHit {
    pub query: Query,
    pub matched_text: String,
    pub exact: bool,
}

/// Search `container` for an entry named `name`. Exact case-insensitive
/// match is preferred over substring, re-evaluated fresh at every pass:
/// a later-appearing exact match beats an earlier substring match
/// because the substring fallback is only consulted when no exact match
/// is currently rendered.
#[instrument(level = "debug", skip(driver, opts))]
pub async fn scroll_search(
    driver: &dyn PageDriver,
    container: &Query,
    name: &str,
    opts: &ScrollSearchOptions,
) -> Result<Option<FolderHit>, EngineError> {
    let target = name.trim();
    if target.is_empty() {
        return Err(EngineError::InvalidQuery("empty folder name".into()));
    }

    driver.scroll_to_top(container).await?;

    for pass in 0..opts.max_passes {
        // A hung find attempt must not stall the whole search; fold it
        // into "no hit this pass" and keep scrolling.
        let hit = race_with_timeout(
            &format!("folder lookup pass for \"{target}\""),
            opts.find_timeout,
            try_find(driver, container, target),
        )
        .await
        .unwrap_or(None);

        if let Some(hit) = hit {
            debug!(pass, exact = hit.exact, matched = %hit.matched_text, "scroll search hit");
            return Ok(Some(hit));
        }

        if pass > 0 && pass % opts.progress_every == 0 {
            info!(pass, "still searching for \"{target}\"");
        }

        let advanced = driver
            .scroll_advance(container, opts.advance_fraction)
            .await
            .unwrap_or(false);
        if !advanced {
            // End of content.
            return Ok(None);
        }
        tokio::time::sleep(opts.settle).await;
    }

    Ok(None)
}

async fn try_find(
    driver: &dyn PageDriver,
    container: &Query,
    target: &str,
) -> Result<Option<FolderHit>, EngineError> {
    let exact = Query::within(container.clone(), Query::text_exact(target));
    if driver.count(&exact).await.unwrap_or(0) > 0 {
        let matched = driver
            .read_texts(&exact)
            .await
            .ok()
            .and_then(|texts| texts.into_iter().next())
            .unwrap_or_else(|| target.to_string());
        return Ok(Some(FolderHit {
            query: exact,
            matched_text: matched,
            exact: true,
        }));
    }

    let contains = Query::within(container.clone(), Query::text_contains(target));
    if driver.count(&contains).await.unwrap_or(0) > 0 {
        let matched = driver
            .read_texts(&contains)
            .await
            .ok()
            .and_then(|texts| texts.into_iter().next())
            .unwrap_or_else(|| target.to_string());
        return Ok(Some(FolderHit {
            query: contains,
            matched_text: matched,
            exact: false,
        }));
    }

    Ok(None)
}
