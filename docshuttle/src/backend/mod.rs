//! The seam between the engine and a live browser page.
//!
//! Everything above this trait is deterministic engine logic; everything
//! below it is transport. Production uses the DevTools-backed
//! [`cdp::CdpDriver`]; tests substitute an in-memory fake.

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::query::Query;

pub mod cdp;

/// Operations the engine needs from the driven page.
///
/// All queries are evaluated fresh on every call; the engine never holds
/// element handles across navigations, because a render invalidates them.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), EngineError>;

    async fn current_url(&self) -> Result<String, EngineError>;

    async fn title(&self) -> Result<String, EngineError>;

    /// Number of elements matching the query.
    async fn count(&self, query: &Query) -> Result<usize, EngineError>;

    /// Whether at least one matching element is visible.
    async fn is_visible(&self, query: &Query) -> Result<bool, EngineError>;

    /// Whether the first matching element reports a checked state.
    async fn is_checked(&self, query: &Query) -> Result<bool, EngineError>;

    /// Click the first visible match (first match if none is visible).
    async fn click(&self, query: &Query) -> Result<(), EngineError>;

    /// Replace the value of the first matching input.
    async fn fill(&self, query: &Query, text: &str) -> Result<(), EngineError>;

    /// Send a key to the focused element ("Enter", "Escape", "Space").
    async fn press_key(&self, key: &str) -> Result<(), EngineError>;

    /// Normalized visible texts of all matching elements.
    async fn read_texts(&self, query: &Query) -> Result<Vec<String>, EngineError>;

    /// Input value of the first matching element.
    async fn read_value(&self, query: &Query) -> Result<String, EngineError>;

    /// Reset a scroll container to its origin.
    async fn scroll_to_top(&self, query: &Query) -> Result<(), EngineError>;

    /// Advance a scroll container by `fraction` of its visible height.
    /// Returns `false` when the offset did not change (end of content).
    async fn scroll_advance(&self, query: &Query, fraction: f64) -> Result<bool, EngineError>;

    /// Full-page screenshot as PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, EngineError>;

    /// Clear cookies scoped to one origin.
    async fn clear_cookies(&self, origin: &str) -> Result<(), EngineError>;

    /// Best-effort teardown of the browsing context.
    async fn close(&self) -> Result<(), EngineError>;
}

/// Origin (`scheme://host[:port]`) of a URL, without pulling in a URL
/// parser for the one place that needs it.
pub fn origin_of(url: &str) -> Option<String> {
    let scheme_end = url.find("://")?;
    let rest = &url[scheme_end + 3..];
    let host_end = rest.find('/').unwrap_or(rest.len());
    Some(format!("{}{}", &url[..scheme_end + 3], &rest[..host_end]))
}
