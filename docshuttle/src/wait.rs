//! Bounded-wait primitives.
//!
//! Every blocking operation in the engine goes through one of these two
//! helpers, so every wait has an explicit, finite deadline. The target
//! UIs expose no reliable completion events, so conditions are re-polled
//! at a fixed interval rather than waited on.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::errors::EngineError;

/// Default re-poll interval for [`await_condition`].
pub const DEFAULT_POLL: Duration = Duration::from_millis(150);

/// Re-evaluate `predicate` every `poll` until it returns `true` or
/// `timeout` elapses. A timeout carries the caller's label and the
/// elapsed time; it is never folded into a false success.
pub async fn await_condition<F, Fut>(
    label: &str,
    timeout: Duration,
    poll: Duration,
    mut predicate: F,
) -> Result<(), EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if predicate().await {
            trace!(label, elapsed_ms = start.elapsed().as_millis() as u64, "condition met");
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(EngineError::Timeout {
                label: label.to_string(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(poll).await;
    }
}

/// Run `operation` with a deadline. On expiry the caller gets a
/// `Timeout` error with its own diagnostic label instead of hanging.
pub async fn race_with_timeout<T, Fut>(
    label: &str,
    timeout: Duration,
    operation: Fut,
) -> Result<T, EngineError>
where
    Fut: Future<Output = Result<T, EngineError>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            label: label.to_string(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}
