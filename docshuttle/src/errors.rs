use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Operation timed out after {elapsed_ms}ms: {label}")]
    Timeout { label: String, elapsed_ms: u64 },

    #[error("All interaction strategies exhausted for '{0}'")]
    ResolutionFailure(String),

    #[error("Session tenant mismatch: {0}")]
    AuthMismatch(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailure(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Browser profile already in use: {0}")]
    LockHeld(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Batch {batch} failed: {source}")]
    BatchFailed {
        batch: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Wrap an error with the batch it occurred in, so a partial failure
    /// always names the first batch that did not complete.
    pub fn in_batch(self, batch: usize) -> EngineError {
        EngineError::BatchFailed {
            batch,
            source: Box::new(self),
        }
    }
}
