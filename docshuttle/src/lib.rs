//! Resilient UI automation for cross-application document filing.
//!
//! This crate drives a real browser to authenticate into two
//! independently-operated web applications — a tenant-directory Portal
//! and a document Filing System that expose no API — reconciles
//! session/tenant identity between them, and performs bulk
//! document-organization operations inside the Filing System's UI.
//!
//! The engine never guesses at unknown UI shapes: it exhausts a known,
//! ordered set of interaction strategies and fails informatively, with
//! a JSON + screenshot artifact pair on every workflow-level failure.

pub mod backend;
pub mod cascade;
pub mod config;
pub mod diagnostics;
pub mod dialogs;
pub mod errors;
pub mod query;
pub mod scroll;
pub mod session;
pub mod tenant;
#[cfg(test)]
mod tests;
pub mod ui;
pub mod verify;
pub mod wait;
pub mod workflow;

pub use backend::cdp::{CdpDriver, ProfileLock};
pub use backend::{origin_of, PageDriver};
pub use cascade::{Cascade, Probe, Resolution, Strategy, StrategyAction};
pub use config::{BasicAuth, EngineConfig, FilingConfig, PortalConfig};
pub use diagnostics::DebugArtifact;
pub use dialogs::{drain_blocking_dialogs, post_login_dialog_watch};
pub use errors::EngineError;
pub use query::Query;
pub use scroll::{scroll_search, FolderHit, ScrollSearchOptions};
pub use session::{AuthSurfaceState, Credentials, HealthReport, OperatorGate, Session};
pub use verify::{verify_users, VerificationRecord};
pub use wait::{await_condition, race_with_timeout};
pub use workflow::{
    clean_folder, is_uuid_named, partition_batches, DocumentEntry, MoveOptions, MoveReport,
};
