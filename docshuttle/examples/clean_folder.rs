//! Move every human-named document from one Filing System folder to
//! another, end to end: attach to a running browser, reconcile the
//! session, then run the batch move.
//!
//! Usage:
//!   cargo run --example clean_folder -- <tenant> <source> <destination> [--dry-run]
//!
//! The browser must already be running with --remote-debugging-port
//! matching the engine configuration, and DOCSHUTTLE_PORTAL_URL /
//! DOCSHUTTLE_FILING_URL must point at the two applications.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use docshuttle::{
    clean_folder, CdpDriver, EngineConfig, EngineError, MoveOptions, OperatorGate, Session,
};

/// Waits for the operator to press ENTER after completing the Portal
/// login in the browser window.
struct StdinGate;

#[async_trait]
impl OperatorGate for StdinGate {
    async fn wait_for_operator(&self, prompt: &str) -> Result<(), EngineError> {
        println!("\n{prompt}");
        println!("Press ENTER when done.");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| EngineError::Fatal(format!("stdin closed: {e}")))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("usage: clean_folder <tenant> <source> <destination> [--dry-run]");
    }
    let dry_run = args.iter().any(|a| a == "--dry-run");

    let mut config = EngineConfig::default();
    config.portal.tenants_url =
        std::env::var("DOCSHUTTLE_PORTAL_URL").context("DOCSHUTTLE_PORTAL_URL not set")?;
    config.filing.base_url =
        std::env::var("DOCSHUTTLE_FILING_URL").context("DOCSHUTTLE_FILING_URL not set")?;
    config.reset_auth_at_start = true;

    let driver = Arc::new(CdpDriver::connect(&config).await?);
    let session = Session::bootstrap(driver, config, &StdinGate, &args[0]).await?;

    let report = clean_folder(
        &session,
        &MoveOptions {
            source: args[1].clone(),
            destination: args[2].clone(),
            batch_size: 50,
            dry_run,
        },
    )
    .await?;

    if report.dry_run {
        println!(
            "dry run: {} of {} documents would move:",
            report.candidates.len(),
            report.scanned
        );
        for title in &report.candidates {
            println!("  - {title}");
        }
    } else {
        println!(
            "moved {} documents in {} batches ({} scanned)",
            report.moved, report.batches, report.scanned
        );
    }

    session.close().await;
    Ok(())
}
