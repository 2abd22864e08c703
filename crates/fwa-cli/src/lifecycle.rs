//! `fwa installed`, `fwa removed` and `fwa sync`.

use anyhow::{Context, Result};
use clap::Args;
use fwa_core::Subject;
use fwa_engine::{ApplyOutcome, ReconciliationEngine};
use serde::Serialize;

use crate::input::InventoryArgs;
use crate::output::print_json;

/// Arguments for `fwa installed` and `fwa removed`.
#[derive(Args, Debug)]
pub struct SubjectArgs {
    /// Subject (uid) of the package.
    pub subject: Subject,
}

/// Arguments for `fwa sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub inventory: InventoryArgs,
}

#[derive(Serialize)]
struct RemovalReport {
    subject: Subject,
    outcome: ApplyOutcome,
}

pub async fn run_installed(args: &SubjectArgs, engine: &ReconciliationEngine) -> Result<()> {
    let outcome = engine
        .on_subject_installed(args.subject)
        .await
        .with_context(|| format!("failed to handle install of {}", args.subject))?;
    print_json(&outcome)
}

pub async fn run_removed(args: &SubjectArgs, engine: &ReconciliationEngine) -> Result<()> {
    let outcome = engine
        .on_subject_removed(args.subject)
        .await
        .with_context(|| format!("failed to handle removal of {}", args.subject))?;
    print_json(&RemovalReport {
        subject: args.subject,
        outcome,
    })
}

pub async fn run_sync(args: &SyncArgs, engine: &ReconciliationEngine) -> Result<()> {
    let installed = args.inventory.resolve()?;
    let report = engine
        .lifecycle()
        .sync_installed(installed)
        .await
        .context("inventory sync failed")?;
    print_json(&report)
}
