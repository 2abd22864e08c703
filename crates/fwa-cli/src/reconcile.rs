//! `fwa plan`, `fwa apply`, `fwa orphans` and `fwa watch`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fwa_core::AppPolicy;
use fwa_engine::{
    ApplyOutcome, EngineConfig, OrphanPass, PlanScope, ReconciliationEngine,
};
use tracing::{info, warn};

use crate::context::{progress_logger, sweep_interval};
use crate::input::{FileInventory, InventoryArgs, parse_policies, read_input};
use crate::output::print_json;

/// Where the desired policies come from.
#[derive(Args, Debug, Clone)]
pub struct PolicySource {
    /// Policy JSON (one object or an array). Use "-" for stdin. Without it
    /// the stored policy repository is used.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Treat the input as covering only the subjects it names.
    #[arg(long, default_value_t = false)]
    pub delta: bool,
}

impl PolicySource {
    const fn scope(&self) -> PlanScope {
        if self.delta {
            PlanScope::Delta
        } else {
            PlanScope::Full
        }
    }

    fn load(&self, engine: &ReconciliationEngine) -> Result<Vec<AppPolicy>> {
        match &self.input {
            Some(path) => parse_policies(&read_input(path)?),
            None => engine
                .repository()
                .load_all()
                .context("failed to load stored policies"),
        }
    }
}

/// Arguments for `fwa plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: PolicySource,
}

/// Arguments for `fwa apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub source: PolicySource,

    /// Store the input policies in the repository before applying.
    #[arg(long, default_value_t = false, requires = "input")]
    pub save: bool,
}

/// Arguments for `fwa orphans`.
#[derive(Args, Debug)]
pub struct OrphansArgs {
    #[command(flatten)]
    pub inventory: InventoryArgs,
}

/// Arguments for `fwa watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// File listing installed subject ids, re-read on every sweep.
    #[arg(long)]
    pub installed_file: PathBuf,
}

pub async fn run_plan(args: &PlanArgs, engine: &ReconciliationEngine) -> Result<()> {
    let policies = args.source.load(engine)?;
    let run = engine
        .plan(&policies, args.source.scope())
        .await
        .context("planning failed")?;
    print_json(&run.plan)
}

pub async fn run_apply(
    args: &ApplyArgs,
    engine: &ReconciliationEngine,
    config: &EngineConfig,
) -> Result<()> {
    let policies = args.source.load(engine)?;
    if args.save {
        let repository = engine.repository();
        for policy in &policies {
            repository
                .put(policy.clone())
                .with_context(|| format!("failed to store policy for {}", policy.subject))?;
        }
        info!(count = policies.len(), "Policies stored");
    }

    let outcome = engine
        .submit_desired_policies(policies, args.source.scope(), progress_logger(config))
        .await
        .context("apply failed")?;
    report_failures(&outcome);
    print_json(&outcome)
}

pub async fn run_orphans(args: &OrphansArgs, engine: &ReconciliationEngine) -> Result<()> {
    let installed = args.inventory.resolve()?;
    let pass = engine
        .reconcile_orphans(installed)
        .await
        .context("orphan pass failed")?;
    if let OrphanPass::Ran { outcome, .. } = &pass {
        report_failures(outcome);
    }
    print_json(&pass)
}

/// Run the orphan sweeper until interrupted.
pub async fn run_watch(
    args: &WatchArgs,
    engine: &ReconciliationEngine,
    config: &EngineConfig,
) -> Result<()> {
    let interval = sweep_interval(config);
    let inventory = FileInventory::new(args.installed_file.clone());
    info!(
        interval_secs = interval.as_secs(),
        inventory = %args.installed_file.display(),
        "Orphan sweeper started"
    );
    let sweeper = engine
        .orphan_reconciler(std::sync::Arc::new(inventory))
        .spawn_sweeper(interval);

    let interrupted = tokio::signal::ctrl_c().await;
    sweeper.abort();
    // A pass already holding the run lock finishes before the runtime exits.
    engine.shutdown().await;
    info!("Orphan sweeper stopped");
    interrupted.context("failed to listen for interrupt")
}

/// Per-subject failures are reported but do not fail the command.
fn report_failures(outcome: &ApplyOutcome) {
    if outcome.is_clean() {
        return;
    }
    for failure in &outcome.failures {
        warn!(
            subject = %failure.subject,
            operation = ?failure.operation,
            error = %failure.error,
            "Subject not applied"
        );
    }
    warn!(
        failed = outcome.summary.failed_uids,
        "Run finished with failures; re-run to retry"
    );
}
