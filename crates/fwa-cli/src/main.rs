//! Firewall agent operator CLI.
//!
//! - `fwa compile` - show the chain and signature a policy compiles to
//! - `fwa plan` / `fwa apply` - reconcile the filter with desired policies
//! - `fwa orphans` / `fwa watch` - remove chains of uninstalled subjects
//! - `fwa installed` / `fwa removed` / `fwa sync` - package lifecycle events
//! - `fwa status` / `fwa disable`
//!
//! Results are printed as JSON on stdout; logs go to stderr.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod admin;
mod compile;
mod config;
mod context;
mod input;
mod lifecycle;
mod output;
mod reconcile;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::AgentConfig;
use crate::context::{BackendKind, open_engine};

/// Per-app network firewall agent.
#[derive(Parser)]
#[command(name = "fwa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Agent configuration (TOML). Defaults apply when omitted.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Packet filter to drive.
    #[arg(long, global = true, value_enum, default_value_t = BackendKind::Iptables)]
    backend: BackendKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile policies to chain specs and signatures.
    ///
    /// Pure; neither the filter nor the state files are touched.
    Compile(compile::CompileArgs),

    /// Show what `apply` would change, without changing it.
    Plan(reconcile::PlanArgs),

    /// Reconcile the packet filter with the desired policies.
    ///
    /// Subjects that fail are reported and retried on the next run; the
    /// command still succeeds. Failing to set up enforcement is an error.
    Apply(reconcile::ApplyArgs),

    /// Remove chains of subjects that are no longer installed.
    Orphans(reconcile::OrphansArgs),

    /// Sweep for orphans periodically until interrupted.
    Watch(reconcile::WatchArgs),

    /// Handle a package install: record default-deny for its subject.
    Installed(lifecycle::SubjectArgs),

    /// Handle a package removal: drop its chain and forget it.
    Removed(lifecycle::SubjectArgs),

    /// Reconcile the known-subject set with the installed inventory.
    Sync(lifecycle::SyncArgs),

    /// Report enforcement status and the persisted snapshot.
    Status,

    /// Remove every chain and stop enforcing.
    Disable,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref())?;
    fwa_telemetry::init_telemetry(&config.telemetry)?;

    let engine = open_engine(&config.engine, &config.backend, cli.backend);
    match &cli.command {
        Commands::Compile(args) => compile::run(args, &config.backend),
        Commands::Plan(args) => reconcile::run_plan(args, &engine).await,
        Commands::Apply(args) => reconcile::run_apply(args, &engine, &config.engine).await,
        Commands::Orphans(args) => reconcile::run_orphans(args, &engine).await,
        Commands::Watch(args) => reconcile::run_watch(args, &engine, &config.engine).await,
        Commands::Installed(args) => lifecycle::run_installed(args, &engine).await,
        Commands::Removed(args) => lifecycle::run_removed(args, &engine).await,
        Commands::Sync(args) => lifecycle::run_sync(args, &engine).await,
        Commands::Status => admin::run_status(&engine).await,
        Commands::Disable => admin::run_disable(&engine).await,
    }
}
