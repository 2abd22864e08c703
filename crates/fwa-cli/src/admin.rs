//! `fwa status` and `fwa disable`.

use anyhow::{Context, Result};
use fwa_engine::ReconciliationEngine;
use serde_json::json;
use tracing::info;

use crate::output::print_json;

pub async fn run_status(engine: &ReconciliationEngine) -> Result<()> {
    let status = engine.status().await.context("status probe failed")?;
    print_json(&status)
}

pub async fn run_disable(engine: &ReconciliationEngine) -> Result<()> {
    engine.disable().await.context("failed to disable enforcement")?;
    info!("All per-subject chains removed");
    print_json(&json!({ "enforcing": false }))
}
