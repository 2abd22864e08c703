//! Reading policies and subject lists from files or stdin.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use fwa_core::{AppPolicy, Subject};
use fwa_engine::InstalledInventory;
use tracing::warn;

/// Read `path`, or stdin when it is "-".
pub fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read input {}", path.display()))
}

/// One policy object or an array of them.
pub fn parse_policies(raw: &str) -> Result<Vec<AppPolicy>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("policy input is empty");
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("failed to parse policy array");
    }
    let policy = serde_json::from_str(trimmed).context("failed to parse policy")?;
    Ok(vec![policy])
}

/// Subject ids separated by whitespace or commas; a JSON array also parses.
pub fn parse_subject_list(raw: &str) -> Result<BTreeSet<Subject>> {
    raw.split(|c: char| c.is_whitespace() || matches!(c, ',' | '[' | ']'))
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<Subject>()
                .with_context(|| format!("invalid subject {token:?}"))
        })
        .collect()
}

/// Installed-subject inventory given on the command line.
#[derive(Args, Debug, Clone, Default)]
pub struct InventoryArgs {
    /// Installed subject ids.
    #[arg(long, value_delimiter = ',')]
    pub installed: Vec<Subject>,

    /// File listing installed subject ids. Use "-" for stdin.
    #[arg(long, conflicts_with = "installed")]
    pub installed_file: Option<PathBuf>,
}

impl InventoryArgs {
    pub fn resolve(&self) -> Result<BTreeSet<Subject>> {
        match &self.installed_file {
            Some(path) => parse_subject_list(&read_input(path)?),
            None => Ok(self.installed.iter().copied().collect()),
        }
    }
}

/// Inventory re-read from a file on every pass.
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl InstalledInventory for FileInventory {
    async fn installed_subjects(&self) -> BTreeSet<Subject> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "Inventory unreadable");
                return BTreeSet::new();
            }
        };
        match parse_subject_list(&raw) {
            Ok(subjects) => subjects,
            Err(error) => {
                warn!(path = %self.path.display(), error = %format!("{error:#}"), "Inventory malformed");
                BTreeSet::new()
            }
        }
    }
}
