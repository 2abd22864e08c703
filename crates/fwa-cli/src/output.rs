use anyhow::{Context, Result};
use serde::Serialize;

/// Pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{payload}");
    Ok(())
}
