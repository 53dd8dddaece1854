use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use ndstore::{ChunkCache, Database};

/// Open a database file for inspection. Never creates or modifies it.
pub fn open_ro(path: &Path) -> Result<Database> {
    if !path.exists() {
        anyhow::bail!("{} does not exist", path.display());
    }
    Database::open(path, ChunkCache::shared(), 0, true)
        .with_context(|| format!("open {}", path.display()))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
