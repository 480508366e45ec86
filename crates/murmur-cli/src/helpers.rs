//! Shared helper functions used across CLI subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use murmur_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Read an environment variable, treating empty values as unset.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Gemini keys from `GEMINI_KEY`, `GEMINI_SECOND_KEY` and the comma-separated
/// `GEMINI_KEYS`, in that order, without duplicates.
pub fn api_keys_from_env() -> Vec<String> {
    collect_keys(
        env_non_empty("GEMINI_KEY"),
        env_non_empty("GEMINI_SECOND_KEY"),
        env_non_empty("GEMINI_KEYS"),
    )
}

fn collect_keys(first: Option<String>, second: Option<String>, list: Option<String>) -> Vec<String> {
    let listed = list
        .iter()
        .flat_map(|l| l.split(','))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_owned)
        .collect::<Vec<_>>();

    let mut keys: Vec<String> = Vec::new();
    for key in first.into_iter().chain(second).chain(listed) {
        let key = key.trim().to_owned();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Open the SQLite database at `path`, creating its directory if needed.
pub async fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open_and_migrate(path.to_path_buf())
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    info!(path = %path.display(), "store initialized");
    Ok(db)
}
