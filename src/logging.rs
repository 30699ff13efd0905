// ABOUTME: Tracing subscriber setup for the run log
// ABOUTME: Appends to <log-dir>/purge_tables.log, or writes to stderr for interactive runs

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_DIR: &str = "/var/log/percona";
pub const RUN_LOG_FILE: &str = "purge_tables.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Create the log directory if needed. Job logs live here even when tracing goes to stderr.
pub fn ensure_log_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Unable to create {}", dir.display()))
}

pub fn run_log_path(dir: &Path) -> PathBuf {
    dir.join(RUN_LOG_FILE)
}

/// Send tracing output to the run log in `dir`, appending.
pub fn init_file(dir: &Path) -> Result<PathBuf> {
    let path = run_log_path(dir);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Unable to open {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(path)
}

pub fn init_console() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
