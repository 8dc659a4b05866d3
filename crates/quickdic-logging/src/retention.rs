use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

use crate::config::LoggingConfig;
use crate::init::CRACK_LOG_NAME;

const MAX_LOG_BYTES: u64 = 64 * 1024 * 1024;

/// Rolled files start with one of these; anything else in `logs/` is left alone.
const LOG_PREFIXES: [&str; 3] = ["quickdicd.log", "quickdic.log", CRACK_LOG_NAME];

#[derive(Debug, Clone)]
struct RolledLog {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

/// Drop rolled log files past `keep_days`, then trim the oldest until the
/// directory fits under the size cap.
pub fn run_retention(root: &Path, cfg: &LoggingConfig) -> Result<()> {
    run_retention_with_cap(root, cfg, MAX_LOG_BYTES)
}

fn run_retention_with_cap(root: &Path, cfg: &LoggingConfig, max_bytes: u64) -> Result<()> {
    let log_root = root.join("logs");
    if !log_root.is_dir() {
        return Ok(());
    }

    let keep = Duration::from_secs(cfg.keep_days.saturating_mul(24 * 60 * 60));
    let cutoff = SystemTime::now()
        .checked_sub(keep)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let logs = rolled_logs(&log_root)?;
    for path in plan_removals(logs, cutoff, max_bytes) {
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed rolled log {}", path.display()),
            Err(err) => tracing::warn!("Failed to remove log {}: {}", path.display(), err),
        }
    }
    Ok(())
}

/// Files to delete: everything older than `cutoff`, then the oldest
/// survivors until the remainder is at most `max_bytes`.
fn plan_removals(mut logs: Vec<RolledLog>, cutoff: SystemTime, max_bytes: u64) -> Vec<PathBuf> {
    logs.sort_by_key(|log| log.modified);
    let (expired, mut kept): (Vec<_>, Vec<_>) =
        logs.into_iter().partition(|log| log.modified < cutoff);

    let mut doomed: Vec<PathBuf> = expired.into_iter().map(|log| log.path).collect();
    let mut remaining: u64 = kept.iter().map(|log| log.size).sum();
    let mut oldest_first = kept.drain(..);
    while remaining > max_bytes {
        let Some(log) = oldest_first.next() else { break };
        remaining = remaining.saturating_sub(log.size);
        doomed.push(log.path);
    }
    doomed
}

fn rolled_logs(dir: &Path) -> Result<Vec<RolledLog>> {
    let mut out = Vec::new();
    let entries = fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("iterating {}", dir.display()))?;
        let path = entry.path();
        let is_ours = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|name| LOG_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
            .unwrap_or(false);
        if !is_ours {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?;
        if !metadata.is_file() {
            continue;
        }
        out.push(RolledLog {
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
            path,
        });
    }
    Ok(out)
}
