//! Heuristic security score and the append-only audit log.
//!
//! The score is a rough hint derived from how long a run lasted and how many
//! wordlists it covered. Wall-clock time depends on the machine, so the
//! number says nothing about password entropy.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::runner::{CrackAttempt, CrackOutcome};

const BASE_SCORE: u8 = 80;

/// Score a finished run in `0..=100`. A recovered key always scores 0.
pub fn score(outcome: &CrackOutcome, elapsed: Duration, candidates_checked: usize) -> u8 {
    if matches!(outcome, CrackOutcome::Found(_)) {
        return 0;
    }

    let secs = elapsed.as_secs_f64();
    let time_bonus = if secs > 3600.0 {
        15
    } else if secs > 1800.0 {
        10
    } else if secs > 900.0 {
        5
    } else {
        0
    };

    let coverage_bonus = if candidates_checked > 500 {
        15
    } else if candidates_checked > 300 {
        10
    } else if candidates_checked > 100 {
        5
    } else {
        0
    };

    (BASE_SCORE + time_bonus + coverage_bonus).min(100)
}

/// One JSON line in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub work_unit: String,
    pub target: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_secs: f64,
    pub candidates_checked: usize,
    pub entries_scanned: u64,
    pub score: u8,
}

impl AuditRecord {
    pub fn from_attempt(attempt: &CrackAttempt) -> Self {
        let detail = match &attempt.outcome {
            CrackOutcome::Error(reason) => Some(reason.clone()),
            _ => None,
        };
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            work_unit: attempt.work_unit.clone(),
            target: attempt.target.clone(),
            outcome: attempt.outcome.label().to_string(),
            detail,
            elapsed_secs: attempt.elapsed.as_secs_f64(),
            candidates_checked: attempt.candidates_checked,
            entries_scanned: attempt.entries_scanned,
            score: score(
                &attempt.outcome,
                attempt.elapsed,
                attempt.candidates_checked,
            ),
        }
    }
}

/// Single-writer append target for [`AuditRecord`]s.
#[derive(Debug)]
pub struct AuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the record for `attempt`. Write failures are logged only.
    pub fn record(&self, attempt: &CrackAttempt) -> AuditRecord {
        let record = AuditRecord::from_attempt(attempt);
        match self.append(&record) {
            Ok(()) => info!(
                work_unit = %record.work_unit,
                outcome = %record.outcome,
                score = record.score,
                "Security audit logged to {}",
                self.path.display()
            ),
            Err(err) => error!("Error logging security audit: {}", err),
        }
        record
    }

    fn append(&self, record: &AuditRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SchedulerError::io("create", parent, e))?;
            }
        }

        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o640);
        }
        let mut file = opts
            .open(&self.path)
            .map_err(|e| SchedulerError::io("open", &self.path, e))?;

        let line = serde_json::to_string(record)
            .map_err(|e| SchedulerError::Config(format!("serializing audit record: {e}")))?;
        writeln!(file, "{line}").map_err(|e| SchedulerError::io("append to", &self.path, e))?;
        Ok(())
    }
}

/// Last `max_records` parseable records, oldest first.
pub fn tail_records(path: &Path, max_records: usize) -> Result<Vec<AuditRecord>> {
    let lines = tail_lines(path, max_records, 256 * 1024)
        .map_err(|e| SchedulerError::io("read", path, e))?;
    Ok(lines
        .iter()
        .filter_map(|line| match serde_json::from_str::<AuditRecord>(line) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("Skipping malformed audit line: {}", err);
                None
            }
        })
        .collect())
}

/// Read at most `max_lines` trailing non-empty lines without loading the
/// whole file, scanning back no further than `max_bytes`.
pub fn tail_lines(path: &Path, max_lines: usize, max_bytes: usize) -> io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let mut pos = file.seek(SeekFrom::End(0))?;
    let mut buf: Vec<u8> = Vec::new();
    let max_lines = max_lines.max(1);

    while pos > 0 && buf.len() < max_bytes {
        // One extra newline so the first kept line is complete.
        if buf.iter().filter(|&&b| b == b'\n').count() > max_lines {
            break;
        }
        let step = std::cmp::min(4096, pos as usize);
        pos -= step as u64;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step];
        file.read_exact(&mut chunk)?;
        buf.splice(0..0, chunk);
    }

    let content = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = content.lines().collect();
    if pos > 0 && !lines.is_empty() {
        // Partial line at the cut.
        lines.remove(0);
    }
    let lines: Vec<String> = lines
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].to_vec())
}
