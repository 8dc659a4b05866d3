//! Record of captures that have already been claimed for a cracking run.
//!
//! Persisted as an append-only text log, one identifier per line. The log is
//! read once at startup; duplicate lines collapse into the in-memory set.
//! Every claim re-reads the log under an exclusive `flock`, so marks made by
//! another process sharing the log (the CLI next to the daemon) are honoured.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use tracing::{debug, error, info};

use crate::error::{Result, SchedulerError};

#[derive(Debug)]
pub struct WorkUnitStore {
    path: PathBuf,
    processed: Mutex<HashSet<String>>,
}

impl WorkUnitStore {
    /// Open the store at `path`, loading any previous log.
    ///
    /// A missing log starts an empty store. An unreadable one is logged and
    /// also starts empty; later appends still go to `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let processed = match load_log(&path) {
            Ok(Some(set)) => {
                info!("Loaded {} previously processed captures", set.len());
                set
            }
            Ok(None) => {
                info!("No processed captures log at {}, starting fresh", path.display());
                HashSet::new()
            }
            Err(err) => {
                error!("Error loading processed captures: {}", err);
                HashSet::new()
            }
        };
        Self {
            path,
            processed: Mutex::new(processed),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    /// Mark `id` processed. Returns `true` when the id was new, here and in
    /// the on-disk log.
    ///
    /// A failed append is logged and the id is still kept in memory, so it
    /// will not be retried until the process restarts.
    pub fn mark_processed(&self, id: &str) -> bool {
        let mut processed = self.lock();
        if processed.contains(id) {
            return false;
        }
        match claim_in_log(&self.path, id, &mut processed) {
            Ok(true) => info!("Marked {} as processed", id),
            Ok(false) => {
                info!("{} was already claimed by another process", id);
                return false;
            }
            Err(err) => error!("Error saving processed capture {}: {}", id, err),
        }
        processed.insert(id.to_string());
        true
    }

    /// Merge marks appended to the log since it was loaded.
    pub fn refresh(&self) {
        let mut processed = self.lock();
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!("Cannot refresh {}: {}", self.path.display(), err);
                }
                return;
            }
        };
        let merged = file
            .lock_shared()
            .map_err(|e| SchedulerError::io("lock", &self.path, e))
            .and_then(|_| merge_lines(&file, &self.path, &mut processed));
        if let Err(err) = merged {
            debug!("Cannot refresh processed captures: {}", err);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // The set is only ever inserted into, so a poisoned guard is still consistent.
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_log(path: &Path) -> Result<Option<HashSet<String>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(SchedulerError::io("open", path, err)),
    };
    let mut set = HashSet::new();
    merge_lines(&file, path, &mut set)?;
    Ok(Some(set))
}

fn merge_lines(file: &File, path: &Path, set: &mut HashSet<String>) -> Result<()> {
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| SchedulerError::io("read", path, e))?;
        let id = line.trim();
        if !id.is_empty() && !set.contains(id) {
            set.insert(id.to_string());
        }
    }
    Ok(())
}

/// Append `id` unless the log already holds it. `processed` picks up every
/// id found in the log along the way.
fn claim_in_log(path: &Path, id: &str, processed: &mut HashSet<String>) -> Result<bool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| SchedulerError::io("create", parent, e))?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| SchedulerError::io("open", path, e))?;
    file.lock_exclusive()
        .map_err(|e| SchedulerError::io("lock", path, e))?;

    merge_lines(&file, path, processed)?;
    if processed.contains(id) {
        return Ok(false);
    }
    let mut writer = &file;
    writeln!(writer, "{id}").map_err(|e| SchedulerError::io("append to", path, e))?;
    Ok(true)
}
