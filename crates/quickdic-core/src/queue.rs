//! Wordlist enumeration and batch planning.
//!
//! Configured priority wordlists run first, in the configured order. The
//! rest follow smallest file first, which finds weak passwords sooner per
//! unit of CPU time.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};

/// One wordlist file usable by the cracking backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub priority: bool,
}

/// Enumerate wordlists in `dir` and order them for a run.
///
/// Only regular files whose extension equals `extension` are eligible.
/// Names in `priority_names` that are not on disk are skipped. Files of
/// equal size keep name order.
pub fn build(dir: &Path, priority_names: &[String], extension: &str) -> Result<Vec<Candidate>> {
    let entries = fs::read_dir(dir).map_err(|e| SchedulerError::io("list", dir, e))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SchedulerError::io("list", dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(err) => {
                debug!("Skipping {}: {}", path.display(), err);
                continue;
            }
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        found.push(Candidate {
            name,
            path,
            size: metadata.len(),
            priority: false,
        });
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));

    let mut ordered = Vec::with_capacity(found.len());
    let mut taken = HashSet::new();
    for wanted in priority_names {
        if !taken.insert(wanted.as_str()) {
            continue;
        }
        if let Some(pos) = found.iter().position(|c| &c.name == wanted) {
            let mut candidate = found.remove(pos);
            candidate.priority = true;
            ordered.push(candidate);
        }
    }
    let priority_count = ordered.len();

    // Stable sort keeps name order for equal sizes.
    found.sort_by_key(|c| c.size);
    ordered.extend(found);

    info!(
        "Found {} wordlists ({} priority, {} by size)",
        ordered.len(),
        priority_count,
        ordered.len() - priority_count
    );
    Ok(ordered)
}

/// Candidates grouped into the batches handed to one backend invocation each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    batches: Vec<Vec<Candidate>>,
}

impl BatchPlan {
    pub fn new(candidates: &[Candidate], batch_size: usize) -> Self {
        let batches = candidates
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        Self { batches }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn candidate_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Candidate]> {
        self.batches.iter().map(Vec::as_slice)
    }

    /// Batch contents as file names, for status output.
    pub fn names(&self) -> Vec<Vec<String>> {
        self.batches
            .iter()
            .map(|batch| batch.iter().map(|c| c.name.clone()).collect())
            .collect()
    }
}

/// Count non-empty lines of a wordlist. Unreadable files count as zero.
pub fn count_entries(path: &Path) -> u64 {
    File::open(path)
        .map(|file| {
            BufReader::new(file)
                .lines()
                .map_while(|line| line.ok())
                .filter(|line| !line.trim().is_empty())
                .count() as u64
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_sized(dir: &Path, name: &str, size: usize) {
        fs::write(dir.join(name), vec![b'a'; size]).unwrap();
    }

    fn names(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn priority_first_in_configured_order_then_ascending_size() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "rockyou-75.txt", 1000);
        write_sized(dir.path(), "darkc0de.txt", 50);
        write_sized(dir.path(), "big.txt", 9000);
        write_sized(dir.path(), "small.txt", 10);
        write_sized(dir.path(), "mid.txt", 500);
        write_sized(dir.path(), "ignored.lst", 1);

        let priority = vec![
            "rockyou-75.txt".to_string(),
            "missing.txt".to_string(),
            "darkc0de.txt".to_string(),
        ];
        let built = build(dir.path(), &priority, "txt").unwrap();

        assert_eq!(
            names(&built),
            vec!["rockyou-75.txt", "darkc0de.txt", "small.txt", "mid.txt", "big.txt"]
        );
        assert!(built[0].priority && built[1].priority);
        assert!(built[2..].iter().all(|c| !c.priority));
        assert!(built[2..].windows(2).all(|w| w[0].size <= w[1].size));
    }

    #[test]
    fn equal_sizes_keep_name_order_and_duplicates_in_priority_are_ignored() {
        let dir = TempDir::new().unwrap();
        write_sized(dir.path(), "c.txt", 5);
        write_sized(dir.path(), "a.txt", 5);
        write_sized(dir.path(), "b.txt", 5);
        fs::create_dir(dir.path().join("sub.txt")).unwrap();

        let priority = vec!["b.txt".to_string(), "b.txt".to_string()];
        let built = build(dir.path(), &priority, "txt").unwrap();
        assert_eq!(names(&built), vec!["b.txt", "a.txt", "c.txt"]);
    }

    #[test]
    fn missing_dir_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = build(&dir.path().join("nope"), &[], "txt").unwrap_err();
        assert!(matches!(err, SchedulerError::Io { .. }));
    }

    #[test]
    fn plan_chunks_preserve_order_and_cover_every_candidate() {
        let dir = TempDir::new().unwrap();
        for (i, size) in [30, 10, 20, 40, 50].iter().enumerate() {
            write_sized(dir.path(), &format!("w{i}.txt"), *size);
        }
        let built = build(dir.path(), &[], "txt").unwrap();
        let plan = BatchPlan::new(&built, 2);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.candidate_count(), 5);
        assert_eq!(
            plan.names(),
            vec![
                vec!["w1.txt".to_string(), "w2.txt".to_string()],
                vec!["w0.txt".to_string(), "w3.txt".to_string()],
                vec!["w4.txt".to_string()],
            ]
        );
    }

    #[test]
    fn zero_batch_size_behaves_like_one() {
        let plan = BatchPlan::new(
            &[Candidate {
                name: "a.txt".into(),
                path: PathBuf::from("a.txt"),
                size: 1,
                priority: false,
            }],
            0,
        );
        assert_eq!(plan.len(), 1);
        assert!(BatchPlan::new(&[], 3).is_empty());
    }

    #[test]
    fn count_entries_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("w.txt");
        fs::write(&path, "alpha\n\nbeta\n  \ngamma").unwrap();
        assert_eq!(count_entries(&path), 3);
        assert_eq!(count_entries(&dir.path().join("absent.txt")), 0);
    }
}
