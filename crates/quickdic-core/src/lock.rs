//! Cross-process claim on the cracking tool.
//!
//! The CLI and the daemon each keep their own in-process run guard, so the
//! host-wide "one run at a time" rule is enforced with an advisory `flock`
//! on a shared lock file. The kernel drops the lock when the holder exits,
//! so a crashed run never leaves a stale claim behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Result, SchedulerError};

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without waiting. `Ok(None)` when another holder has it.
    pub fn try_acquire(path: &Path, work_unit: &str) -> Result<Option<Self>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SchedulerError::io("create", parent, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| SchedulerError::io("open", path, e))?;

        if let Err(err) = file.try_lock_exclusive() {
            if is_contended(&err) {
                return Ok(None);
            }
            return Err(SchedulerError::io("lock", path, err));
        }

        let lock = Self {
            file,
            path: path.to_path_buf(),
        };
        if let Err(err) = lock.write_holder(work_unit) {
            debug!("Could not record run lock holder in {}: {}", path.display(), err);
        }
        Ok(Some(lock))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_holder(&self, work_unit: &str) -> io::Result<()> {
        self.file.set_len(0)?;
        let mut file = &self.file;
        writeln!(file, "{} {}", std::process::id(), work_unit)
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("processed.log.lock");

        let first = RunLock::try_acquire(&path, "a.pcap").unwrap().unwrap();
        assert_eq!(first.path(), path);
        assert!(RunLock::try_acquire(&path, "b.pcap").unwrap().is_none());

        let holder = fs::read_to_string(&path).unwrap();
        assert!(holder.trim_end().ends_with(" a.pcap"));

        drop(first);
        assert!(RunLock::try_acquire(&path, "b.pcap").unwrap().is_some());
    }
}
