//! On-disk helpers shared by every quickdic config file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::LoggingConfig;

pub const LOGGING_CONFIG_FILENAME: &str = "logging.json";

pub fn config_path(root: &Path) -> PathBuf {
    root.join("config").join(LOGGING_CONFIG_FILENAME)
}

/// Replace `path` with `data` through a synced sibling temp file.
///
/// Readers see either the old contents or the new, never a torn write.
/// `mode` applies to the temp file and so to the result (unix only).
pub fn write_atomic(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut opts = fs::OpenOptions::new();
    opts.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = opts.open(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)
}

/// Logging config for `root`. A missing file is seeded with defaults; an
/// unreadable or malformed one yields defaults and is left as is.
pub fn read_config(root: &Path) -> LoggingConfig {
    let path = config_path(root);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(err) => {
            let cfg = LoggingConfig::default();
            if err.kind() == io::ErrorKind::NotFound {
                let _ = write_config_atomic(root, &cfg);
            }
            return cfg;
        }
    };
    serde_json::from_slice(&raw).unwrap_or_default()
}

pub fn write_config_atomic(root: &Path, cfg: &LoggingConfig) -> Result<()> {
    let path = config_path(root);
    let data = serde_json::to_vec_pretty(cfg).context("serializing logging config")?;
    write_atomic(&path, &data, 0o600).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_is_seeded_with_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = read_config(dir.path());
        assert_eq!(cfg, LoggingConfig::default());
        assert!(config_path(dir.path()).exists());
    }

    #[test]
    fn written_config_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let cfg = LoggingConfig {
            enabled: false,
            level: "debug".to_string(),
            keep_days: 3,
            crack_log: false,
        };
        write_config_atomic(dir.path(), &cfg).unwrap();
        assert_eq!(read_config(dir.path()), cfg);
        assert!(!config_path(dir.path()).with_extension("json.tmp").exists());
    }

    #[test]
    fn garbage_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = config_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert_eq!(read_config(dir.path()), LoggingConfig::default());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_replaces_and_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("state.json");
        write_atomic(&path, b"one", 0o640).unwrap();
        write_atomic(&path, b"two", 0o640).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
        assert!(!dir.path().join("deep").join("state.json.tmp").exists());
    }
}
