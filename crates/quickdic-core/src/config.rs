//! Scheduler configuration.
//!
//! The configuration is a single JSON document at
//! `<root>/config/quickdic.json`. Every field has a default, so a partial
//! file (or none at all) still yields a complete [`SchedulerConfig`].
//! Callers replace the whole struct on reload instead of patching fields.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quickdic_logging::fs::write_atomic;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::runner::RunParams;

pub const CONFIG_FILENAME: &str = "quickdic.json";
pub const DEFAULT_ROOT_PATH: &str = "/etc/quickdic";
pub const ROOT_ENV: &str = "QUICKDIC_ROOT";

pub const DEFAULT_MAX_CPU_PERCENT: f32 = 80.0;
pub const DEFAULT_WORDLISTS_PER_BATCH: usize = 3;
pub const DEFAULT_BATCH_DELAY_SECS: u64 = 3;

/// Where CPU utilisation is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuSource {
    /// Busy share between two `/proc/stat` samples.
    #[default]
    Stat,
    /// One-minute load average over the CPU count.
    Loadavg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub wordlist_folder: PathBuf,
    pub wordlist_extension: String,
    pub max_cpu_percent: f32,
    pub wordlists_per_batch: usize,
    pub batch_delay_secs: u64,
    pub priority_wordlists: Vec<String>,
    pub security_log: PathBuf,
    pub processed_log: PathBuf,
    pub potfile_path: Option<PathBuf>,
    pub handshake_dir: PathBuf,
    pub capture_extension: String,
    pub aircrack_path: PathBuf,
    pub cpu_source: CpuSource,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wordlist_folder: PathBuf::from("/home/pi/wordlists/"),
            wordlist_extension: "txt".to_string(),
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
            wordlists_per_batch: DEFAULT_WORDLISTS_PER_BATCH,
            batch_delay_secs: DEFAULT_BATCH_DELAY_SECS,
            priority_wordlists: vec![
                "rockyou-75.txt".to_string(),
                "darkc0de.txt".to_string(),
                "john-the-ripper.txt".to_string(),
            ],
            security_log: PathBuf::from("/home/pi/security_audit.log"),
            processed_log: PathBuf::from("/home/pi/handshakes/quickdic_processed_files.log"),
            potfile_path: Some(PathBuf::from(
                "/home/pi/handshakes/quickdic.cracked.potfile",
            )),
            handshake_dir: PathBuf::from("/home/pi/handshakes"),
            capture_extension: "pcap".to_string(),
            aircrack_path: PathBuf::from("/usr/bin/aircrack-ng"),
            cpu_source: CpuSource::default(),
        }
    }
}

impl SchedulerConfig {
    /// Clamp values that would stall or spin the runner.
    pub fn normalized(mut self) -> Self {
        self.wordlists_per_batch = self.wordlists_per_batch.max(1);
        if !self.max_cpu_percent.is_finite() {
            self.max_cpu_percent = DEFAULT_MAX_CPU_PERCENT;
        }
        self.max_cpu_percent = self.max_cpu_percent.clamp(1.0, 100.0);
        self.wordlist_extension = self.wordlist_extension.trim_start_matches('.').to_string();
        self.capture_extension = self.capture_extension.trim_start_matches('.').to_string();
        self
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_secs)
    }

    /// Lock file held while any quickdic process is cracking; sits next to
    /// the processed log so every process sharing that log shares it too.
    pub fn run_lock_path(&self) -> PathBuf {
        let mut name = self.processed_log.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn run_params(&self) -> RunParams {
        RunParams {
            ceiling_pct: self.max_cpu_percent,
            batch_size: self.wordlists_per_batch.max(1),
            inter_batch_delay: self.batch_delay(),
        }
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join("config").join(CONFIG_FILENAME)
}

/// `--root` wins, then `QUICKDIC_ROOT`, then the packaged default.
pub fn resolve_root(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var(ROOT_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_PATH))
}

/// Load the scheduler config, seeding defaults when the file is missing.
///
/// A file that fails to parse is logged and replaced by defaults in memory
/// only; the broken file is left for the operator to fix.
pub fn read_config(root: &Path) -> SchedulerConfig {
    let path = config_path(root);
    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<SchedulerConfig>(&contents) {
            Ok(cfg) => cfg.normalized(),
            Err(err) => {
                warn!("Invalid config {}: {}; using defaults", path.display(), err);
                SchedulerConfig::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let cfg = SchedulerConfig::default();
            if let Err(err) = write_config_atomic(root, &cfg) {
                warn!("Could not seed {}: {}", path.display(), err);
            }
            cfg
        }
        Err(err) => {
            warn!("Could not read {}: {}; using defaults", path.display(), err);
            SchedulerConfig::default()
        }
    }
}

pub fn write_config_atomic(root: &Path, cfg: &SchedulerConfig) -> Result<()> {
    let path = config_path(root);
    let data = serde_json::to_vec_pretty(cfg)
        .map_err(|e| SchedulerError::Config(format!("serializing config: {e}")))?;
    write_atomic(&path, &data, 0o644).map_err(|e| SchedulerError::io("write", &path, e))
}
