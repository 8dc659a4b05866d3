use serde::{Deserialize, Serialize};

/// Contents of `<root>/config/logging.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Master switch; `false` filters every event out.
    pub enabled: bool,
    /// `EnvFilter` directive, e.g. `info` or `quickdic_core=debug,info`.
    pub level: String,
    /// Rolled files older than this are deleted by retention.
    pub keep_days: u64,
    /// Mirror `quickdic::crack` events into their own `crack.log`.
    pub crack_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            keep_days: 14,
            crack_log: true,
        }
    }
}
