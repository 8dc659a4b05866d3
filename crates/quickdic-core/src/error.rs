//! Error types for the cracking scheduler.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Error type for scheduler operations.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Another work unit holds the runner.
    #[error("scheduler busy: {0} is already running")]
    Busy(String),

    /// Shutdown was requested while a run was waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// Filesystem failure with the path that caused it.
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external cracking tool misbehaved.
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration could not be read or written.
    #[error("config error: {0}")]
    Config(String),
}

impl SchedulerError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
