//! Tracing targets that get their own log file.

/// Batch runner progress and backend invocations.
pub const T_CRACK: &str = "quickdic::crack";
