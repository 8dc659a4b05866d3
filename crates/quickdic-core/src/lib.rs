#![deny(unsafe_op_in_unsafe_fn)]
//! Throttled dictionary-attack scheduler for captured WPA handshakes.
//!
//! Captures arrive through [`EventGateway`], are deduplicated by the
//! [`WorkUnitStore`], and are cracked batch by batch against an ordered
//! wordlist queue while CPU load stays under a ceiling.

pub mod backend;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod cpu;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod operations;
pub mod potfile;
pub mod queue;
pub mod report;
pub mod runner;
pub mod store;
pub mod watch;

pub use backend::{AircrackBackend, BatchOutcome, CrackingBackend, HandshakeInfo, HandshakeProbe};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::{read_config, resolve_root, SchedulerConfig};
pub use cpu::CpuSampler;
pub use error::{Result, SchedulerError};
pub use gateway::{
    pending_captures, work_unit_id, CaptureDisposition, CaptureMetadata, CrackedNotifier,
    EventGateway, GatewayStatus, LogNotifier,
};
pub use lock::RunLock;
pub use operations::{dispatch_command, HandlerResult};
pub use queue::{BatchPlan, Candidate};
pub use report::{score, AuditRecord, AuditSink};
pub use runner::{BatchRunner, CrackAttempt, CrackOutcome, RunParams};
pub use store::WorkUnitStore;
pub use watch::{spawn_config_watcher, ConfigChange};
