use std::path::Path;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_log::LogTracer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::targets::T_CRACK;

pub const CRACK_LOG_NAME: &str = "crack.log";

static RELOAD: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Keeps the non-blocking file writers alive; drop flushes them.
pub struct LoggingGuards {
    _file_guards: Vec<WorkerGuard>,
}

/// Install the global subscriber for a long-running component.
///
/// Events go to stdout, to `<root>/logs/<component>.log` and, for the
/// [`T_CRACK`] target only, to `<root>/logs/crack.log`. When the log
/// directory cannot be created the component keeps stdout logging only.
pub fn init(component: &str, root: &Path, cfg: &LoggingConfig) -> Result<LoggingGuards> {
    let (filter_layer, handle) = reload::Layer::new(build_filter(cfg));
    let _ = RELOAD.set(handle);

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .compact();

    let base = tracing_subscriber::registry()
        .with(filter_layer)
        .with(ErrorLayer::default())
        .with(stdout_layer);

    let log_dir = root.join("logs");
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        base.try_init().ok();
        let _ = LogTracer::init();
        tracing::warn!("File logging disabled ({}): {}", log_dir.display(), err);
        return Ok(LoggingGuards {
            _file_guards: Vec::new(),
        });
    }

    let appender = tracing_appender::rolling::daily(&log_dir, component_log_name(component));
    let (component_writer, component_guard) = tracing_appender::non_blocking(appender);
    let component_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_writer(component_writer)
        .with_filter(
            Targets::new()
                .with_default(LevelFilter::TRACE)
                .with_target(T_CRACK, LevelFilter::OFF),
        );

    let mut guards = vec![component_guard];
    let crack_layer = if cfg.crack_log {
        let crack_appender = tracing_appender::rolling::daily(&log_dir, CRACK_LOG_NAME);
        let (crack_writer, crack_guard) = tracing_appender::non_blocking(crack_appender);
        guards.push(crack_guard);
        Some(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(false)
                .compact()
                .with_writer(crack_writer)
                .with_filter(Targets::new().with_target(T_CRACK, LevelFilter::TRACE)),
        )
    } else {
        None
    };

    base.with(component_layer).with(crack_layer).try_init().ok();
    let _ = LogTracer::init();

    Ok(LoggingGuards {
        _file_guards: guards,
    })
}

/// Stderr-only subscriber for one-shot CLI invocations.
pub fn init_console(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}

/// Swap the active filter after a config change.
pub fn apply(cfg: &LoggingConfig) -> Result<()> {
    let handle = RELOAD
        .get()
        .ok_or_else(|| anyhow::anyhow!("logging not initialized"))?;
    handle.reload(build_filter(cfg))?;
    Ok(())
}

fn build_filter(cfg: &LoggingConfig) -> EnvFilter {
    if !cfg.enabled {
        return EnvFilter::new("off");
    }
    EnvFilter::try_new(&cfg.level).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub(crate) fn component_log_name(component: &str) -> String {
    format!("{component}.log")
}
