#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use quickdic_core::backend::check_tool;
use quickdic_core::{read_config, spawn_config_watcher, ConfigChange, EventGateway, LogNotifier};

mod cancel_bridge;
mod captures;
mod config;
mod jobs;

use config::DaemonConfig;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config = DaemonConfig::from_env();
    let log_cfg = quickdic_logging::fs::read_config(&config.root_path);
    let _logging_guards = quickdic_logging::init("quickdicd", &config.root_path, &log_cfg)?;

    install_panic_hook();

    let span = tracing::info_span!("quickdicd", component = "quickdicd");
    let _span_guard = span.enter();

    let scheduler_cfg = read_config(&config.root_path);
    check_tool(&scheduler_cfg.aircrack_path);

    let global_cancel = CancellationToken::new();
    let cancel_flag = cancel_bridge::create_cancel_flag(&global_cancel);
    let gateway = Arc::new(
        EventGateway::from_config(scheduler_cfg.clone())
            .with_notifier(Arc::new(LogNotifier))
            .with_cancel_flag(cancel_flag),
    );
    info!(
        candidates = gateway.status().candidates,
        processed = gateway.store().len(),
        "Scheduler ready"
    );

    spawn_retention_task(config.root_path.clone(), global_cancel.clone());
    let config_handle = spawn_config_task(config.root_path.clone(), Arc::clone(&gateway), global_cancel.clone());

    let mut runs = JoinSet::new();
    let (capture_tx, mut capture_rx) = mpsc::unbounded_channel::<PathBuf>();
    if config.watch_captures {
        if let Err(err) = captures::spawn_capture_watcher(
            &scheduler_cfg.handshake_dir,
            &scheduler_cfg.capture_extension,
            capture_tx,
        ) {
            warn!("Capture watcher disabled: {}", err);
        }
    } else {
        drop(capture_tx);
    }

    let mut sweep = config.sweep_interval.map(tokio::time::interval);
    if sweep.is_none() {
        info!("Periodic sweep disabled");
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("quickdicd ready");
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(capture) = capture_rx.recv() => {
                let gateway = Arc::clone(&gateway);
                let cancel = global_cancel.clone();
                runs.spawn(async move {
                    if let Err(err) = jobs::dispatch_capture(gateway, capture, cancel).await {
                        warn!("Capture dispatch failed: {}", err);
                    }
                });
            }
            _ = tick(&mut sweep) => {
                let gateway = Arc::clone(&gateway);
                let cancel = global_cancel.clone();
                runs.spawn(async move {
                    if let Err(err) = jobs::sweep(gateway, cancel).await {
                        warn!("Sweep failed: {}", err);
                    }
                });
            }
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                if let Err(err) = joined {
                    error!("Run task failed: {}", err);
                }
            }
        }
    }

    info!("Starting graceful shutdown...");
    global_cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(2), config_handle).await;

    let drained = tokio::time::timeout(config.shutdown_timeout, async {
        while runs.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Forced shutdown with {} runs still active", runs.len());
    }

    info!("quickdicd stopped");
    Ok(())
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(err) => {
            warn!("Failed to register SIGTERM handler: {}", err);
            return std::future::pending().await;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(signal) => signal,
        Err(err) => {
            warn!("Failed to register SIGINT handler: {}", err);
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
    }
}

/// Apply config file changes until shutdown.
fn spawn_config_task(
    root: PathBuf,
    gateway: Arc<EventGateway>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ConfigChange>();
    if let Err(err) = spawn_config_watcher(&root, move |change| {
        let _ = tx.send(change);
    }) {
        warn!("Config watcher disabled: {}", err);
    }

    tokio::spawn(async move {
        loop {
            let change = tokio::select! {
                _ = cancel.cancelled() => break,
                change = rx.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
            };
            match change {
                ConfigChange::Scheduler => {
                    let root = root.clone();
                    let gateway = Arc::clone(&gateway);
                    let applied = jobs::run_blocking(&cancel, move || {
                        gateway.apply_config(read_config(&root));
                    })
                    .await;
                    if let Err(err) = applied {
                        warn!("Failed to apply scheduler config: {}", err);
                    }
                }
                ConfigChange::Logging => {
                    let cfg = quickdic_logging::fs::read_config(&root);
                    if let Err(err) = quickdic_logging::apply(&cfg) {
                        warn!("Failed to apply logging config: {}", err);
                    }
                }
            }
        }
    })
}

fn spawn_retention_task(root: PathBuf, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Log retention task stopped by shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    let cfg = quickdic_logging::fs::read_config(&root);
                    if let Err(err) = quickdic_logging::run_retention(&root, &cfg) {
                        warn!("Log retention failed: {}", err);
                    }
                }
            }
        }
    });
}

/// Log panics with location and backtrace before the default hook runs.
fn install_panic_hook() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        let backtrace = std::backtrace::Backtrace::capture();
        error!(
            target: "quickdicd::panic",
            location = %location,
            message = %message,
            "PANIC: daemon panicked"
        );
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            error!(target: "quickdicd::panic", backtrace = %backtrace, "Panic backtrace");
        }

        default_hook(panic_info);
    }));
}
