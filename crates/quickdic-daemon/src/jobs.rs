//! Blocking scheduler work driven from the async side.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use quickdic_core::{CaptureDisposition, EventGateway};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run `f` on the blocking pool unless shutdown has already begun.
pub async fn run_blocking<F, T>(cancel: &CancellationToken, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        bail!("operation cancelled");
    }
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| anyhow!("blocking task panicked: {err}"))
}

/// Hand one new capture to the gateway. Events arriving while a run is
/// active are dropped; the sweep picks them up later.
pub async fn dispatch_capture(
    gateway: Arc<EventGateway>,
    capture: PathBuf,
    cancel: CancellationToken,
) -> Result<Option<CaptureDisposition>> {
    if gateway.is_busy() {
        info!("Already processing a handshake, dropped {}", capture.display());
        return Ok(Some(CaptureDisposition::Busy));
    }
    let path = capture.clone();
    let outcome = run_blocking(&cancel, move || gateway.submit_capture(&path, None)).await??;
    match &outcome {
        Some(disposition) => log_disposition(&capture, disposition),
        None => info!("No handshake in {} yet", capture.display()),
    }
    Ok(outcome)
}

/// Process the oldest pending capture, if the runner is free.
pub async fn sweep(
    gateway: Arc<EventGateway>,
    cancel: CancellationToken,
) -> Result<Option<(PathBuf, CaptureDisposition)>> {
    if gateway.is_busy() {
        return Ok(None);
    }
    let next = run_blocking(&cancel, move || gateway.process_next()).await??;
    if let Some((capture, disposition)) = &next {
        log_disposition(capture, disposition);
    }
    Ok(next)
}

fn log_disposition(capture: &std::path::Path, disposition: &CaptureDisposition) {
    match disposition {
        CaptureDisposition::Completed(attempt) => info!(
            work_unit = %attempt.work_unit,
            outcome = attempt.outcome.label(),
            invocations = attempt.invocations,
            "Finished {}",
            capture.display()
        ),
        CaptureDisposition::AlreadyProcessed => {
            info!("{} was already processed", capture.display())
        }
        CaptureDisposition::Busy => warn!("Runner busy, dropped {}", capture.display()),
    }
}
