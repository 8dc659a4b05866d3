//! Watch the handshake directory for new captures.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Forward every new capture in `dir` to `tx` until the receiver is dropped.
pub fn spawn_capture_watcher(
    dir: &Path,
    extension: &str,
    tx: UnboundedSender<PathBuf>,
) -> Result<JoinHandle<()>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating handshake dir {}", dir.display()))?;
    let dir = dir.to_path_buf();
    let extension = extension.to_string();

    let handle = thread::spawn(move || {
        let (events_tx, events_rx) = mpsc::channel();
        let mut watcher = match notify::recommended_watcher(events_tx) {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!("Failed to start capture watcher: {}", err);
                return;
            }
        };
        if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            warn!("Failed to watch {}: {}", dir.display(), err);
            return;
        }

        for event in events_rx {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!("Capture watcher error: {}", err);
                    continue;
                }
            };
            for path in new_captures(&event, &extension) {
                debug!("Capture event for {}", path.display());
                if tx.send(path).is_err() {
                    return;
                }
            }
        }
    });

    Ok(handle)
}

/// Capture files an event announces as created, finished or moved in.
pub fn new_captures(event: &Event, extension: &str) -> Vec<PathBuf> {
    let paths: &[PathBuf] = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any)
        | EventKind::Access(AccessKind::Close(AccessMode::Write))
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.as_slice(),
        // Both carries [from, to].
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.get(1..).unwrap_or(&[]),
        _ => &[],
    };
    paths
        .iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(extension))
        .cloned()
        .collect()
}
