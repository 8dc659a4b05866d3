use std::path::Path;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use quickdic_logging::fs::LOGGING_CONFIG_FILENAME;

use crate::config::{config_path, CONFIG_FILENAME};
use crate::error::{Result, SchedulerError};

/// Which config file changed under `<root>/config/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Scheduler,
    Logging,
}

/// Watch the config directory and call `on_change` for each relevant write.
///
/// The watcher lives on its own thread until its channel closes.
pub fn spawn_config_watcher<F>(root: &Path, on_change: F) -> Result<JoinHandle<()>>
where
    F: Fn(ConfigChange) + Send + 'static,
{
    let watch_dir = config_path(root)
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| SchedulerError::Config("config path has no parent dir".into()))?;
    std::fs::create_dir_all(&watch_dir)
        .map_err(|e| SchedulerError::io("create", &watch_dir, e))?;

    let handle = thread::spawn(move || {
        let (tx, rx) = mpsc::channel();
        let mut watcher = match notify::recommended_watcher(tx) {
            Ok(watcher) => watcher,
            Err(err) => {
                tracing::warn!("Failed to start config watcher: {}", err);
                return;
            }
        };

        if let Err(err) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            tracing::warn!("Failed to watch config dir {}: {}", watch_dir.display(), err);
            return;
        }

        loop {
            match rx.recv() {
                Ok(Ok(event)) => {
                    for change in classify(&event) {
                        on_change(change);
                    }
                }
                Ok(Err(err)) => tracing::warn!("Config watcher error: {}", err),
                Err(err) => {
                    tracing::warn!("Config watcher stopped: {}", err);
                    return;
                }
            }
        }
    });

    Ok(handle)
}

/// Changes named by one notify event, deduplicated.
pub fn classify(event: &Event) -> Vec<ConfigChange> {
    if !matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    ) {
        return Vec::new();
    }

    let mut changes = Vec::new();
    for path in &event.paths {
        let change = match file_name(path).as_deref() {
            Some(CONFIG_FILENAME) => ConfigChange::Scheduler,
            Some(LOGGING_CONFIG_FILENAME) => ConfigChange::Logging,
            _ => continue,
        };
        if !changes.contains(&change) {
            changes.push(change);
        }
    }
    changes
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use notify::event::{AccessKind, CreateKind, ModifyKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |ev, p| ev.add_path(PathBuf::from(p)))
    }

    #[test]
    fn picks_out_known_config_files() {
        let ev = event(
            EventKind::Modify(ModifyKind::Any),
            &[
                "/r/config/quickdic.json",
                "/r/config/logging.json",
                "/r/config/quickdic.json",
                "/r/config/other.json",
            ],
        );
        assert_eq!(classify(&ev), vec![ConfigChange::Scheduler, ConfigChange::Logging]);

        let ev = event(EventKind::Create(CreateKind::File), &["/r/config/logging.json"]);
        assert_eq!(classify(&ev), vec![ConfigChange::Logging]);
    }

    #[test]
    fn ignores_reads() {
        let ev = event(EventKind::Access(AccessKind::Any), &["/r/config/quickdic.json"]);
        assert!(classify(&ev).is_empty());
    }
}
