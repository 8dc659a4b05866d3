//! Host-facing entry point: capture-ready events in, cracked keys out.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use quickdic_logging::targets::T_CRACK;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{AircrackBackend, CrackingBackend, HandshakeProbe};
use crate::cancel::CancelFlag;
use crate::config::SchedulerConfig;
use crate::cpu::{sampler_for, CpuSampler};
use crate::error::{Result, SchedulerError};
use crate::lock::RunLock;
use crate::potfile;
use crate::queue::{self, BatchPlan, Candidate};
use crate::report::AuditSink;
use crate::runner::{BatchRunner, CrackAttempt, CrackOutcome, RunState};
use crate::store::WorkUnitStore;

/// Receives keys recovered by a run. Delivery is at most once.
pub trait CrackedNotifier: Send + Sync {
    fn on_cracked(&self, target_id: &str, password: &str);
}

/// Notifier that only writes the hit to the crack log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl CrackedNotifier for LogNotifier {
    fn on_cracked(&self, target_id: &str, _password: &str) {
        warn!(target: T_CRACK, target_id = %target_id, "Cracked password for {}", target_id);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureMetadata {
    pub capture_path: PathBuf,
    pub ssid: Option<String>,
    pub station_mac: Option<String>,
}

impl CaptureMetadata {
    pub fn for_path(capture_path: impl Into<PathBuf>) -> Self {
        Self {
            capture_path: capture_path.into(),
            ..Self::default()
        }
    }
}

/// What happened to a capture-ready event.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureDisposition {
    Completed(CrackAttempt),
    AlreadyProcessed,
    Busy,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub running: Option<String>,
    pub candidates: usize,
    pub batches: usize,
    pub processed: usize,
    pub wordlist_folder: PathBuf,
    pub handshake_dir: PathBuf,
}

/// Work-unit id of a capture: its file name.
pub fn work_unit_id(capture: &Path) -> String {
    capture
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| capture.display().to_string())
}

/// Unprocessed captures in `dir`, oldest modification time first.
pub fn pending_captures(dir: &Path, extension: &str, store: &WorkUnitStore) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| SchedulerError::io("list", dir, e))?;
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() || store.is_processed(&work_unit_id(&path)) {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, path));
    }
    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

pub struct EventGateway {
    config: RwLock<SchedulerConfig>,
    candidates: RwLock<Vec<Candidate>>,
    store: RwLock<Arc<WorkUnitStore>>,
    audit: RwLock<Arc<AuditSink>>,
    runner: BatchRunner,
    probe: Arc<dyn HandshakeProbe>,
    notifiers: Vec<Arc<dyn CrackedNotifier>>,
}

impl EventGateway {
    pub fn new(
        config: SchedulerConfig,
        backend: Arc<dyn CrackingBackend>,
        probe: Arc<dyn HandshakeProbe>,
        sampler: Arc<dyn CpuSampler>,
    ) -> Self {
        let config = config.normalized();
        let candidates = enumerate(&config);
        let store = Arc::new(WorkUnitStore::open(&config.processed_log));
        let audit = Arc::new(AuditSink::new(&config.security_log));
        Self {
            config: RwLock::new(config),
            candidates: RwLock::new(candidates),
            store: RwLock::new(store),
            audit: RwLock::new(audit),
            runner: BatchRunner::new(backend, sampler),
            probe,
            notifiers: Vec::new(),
        }
    }

    /// Gateway backed by `aircrack-ng` and the configured CPU source.
    pub fn from_config(config: SchedulerConfig) -> Self {
        let tool = Arc::new(AircrackBackend::new(&config.aircrack_path));
        let sampler = sampler_for(config.cpu_source);
        Self::new(config, tool.clone(), tool, sampler)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CrackedNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.runner = self.runner.with_cancel_flag(flag);
        self
    }

    pub fn config(&self) -> SchedulerConfig {
        read(&self.config).clone()
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        read(&self.candidates).clone()
    }

    pub fn plan(&self) -> BatchPlan {
        let batch_size = read(&self.config).wordlists_per_batch;
        BatchPlan::new(&read(&self.candidates), batch_size)
    }

    pub fn store(&self) -> Arc<WorkUnitStore> {
        read(&self.store).clone()
    }

    pub fn is_busy(&self) -> bool {
        self.runner.is_busy()
    }

    /// Swap in a new config and re-enumerate wordlists.
    pub fn apply_config(&self, config: SchedulerConfig) {
        let config = config.normalized();
        let candidates = enumerate(&config);
        let previous = read(&self.config).clone();

        if previous.processed_log != config.processed_log {
            *write(&self.store) = Arc::new(WorkUnitStore::open(&config.processed_log));
        }
        if previous.security_log != config.security_log {
            *write(&self.audit) = Arc::new(AuditSink::new(&config.security_log));
        }
        if previous.cpu_source != config.cpu_source {
            self.runner.set_sampler(sampler_for(config.cpu_source));
        }
        if previous.aircrack_path != config.aircrack_path {
            warn!(
                "aircrack_path changed to {}; restart to use it",
                config.aircrack_path.display()
            );
        }

        info!(
            candidates = candidates.len(),
            batch_size = config.wordlists_per_batch,
            "Configuration applied"
        );
        *write(&self.candidates) = candidates;
        *write(&self.config) = config;
    }

    /// Run the pipeline for one capture unless it already ran or a run is
    /// in progress.
    pub fn on_capture_ready(
        &self,
        work_unit_id: &str,
        target_id: &str,
        metadata: &CaptureMetadata,
    ) -> CaptureDisposition {
        let guard = match self.runner.try_claim(work_unit_id) {
            Ok(guard) => guard,
            Err(err) => {
                info!("Skipping {}: {}", work_unit_id, err);
                return CaptureDisposition::Busy;
            }
        };

        let config = self.config();
        let lock_path = config.run_lock_path();
        let _run_lock = match RunLock::try_acquire(&lock_path, work_unit_id) {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                info!("Skipping {}: another quickdic process is cracking", work_unit_id);
                return CaptureDisposition::Busy;
            }
            Err(err) => {
                warn!("Running {} without the host run lock: {}", work_unit_id, err);
                None
            }
        };

        let store = self.store();
        if !store.mark_processed(work_unit_id) {
            debug!("{} already processed", work_unit_id);
            return CaptureDisposition::AlreadyProcessed;
        }

        let params = config.run_params();
        let potfile_path = config.potfile_path.clone();
        let candidates = enumerate(&config);
        *write(&self.candidates) = candidates.clone();
        info!(
            work_unit = %work_unit_id,
            target = %target_id,
            "Processing handshake file {}",
            metadata.capture_path.display()
        );

        let attempt = guard.run(&metadata.capture_path, target_id, &candidates, &params);
        let audit = read(&self.audit).clone();
        audit.record(&attempt);

        match &attempt.outcome {
            CrackOutcome::Found(password) => {
                if let Some(path) = potfile_path {
                    potfile::record_hit(
                        &path,
                        &metadata.capture_path,
                        target_id,
                        metadata.station_mac.as_deref(),
                        metadata.ssid.as_deref(),
                        password,
                    );
                }
                for notifier in &self.notifiers {
                    notifier.on_cracked(target_id, password);
                }
            }
            CrackOutcome::NotFound => info!("No password found in any wordlist"),
            CrackOutcome::Error(reason) => warn!("Run for {} ended early: {}", work_unit_id, reason),
        }
        CaptureDisposition::Completed(attempt)
    }

    /// Probe `capture` and dispatch it. `Ok(None)` when the capture has no
    /// usable handshake; such captures are left unmarked.
    pub fn submit_capture(&self, capture: &Path, target: Option<&str>) -> Result<Option<CaptureDisposition>> {
        let id = work_unit_id(capture);
        if self.runner.is_busy() {
            info!("Already processing a handshake, skipping {}", id);
            return Ok(Some(CaptureDisposition::Busy));
        }
        if self.store().is_processed(&id) {
            return Ok(Some(CaptureDisposition::AlreadyProcessed));
        }

        let mut metadata = CaptureMetadata::for_path(capture);
        let target = match self.probe.probe(capture)? {
            Some(info) => {
                info!(bssid = %info.bssid, "Handshake confirmed in {}", id);
                metadata.ssid = info.ssid;
                metadata.station_mac = info.station_mac;
                target.map(str::to_string).unwrap_or(info.bssid)
            }
            None => {
                info!("No handshake found in {}", capture.display());
                return Ok(None);
            }
        };
        Ok(Some(self.on_capture_ready(&id, &target, &metadata)))
    }

    /// Process the oldest pending capture that holds a handshake.
    pub fn process_next(&self) -> Result<Option<(PathBuf, CaptureDisposition)>> {
        if self.runner.is_busy() {
            return Ok(None);
        }
        let (dir, extension) = {
            let config = read(&self.config);
            (config.handshake_dir.clone(), config.capture_extension.clone())
        };
        let store = self.store();
        store.refresh();
        let pending = pending_captures(&dir, &extension, &store)?;
        info!("{} unprocessed captures in {}", pending.len(), dir.display());

        for capture in pending {
            match self.submit_capture(&capture, None) {
                Ok(Some(disposition)) => return Ok(Some((capture, disposition))),
                Ok(None) => continue,
                Err(err) => {
                    warn!("Cannot probe {}: {}", capture.display(), err);
                    continue;
                }
            }
        }
        Ok(None)
    }

    pub fn status(&self) -> GatewayStatus {
        let config = read(&self.config);
        let candidates = read(&self.candidates);
        let running = match self.runner.state() {
            RunState::Running(id) => Some(id),
            RunState::Idle => None,
        };
        GatewayStatus {
            running,
            candidates: candidates.len(),
            batches: BatchPlan::new(&candidates, config.wordlists_per_batch).len(),
            processed: self.store().len(),
            wordlist_folder: config.wordlist_folder.clone(),
            handshake_dir: config.handshake_dir.clone(),
        }
    }
}

fn enumerate(config: &SchedulerConfig) -> Vec<Candidate> {
    match queue::build(
        &config.wordlist_folder,
        &config.priority_wordlists,
        &config.wordlist_extension,
    ) {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!("Cannot enumerate wordlists: {}", err);
            Vec::new()
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BatchOutcome, HandshakeInfo};
    use crate::report::tail_records;
    use crate::runner::tests::{ScriptedBackend, SequenceSampler};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String)>>);

    impl CrackedNotifier for Recorder {
        fn on_cracked(&self, target_id: &str, password: &str) {
            self.0
                .lock()
                .unwrap()
                .push((target_id.to_string(), password.to_string()));
        }
    }

    /// Reports a handshake only for captures whose name contains "good".
    struct NameProbe;

    impl HandshakeProbe for NameProbe {
        fn probe(&self, capture: &Path) -> Result<Option<HandshakeInfo>> {
            let name = work_unit_id(capture);
            Ok(name.contains("good").then(|| HandshakeInfo {
                bssid: "AA:BB:CC:DD:EE:FF".into(),
                ssid: Some("Lab".into()),
                station_mac: None,
            }))
        }
    }

    struct Fixture {
        dir: TempDir,
        config: SchedulerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let words = dir.path().join("words");
            let caps = dir.path().join("caps");
            fs::create_dir_all(&words).unwrap();
            fs::create_dir_all(&caps).unwrap();
            fs::write(words.join("rockyou-75.txt"), "a\nb\n").unwrap();
            fs::write(words.join("big.txt"), "c\nd\ne\nf\n").unwrap();

            let config = SchedulerConfig {
                wordlist_folder: words,
                wordlists_per_batch: 1,
                batch_delay_secs: 0,
                priority_wordlists: vec!["rockyou-75.txt".into()],
                security_log: dir.path().join("audit.log"),
                processed_log: dir.path().join("processed.log"),
                potfile_path: Some(dir.path().join("quickdic.potfile")),
                handshake_dir: caps,
                ..SchedulerConfig::default()
            };
            Self { dir, config }
        }

        fn gateway(&self, backend: Arc<ScriptedBackend>) -> EventGateway {
            EventGateway::new(
                self.config.clone(),
                backend,
                Arc::new(NameProbe),
                Arc::new(SequenceSampler::new(vec![0.0])),
            )
        }
    }

    #[test]
    fn hit_is_audited_written_and_notified_once() {
        let fx = Fixture::new();
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(BatchOutcome::NotFound),
            Ok(BatchOutcome::Found("hunter2".into())),
        ]));
        let recorder = Arc::new(Recorder::default());
        let gateway = fx.gateway(backend.clone()).with_notifier(recorder.clone());

        let meta = CaptureMetadata::for_path(fx.dir.path().join("caps/x.pcap"));
        let disposition = gateway.on_capture_ready("x.pcap", "AA:BB:CC:DD:EE:FF", &meta);

        let CaptureDisposition::Completed(attempt) = disposition else {
            panic!("expected a completed run");
        };
        assert_eq!(attempt.outcome, CrackOutcome::Found("hunter2".into()));
        assert_eq!(backend.calls(), 2);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![("AA:BB:CC:DD:EE:FF".to_string(), "hunter2".to_string())]
        );

        let records = tail_records(&fx.config.security_log, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, 0);

        let pot = fs::read_to_string(fx.config.potfile_path.as_ref().unwrap()).unwrap();
        assert!(pot.starts_with("aabbccddeeff::"));
        assert!(pot.contains(":hunter2:"));
    }

    #[test]
    fn second_event_for_same_unit_is_a_no_op() {
        let fx = Fixture::new();
        let backend = Arc::new(ScriptedBackend::default());
        let gateway = fx.gateway(backend.clone());
        let meta = CaptureMetadata::for_path(fx.dir.path().join("caps/x.pcap"));

        gateway.on_capture_ready("x.pcap", "t", &meta);
        let calls = backend.calls();
        assert_eq!(
            gateway.on_capture_ready("x.pcap", "t", &meta),
            CaptureDisposition::AlreadyProcessed
        );
        assert_eq!(backend.calls(), calls);
        assert_eq!(tail_records(&fx.config.security_log, 10).unwrap().len(), 1);
    }

    #[test]
    fn process_next_skips_captures_without_handshake() {
        let fx = Fixture::new();
        let caps = &fx.config.handshake_dir;
        fs::write(caps.join("empty.pcap"), b"x").unwrap();
        fs::write(caps.join("good.pcap"), b"x").unwrap();
        fs::write(caps.join("notes.txt"), b"x").unwrap();

        let backend = Arc::new(ScriptedBackend::default());
        let gateway = fx.gateway(backend.clone());

        let (capture, disposition) = gateway.process_next().unwrap().unwrap();
        assert_eq!(work_unit_id(&capture), "good.pcap");
        assert!(matches!(disposition, CaptureDisposition::Completed(_)));
        assert!(!gateway.store().is_processed("empty.pcap"));
        assert!(gateway.store().is_processed("good.pcap"));

        assert!(gateway.process_next().unwrap().is_none());
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn pending_captures_are_oldest_first() {
        let fx = Fixture::new();
        let caps = &fx.config.handshake_dir;
        let old = caps.join("old.pcap");
        let new = caps.join("new.pcap");
        fs::write(&old, b"x").unwrap();
        fs::write(&new, b"x").unwrap();
        let earlier = SystemTime::now() - std::time::Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(earlier)
            .unwrap();

        let store = WorkUnitStore::open(&fx.config.processed_log);
        assert_eq!(pending_captures(caps, "pcap", &store).unwrap(), vec![old.clone(), new.clone()]);
        store.mark_processed("old.pcap");
        assert_eq!(pending_captures(caps, "pcap", &store).unwrap(), vec![new]);
    }

    #[test]
    fn each_run_sees_the_current_wordlist_folder() {
        let fx = Fixture::new();
        let backend = Arc::new(ScriptedBackend::default());
        let gateway = fx.gateway(backend.clone());
        assert_eq!(gateway.status().candidates, 2);

        let words = &fx.config.wordlist_folder;
        fs::remove_file(words.join("big.txt")).unwrap();
        fs::write(words.join("fresh.txt"), "z\n").unwrap();

        let meta = CaptureMetadata::for_path(fx.dir.path().join("caps/x.pcap"));
        gateway.on_capture_ready("x.pcap", "t", &meta);

        let batches = backend.batches.lock().unwrap().clone();
        assert_eq!(
            batches,
            vec![vec![words.join("rockyou-75.txt")], vec![words.join("fresh.txt")]]
        );
        assert_eq!(gateway.status().candidates, 2);
        assert_eq!(gateway.plan().names()[1], vec!["fresh.txt"]);
    }

    #[test]
    fn gateways_sharing_a_config_never_repeat_a_unit() {
        let fx = Fixture::new();
        let daemon_backend = Arc::new(ScriptedBackend::default());
        let daemon = fx.gateway(daemon_backend.clone());
        let cli = fx.gateway(Arc::new(ScriptedBackend::default()));
        let meta = CaptureMetadata::for_path(fx.dir.path().join("caps/x.pcap"));

        assert!(matches!(
            cli.on_capture_ready("x.pcap", "t", &meta),
            CaptureDisposition::Completed(_)
        ));
        assert_eq!(
            daemon.on_capture_ready("x.pcap", "t", &meta),
            CaptureDisposition::AlreadyProcessed
        );
        assert_eq!(daemon_backend.calls(), 0);
        assert_eq!(fs::read_to_string(&fx.config.processed_log).unwrap(), "x.pcap\n");
        assert_eq!(tail_records(&fx.config.security_log, 10).unwrap().len(), 1);
    }

    #[test]
    fn run_lock_held_by_another_process_reports_busy() {
        let fx = Fixture::new();
        let backend = Arc::new(ScriptedBackend::default());
        let gateway = fx.gateway(backend.clone());
        let meta = CaptureMetadata::for_path(fx.dir.path().join("caps/x.pcap"));

        let held = RunLock::try_acquire(&fx.config.run_lock_path(), "other.pcap")
            .unwrap()
            .unwrap();
        assert_eq!(gateway.on_capture_ready("x.pcap", "t", &meta), CaptureDisposition::Busy);
        assert_eq!(backend.calls(), 0);
        assert!(!gateway.store().is_processed("x.pcap"));
        assert!(!gateway.is_busy());

        drop(held);
        assert!(matches!(
            gateway.on_capture_ready("x.pcap", "t", &meta),
            CaptureDisposition::Completed(_)
        ));
    }

    #[test]
    fn process_next_skips_units_marked_by_another_process() {
        let fx = Fixture::new();
        let caps = &fx.config.handshake_dir;
        fs::write(caps.join("good-1.pcap"), b"x").unwrap();

        let backend = Arc::new(ScriptedBackend::default());
        let gateway = fx.gateway(backend.clone());
        WorkUnitStore::open(&fx.config.processed_log).mark_processed("good-1.pcap");

        assert!(gateway.process_next().unwrap().is_none());
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn apply_config_re_enumerates_wordlists() {
        let fx = Fixture::new();
        let gateway = fx.gateway(Arc::new(ScriptedBackend::default()));
        assert_eq!(gateway.status().candidates, 2);

        fs::write(fx.config.wordlist_folder.join("extra.txt"), "z\n").unwrap();
        let mut config = fx.config.clone();
        config.wordlists_per_batch = 2;
        config.processed_log = fx.dir.path().join("other.log");
        gateway.apply_config(config);

        let status = gateway.status();
        assert_eq!(status.candidates, 3);
        assert_eq!(status.batches, 2);
        assert_eq!(gateway.store().path(), fx.dir.path().join("other.log"));
        assert_eq!(gateway.plan().names()[0], vec!["rockyou-75.txt", "extra.txt"]);
    }
}
