use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use crate::backend::check_tool;
use crate::cli::{AuditArgs, Commands, LastCrackedArgs, RunArgs};
use crate::config::{read_config, SchedulerConfig};
use crate::gateway::{CaptureDisposition, EventGateway, LogNotifier};
use crate::potfile;
use crate::report::{tail_records, AuditRecord};
use crate::runner::CrackAttempt;

pub type HandlerResult = (String, Value);

pub fn dispatch_command(root: &Path, command: Commands) -> Result<HandlerResult> {
    let config = read_config(root);
    match command {
        Commands::Run(args) => handle_run(config, args),
        Commands::Next => handle_next(config),
        Commands::Plan => handle_plan(config),
        Commands::Status => handle_status(config),
        Commands::Audit(args) => handle_audit(&config, args),
        Commands::LastCracked(args) => handle_last_cracked(&config, args),
        Commands::Check => handle_check(&config),
    }
}

fn gateway(config: SchedulerConfig) -> EventGateway {
    EventGateway::from_config(config).with_notifier(Arc::new(LogNotifier))
}

fn handle_run(config: SchedulerConfig, args: RunArgs) -> Result<HandlerResult> {
    if !args.capture.is_file() {
        bail!("Capture file not found: {}", args.capture.display());
    }
    let gateway = gateway(config);
    let disposition = gateway
        .submit_capture(&args.capture, args.target.as_deref())
        .with_context(|| format!("probing {}", args.capture.display()))?;
    match disposition {
        Some(disposition) => Ok(describe(&args.capture, disposition)),
        None => bail!("No handshake found in {}", args.capture.display()),
    }
}

fn handle_next(config: SchedulerConfig) -> Result<HandlerResult> {
    let dir = config.handshake_dir.clone();
    let gateway = gateway(config);
    match gateway
        .process_next()
        .with_context(|| format!("scanning {}", dir.display()))?
    {
        Some((capture, disposition)) => Ok(describe(&capture, disposition)),
        None => Ok((
            "All handshake files have already been processed".to_string(),
            json!({ "handshake_dir": dir, "processed": gateway.store().len() }),
        )),
    }
}

fn handle_plan(config: SchedulerConfig) -> Result<HandlerResult> {
    let gateway = gateway(config);
    let plan = gateway.plan();
    let message = format!(
        "{} wordlists in {} batches",
        plan.candidate_count(),
        plan.len()
    );
    Ok((
        message,
        json!({
            "batches": plan.names(),
            "candidates": gateway.candidates(),
        }),
    ))
}

fn handle_status(config: SchedulerConfig) -> Result<HandlerResult> {
    let status = gateway(config).status();
    let message = match &status.running {
        Some(id) => format!("Running {}", id),
        None => "Idle".to_string(),
    };
    Ok((message, serde_json::to_value(&status)?))
}

fn handle_audit(config: &SchedulerConfig, args: AuditArgs) -> Result<HandlerResult> {
    if !config.security_log.exists() {
        return Ok(("No audit records yet".to_string(), json!([])));
    }
    let records: Vec<AuditRecord> = tail_records(&config.security_log, args.lines)
        .with_context(|| format!("reading {}", config.security_log.display()))?;
    Ok((
        format!("{} audit records", records.len()),
        serde_json::to_value(records)?,
    ))
}

fn handle_last_cracked(config: &SchedulerConfig, args: LastCrackedArgs) -> Result<HandlerResult> {
    let potfiles = if args.potfiles.is_empty() {
        default_potfiles(config)
    } else {
        args.potfiles
    };
    let entry = potfile::most_recent(&potfiles);
    let message = entry
        .as_ref()
        .map(|e| e.display())
        .unwrap_or_else(|| potfile::NO_CRACKED.to_string());
    let data = match entry {
        Some(e) => json!({
            "bssid": e.bssid,
            "station_mac": e.station_mac,
            "ssid": e.ssid,
            "password": e.password,
            "lat": e.gps.lat,
            "lon": e.gps.lon,
            "alt": e.gps.alt,
            "epoch_secs": e.epoch_secs,
        }),
        None => Value::Null,
    };
    Ok((message, data))
}

fn handle_check(config: &SchedulerConfig) -> Result<HandlerResult> {
    let tool_ok = check_tool(&config.aircrack_path);
    let wordlists_ok = config.wordlist_folder.is_dir();
    let handshakes_ok = config.handshake_dir.is_dir();
    let message = if tool_ok && wordlists_ok {
        "Ready".to_string()
    } else {
        "Not ready".to_string()
    };
    Ok((
        message,
        json!({
            "aircrack": { "path": config.aircrack_path, "ok": tool_ok },
            "wordlist_folder": { "path": config.wordlist_folder, "ok": wordlists_ok },
            "handshake_dir": { "path": config.handshake_dir, "ok": handshakes_ok },
        }),
    ))
}

fn default_potfiles(config: &SchedulerConfig) -> Vec<PathBuf> {
    let mut potfiles: Vec<PathBuf> = config.potfile_path.iter().cloned().collect();
    if let Ok(entries) = fs::read_dir(&config.handshake_dir) {
        for path in entries.flatten().map(|e| e.path()) {
            if path.extension().and_then(|e| e.to_str()) == Some("potfile")
                && !potfiles.contains(&path)
            {
                potfiles.push(path);
            }
        }
    }
    potfiles
}

fn describe(capture: &Path, disposition: CaptureDisposition) -> HandlerResult {
    match disposition {
        CaptureDisposition::Completed(attempt) => {
            let message = match attempt.outcome.password() {
                Some(password) => format!("Cracked password: {}", password),
                None => format!("No password found for {}", attempt.target),
            };
            (message, attempt_json(capture, &attempt))
        }
        CaptureDisposition::AlreadyProcessed => (
            format!("{} was already processed", capture.display()),
            json!({ "capture": capture }),
        ),
        CaptureDisposition::Busy => (
            "Already processing a handshake".to_string(),
            json!({ "capture": capture }),
        ),
    }
}

fn attempt_json(capture: &Path, attempt: &CrackAttempt) -> Value {
    let record = AuditRecord::from_attempt(attempt);
    json!({
        "capture": capture,
        "target": attempt.target,
        "outcome": record.outcome,
        "password": attempt.outcome.password(),
        "elapsed_secs": record.elapsed_secs,
        "candidates_checked": record.candidates_checked,
        "entries_scanned": record.entries_scanned,
        "invocations": attempt.invocations,
        "score": record.score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::write_config_atomic;
    use tempfile::TempDir;

    fn seeded_root() -> (TempDir, SchedulerConfig) {
        let dir = TempDir::new().unwrap();
        let words = dir.path().join("words");
        fs::create_dir_all(&words).unwrap();
        fs::write(words.join("rockyou-75.txt"), "a\n").unwrap();
        fs::write(words.join("small.txt"), "b\nc\n").unwrap();
        let config = SchedulerConfig {
            wordlist_folder: words,
            wordlists_per_batch: 1,
            security_log: dir.path().join("audit.log"),
            processed_log: dir.path().join("processed.log"),
            potfile_path: Some(dir.path().join("quickdic.potfile")),
            handshake_dir: dir.path().join("caps"),
            ..SchedulerConfig::default()
        };
        write_config_atomic(dir.path(), &config).unwrap();
        (dir, config)
    }

    #[test]
    fn plan_lists_priority_batch_first() {
        let (dir, _) = seeded_root();
        let (message, data) = dispatch_command(dir.path(), Commands::Plan).unwrap();
        assert_eq!(message, "2 wordlists in 2 batches");
        assert_eq!(data["batches"][0][0], "rockyou-75.txt");
        assert_eq!(data["batches"][1][0], "small.txt");
    }

    #[test]
    fn audit_without_log_is_empty() {
        let (dir, _) = seeded_root();
        let (message, data) =
            dispatch_command(dir.path(), Commands::Audit(AuditArgs { lines: 5 })).unwrap();
        assert_eq!(message, "No audit records yet");
        assert_eq!(data, json!([]));
    }

    #[test]
    fn last_cracked_reads_configured_potfile() {
        let (dir, config) = seeded_root();
        let pot = config.potfile_path.clone().unwrap();
        fs::write(&pot, "aabbccddeeff::Cafe:hunter2:1.5:2.5::1700000000\n").unwrap();

        let (message, data) = dispatch_command(
            dir.path(),
            Commands::LastCracked(LastCrackedArgs { potfiles: vec![] }),
        )
        .unwrap();
        assert_eq!(message, "Cafe - hunter2 (1.5,2.5)");
        assert_eq!(data["password"], "hunter2");
    }

    #[test]
    fn run_rejects_missing_capture() {
        let (dir, _) = seeded_root();
        let err = dispatch_command(
            dir.path(),
            Commands::Run(RunArgs {
                capture: dir.path().join("nope.pcap"),
                target: None,
            }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Capture file not found"));
    }

    #[test]
    fn status_reports_counts() {
        let (dir, _) = seeded_root();
        let (message, data) = dispatch_command(dir.path(), Commands::Status).unwrap();
        assert_eq!(message, "Idle");
        assert_eq!(data["candidates"], 2);
        assert_eq!(data["processed"], 0);
    }
}
