//! The external cracking tool, behind narrow traits so the scheduler can be
//! driven by a scripted fake in tests.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};

/// What one backend invocation reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Found(String),
    NotFound,
}

/// Attempts to recover the key of one capture with a batch of wordlists.
pub trait CrackingBackend: Send + Sync {
    fn run_batch(&self, capture: &Path, target: &str, wordlists: &[PathBuf]) -> Result<BatchOutcome>;
}

/// Network details read from a capture that holds a usable handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeInfo {
    pub bssid: String,
    pub ssid: Option<String>,
    pub station_mac: Option<String>,
}

/// Checks whether a capture holds a crackable handshake.
pub trait HandshakeProbe: Send + Sync {
    /// `Ok(None)` means the capture has no usable handshake.
    fn probe(&self, capture: &Path) -> Result<Option<HandshakeInfo>>;
}

fn not_found_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)key\s+not\s+found").expect("static regex"))
}

fn found_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)found!?:?\s*\[(.*)\]").expect("static regex"))
}

fn network_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*\d+\s+(?P<bssid>[0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})\s+(?P<essid>.*?)\s*(?:WPA\d?|WEP|OPN|None|Unknown)?\s*\((?P<count>\d+) handshakes?",
        )
        .expect("static regex")
    })
}

fn station_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Station MAC:\s*([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})").expect("static regex")
    })
}

/// Classify tool output. Anything without a bracketed key is "not found".
pub fn parse_crack_output(output: &str) -> BatchOutcome {
    if not_found_re().is_match(output) {
        return BatchOutcome::NotFound;
    }
    match found_re().captures(output) {
        Some(caps) => {
            let key = caps[1].trim();
            if key.is_empty() {
                warn!("Found marker with empty key: {:?}", output.trim());
                BatchOutcome::NotFound
            } else {
                BatchOutcome::Found(key.to_string())
            }
        }
        None => {
            if !output.trim().is_empty() {
                debug!("Unrecognised backend output treated as not found: {:?}", output.trim());
            }
            BatchOutcome::NotFound
        }
    }
}

/// Parse the network listing aircrack-ng prints for a capture.
pub fn parse_network_listing(output: &str) -> Option<HandshakeInfo> {
    let station_mac = station_re()
        .captures(output)
        .map(|caps| caps[1].to_ascii_uppercase());

    output.lines().find_map(|line| {
        let caps = network_re().captures(line)?;
        let count: u32 = caps["count"].parse().ok()?;
        if count == 0 {
            return None;
        }
        let essid = caps["essid"].trim();
        Some(HandshakeInfo {
            bssid: caps["bssid"].to_ascii_uppercase(),
            ssid: (!essid.is_empty()).then(|| essid.to_string()),
            station_mac: station_mac.clone(),
        })
    })
}

/// Advisory install check; never blocks a run.
pub fn check_tool(path: &Path) -> bool {
    let present = path.is_file() && is_executable(path);
    if present {
        info!("Found {}", path.display());
    } else {
        warn!("{} is not installed or not executable", path.display());
    }
    present
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

/// Shells out to `aircrack-ng`.
#[derive(Debug, Clone)]
pub struct AircrackBackend {
    binary: PathBuf,
}

impl AircrackBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl CrackingBackend for AircrackBackend {
    fn run_batch(&self, capture: &Path, target: &str, wordlists: &[PathBuf]) -> Result<BatchOutcome> {
        let list = wordlists
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join(",");
        let mut key_file = OsString::from(capture.as_os_str());
        key_file.push(".cracked");

        let output = Command::new(&self.binary)
            .arg("-w")
            .arg(&list)
            .arg("-l")
            .arg(&key_file)
            .arg("-q")
            .arg("-b")
            .arg(target)
            .arg(capture)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SchedulerError::Backend(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outcome = parse_crack_output(&stdout);
        if matches!(outcome, BatchOutcome::Found(_)) {
            return Ok(outcome);
        }
        if !output.status.success() {
            return Err(SchedulerError::Backend(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(outcome)
    }
}

impl HandshakeProbe for AircrackBackend {
    fn probe(&self, capture: &Path) -> Result<Option<HandshakeInfo>> {
        let output = Command::new(&self.binary)
            .arg(capture)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SchedulerError::Backend(format!("failed to run {}: {}", self.binary.display(), e))
            })?;
        Ok(parse_network_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tool_output() {
        assert_eq!(parse_crack_output("KEY NOT FOUND\n"), BatchOutcome::NotFound);
        assert_eq!(
            parse_crack_output("KEY FOUND! [ hunter2 ]\n"),
            BatchOutcome::Found("hunter2".into())
        );
        assert_eq!(
            parse_crack_output("found: [hunter2]"),
            BatchOutcome::Found("hunter2".into())
        );
        assert_eq!(parse_crack_output("KEY FOUND! [ ]"), BatchOutcome::NotFound);
        assert_eq!(parse_crack_output(""), BatchOutcome::NotFound);
        assert_eq!(parse_crack_output("Segmentation fault"), BatchOutcome::NotFound);
    }

    #[test]
    fn not_found_marker_ignores_case() {
        assert_eq!(parse_crack_output("key not found [x]"), BatchOutcome::NotFound);
        assert_eq!(parse_crack_output("Key Not  Found\n"), BatchOutcome::NotFound);
    }

    #[test]
    fn key_with_brackets_keeps_inner_text() {
        assert_eq!(
            parse_crack_output("KEY FOUND! [ pa[ss]word ]"),
            BatchOutcome::Found("pa[ss]word".into())
        );
    }

    #[test]
    fn listing_yields_bssid_and_essid() {
        let listing = "\
Opening capture.pcap
Read 1234 packets.

   #  BSSID              ESSID                     Encryption

   1  aa:bb:cc:dd:ee:ff  Home Net                  WPA (1 handshake)
   2  11:22:33:44:55:66  Other                     WPA (0 handshake)
";
        let info = parse_network_listing(listing).unwrap();
        assert_eq!(info.bssid, "AA:BB:CC:DD:EE:FF");
        assert_eq!(info.ssid.as_deref(), Some("Home Net"));
        assert_eq!(info.station_mac, None);
    }

    #[test]
    fn listing_without_handshake_is_none() {
        let listing = "   1  aa:bb:cc:dd:ee:ff  Cafe  WPA (0 handshake)\n";
        assert!(parse_network_listing(listing).is_none());
        assert!(parse_network_listing("No networks found, exiting.").is_none());
    }

    #[test]
    fn station_mac_is_picked_up() {
        let listing = "   1  aa:bb:cc:dd:ee:ff  Lab  WPA (2 handshakes)\nStation MAC: 01:02:03:04:05:06\n";
        let info = parse_network_listing(listing).unwrap();
        assert_eq!(info.station_mac.as_deref(), Some("01:02:03:04:05:06"));
    }

    #[test]
    fn missing_binary_is_a_backend_error() {
        let backend = AircrackBackend::new("/nonexistent/aircrack-ng");
        let err = backend
            .run_batch(Path::new("x.pcap"), "AA:BB:CC:DD:EE:FF", &[PathBuf::from("w.txt")])
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Backend(_)));
        assert!(!check_tool(backend.binary()));
    }
}
