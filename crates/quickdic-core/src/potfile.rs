//! Cracked-key potfile and its GPS sidecars.
//!
//! Line layout: `bssid:station:ssid:password:lat:lon:alt:epoch_secs`, MACs as
//! lowercase hex without separators, empty fields for anything unknown.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::{Result, SchedulerError};

pub const NO_CRACKED: &str = "No cracked passwords";

const GPS_SUFFIXES: [&str; 2] = [".gps.json", ".geo.json"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpsFix {
    pub lat: String,
    pub lon: String,
    pub alt: String,
}

impl GpsFix {
    pub fn is_empty(&self) -> bool {
        self.lat.is_empty() && self.lon.is_empty()
    }

    fn from_json(value: &Value) -> Option<Self> {
        let pick = |short: &str, long: &str| value.get(short).or_else(|| value.get(long));
        let (lat, lon, alt) = if value.get("lat").is_some() && value.get("lon").is_some() {
            (value.get("lat")?, value.get("lon")?, value.get("alt"))
        } else {
            (
                value.get("latitude")?,
                value.get("longitude")?,
                pick("altitude", "alt"),
            )
        };
        Some(Self {
            lat: json_scalar(lat),
            lon: json_scalar(lon),
            alt: alt.map(json_scalar).unwrap_or_default(),
        })
    }
}

fn json_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Read the GPS sidecar next to `capture`, if any.
pub fn gps_for_capture(capture: &Path) -> GpsFix {
    let stem = capture.with_extension("");
    for suffix in GPS_SUFFIXES {
        let mut name = stem.clone().into_os_string();
        name.push(suffix);
        let sidecar = PathBuf::from(name);
        if !sidecar.exists() {
            continue;
        }
        let parsed = fs::read_to_string(&sidecar)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .and_then(|value| GpsFix::from_json(&value));
        match parsed {
            Some(fix) => {
                info!(lat = %fix.lat, lon = %fix.lon, "Found GPS data in {}", sidecar.display());
                return fix;
            }
            None => debug!("Unusable GPS file {}", sidecar.display()),
        }
    }
    GpsFix::default()
}

/// Lowercase hex digits only, e.g. `AA:BB:..` becomes `aabb..`.
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotfileEntry {
    pub bssid: String,
    pub station_mac: String,
    pub ssid: String,
    pub password: String,
    pub gps: GpsFix,
    pub epoch_secs: u64,
}

impl PotfileEntry {
    pub fn new(
        bssid: &str,
        station_mac: Option<&str>,
        ssid: Option<&str>,
        password: &str,
        gps: GpsFix,
    ) -> Self {
        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            bssid: normalize_mac(bssid),
            station_mac: station_mac.map(normalize_mac).unwrap_or_default(),
            ssid: ssid.unwrap_or_default().to_string(),
            password: password.to_string(),
            gps,
            epoch_secs,
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.bssid,
            self.station_mac,
            encode_ssid(&self.ssid),
            self.password,
            self.gps.lat,
            self.gps.lon,
            self.gps.alt,
            self.epoch_secs
        )
    }

    /// Parse one potfile line. The SSID ends at the third colon (SSIDs that
    /// contain one are written as `$HEX[..]`); the key runs up to the GPS
    /// fields and may contain colons.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        let mut head = line.splitn(3, ':');
        let bssid = head.next()?.to_string();
        let station_mac = head.next()?.to_string();
        let rest = head.next()?;

        let mut tail = rest.rsplitn(5, ':');
        let epoch = tail.next()?;
        let alt = tail.next()?.to_string();
        let lon = tail.next()?.to_string();
        let lat = tail.next()?.to_string();
        let middle = tail.next()?;
        let (ssid, password) = middle.split_once(':')?;

        Some(Self {
            bssid,
            station_mac,
            ssid: decode_ssid(ssid),
            password: password.to_string(),
            gps: GpsFix { lat, lon, alt },
            epoch_secs: epoch.parse().unwrap_or(0),
        })
    }

    /// `"<ssid> - <password> (<lat>,<lon>)"`, bssid standing in for an
    /// unknown ssid.
    pub fn display(&self) -> String {
        let name = if self.ssid.is_empty() || self.ssid.eq_ignore_ascii_case("unknown") {
            &self.bssid
        } else {
            &self.ssid
        };
        if self.gps.is_empty() {
            format!("{} - {}", name, self.password)
        } else {
            format!("{} - {} ({},{})", name, self.password, self.gps.lat, self.gps.lon)
        }
    }
}

const HEX_PREFIX: &str = "$HEX[";

fn encode_ssid(ssid: &str) -> String {
    if ssid.contains(':') || ssid.starts_with(HEX_PREFIX) || ssid.chars().any(char::is_control) {
        format!("{HEX_PREFIX}{}]", hex::encode(ssid))
    } else {
        ssid.to_string()
    }
}

fn decode_ssid(field: &str) -> String {
    field
        .strip_prefix(HEX_PREFIX)
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|digits| hex::decode(digits).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|| field.to_string())
}

/// Append `entry` to the potfile at `path`.
pub fn append(path: &Path, entry: &PotfileEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| SchedulerError::io("create", parent, e))?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SchedulerError::io("open", path, e))?;
    writeln!(file, "{}", entry.to_line()).map_err(|e| SchedulerError::io("append to", path, e))?;
    Ok(())
}

/// Write a hit for `capture`, logging instead of failing.
pub fn record_hit(
    path: &Path,
    capture: &Path,
    bssid: &str,
    station_mac: Option<&str>,
    ssid: Option<&str>,
    password: &str,
) {
    let entry = PotfileEntry::new(bssid, station_mac, ssid, password, gps_for_capture(capture));
    match append(path, &entry) {
        Ok(()) => info!(bssid = %entry.bssid, ssid = %entry.ssid, "Added to potfile {}", path.display()),
        Err(err) => error!("Error writing to potfile: {}", err),
    }
}

/// Last entry of whichever potfile was modified most recently.
pub fn most_recent(potfiles: &[PathBuf]) -> Option<PotfileEntry> {
    let newest = potfiles
        .iter()
        .filter_map(|p| {
            let modified = fs::metadata(p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .max_by_key(|(modified, _)| *modified)?
        .1;

    let contents = match fs::read_to_string(newest) {
        Ok(contents) => contents,
        Err(err) => {
            debug!("Cannot read potfile {}: {}", newest.display(), err);
            return None;
        }
    };
    contents
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(PotfileEntry::parse)
}

pub fn last_cracked_display(potfiles: &[PathBuf]) -> String {
    most_recent(potfiles)
        .map(|entry| entry.display())
        .unwrap_or_else(|| NO_CRACKED.to_string())
}
