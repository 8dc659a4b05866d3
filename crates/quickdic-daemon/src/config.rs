use std::env;
use std::path::PathBuf;
use std::time::Duration;

use quickdic_core::config::{DEFAULT_ROOT_PATH, ROOT_ENV};

pub const DEFAULT_SWEEP_SECS: u64 = 300;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 25;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub root_path: PathBuf,
    /// `None` disables the periodic sweep of pending captures.
    pub sweep_interval: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub watch_captures: bool,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let root_path = env::var(ROOT_ENV)
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_PATH));
        let sweep_secs = env::var("QUICKDICD_SWEEP_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SWEEP_SECS);
        let shutdown_secs = env::var("QUICKDICD_SHUTDOWN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);
        let watch_captures = env_bool("QUICKDICD_WATCH_CAPTURES", true);

        Self {
            root_path,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            watch_captures,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn remember(&mut self, key: &str) {
            if !self.vars.iter().any(|(k, _)| k == key) {
                self.vars.push((key.to_string(), env::var(key).ok()));
            }
        }

        fn set(&mut self, key: &str, value: &str) {
            self.remember(key);
            env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            self.remember(key);
            env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..) {
                match value {
                    Some(val) => env::set_var(&key, val),
                    None => env::remove_var(&key),
                }
            }
        }
    }

    #[test]
    fn defaults_without_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut guard = EnvGuard::new();
        for key in [
            ROOT_ENV,
            "QUICKDICD_SWEEP_SECS",
            "QUICKDICD_SHUTDOWN_TIMEOUT_SECS",
            "QUICKDICD_WATCH_CAPTURES",
        ] {
            guard.remove(key);
        }

        let cfg = DaemonConfig::from_env();
        assert_eq!(cfg.root_path, PathBuf::from(DEFAULT_ROOT_PATH));
        assert_eq!(cfg.sweep_interval, Some(Duration::from_secs(300)));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(25));
        assert!(cfg.watch_captures);
    }

    #[test]
    fn zero_sweep_disables_it() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set(ROOT_ENV, "/srv/quickdic");
        guard.set("QUICKDICD_SWEEP_SECS", "0");
        guard.set("QUICKDICD_WATCH_CAPTURES", "no");

        let cfg = DaemonConfig::from_env();
        assert_eq!(cfg.root_path, PathBuf::from("/srv/quickdic"));
        assert_eq!(cfg.sweep_interval, None);
        assert!(!cfg.watch_captures);
    }

    #[test]
    fn unparsable_sweep_falls_back() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("QUICKDICD_SWEEP_SECS", "soon");

        assert_eq!(
            DaemonConfig::from_env().sweep_interval,
            Some(Duration::from_secs(DEFAULT_SWEEP_SECS))
        );
    }
}
