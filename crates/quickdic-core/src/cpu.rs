//! CPU utilisation sampling for the batch throttle.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::CpuSource;
use crate::error::{Result, SchedulerError};

const PROC_STAT: &str = "/proc/stat";
const PROC_LOADAVG: &str = "/proc/loadavg";

/// Source of the current CPU utilisation, in percent.
pub trait CpuSampler: Send + Sync {
    fn sample(&self) -> Result<f32>;
}

/// Sample, treating any failure as an idle machine.
pub fn sample_or_idle(sampler: &dyn CpuSampler) -> f32 {
    match sampler.sample() {
        Ok(pct) => pct,
        Err(err) => {
            warn!("Error getting CPU usage: {}", err);
            0.0
        }
    }
}

pub fn sampler_for(source: CpuSource) -> Arc<dyn CpuSampler> {
    match source {
        CpuSource::Stat => Arc::new(ProcStatSampler::default()),
        CpuSource::Loadavg => Arc::new(LoadAvgSampler),
    }
}

/// Busy share of all CPUs between two `/proc/stat` reads.
#[derive(Debug, Clone)]
pub struct ProcStatSampler {
    pub window: Duration,
}

impl Default for ProcStatSampler {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(250),
        }
    }
}

impl CpuSampler for ProcStatSampler {
    fn sample(&self) -> Result<f32> {
        let first = read_cpu_times()?;
        std::thread::sleep(self.window);
        let second = read_cpu_times()?;
        Ok(busy_percent(first, second))
    }
}

/// One-minute load average over the number of CPUs, capped at 100%.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadAvgSampler;

impl CpuSampler for LoadAvgSampler {
    fn sample(&self) -> Result<f32> {
        let raw =
            fs::read_to_string(PROC_LOADAVG).map_err(|e| SchedulerError::io("read", PROC_LOADAVG, e))?;
        let load1 = parse_loadavg(&raw)
            .ok_or_else(|| SchedulerError::Backend(format!("unparseable loadavg: {raw:?}")))?;
        let cpus = num_cpus::get().max(1) as f32;
        Ok((load1 / cpus * 100.0).min(100.0))
    }
}

/// (idle, total) jiffies from the aggregate `cpu` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CpuTimes {
    idle: u64,
    total: u64,
}

fn read_cpu_times() -> Result<CpuTimes> {
    let raw = fs::read_to_string(PROC_STAT).map_err(|e| SchedulerError::io("read", PROC_STAT, e))?;
    parse_cpu_line(&raw).ok_or_else(|| SchedulerError::Backend("no cpu line in /proc/stat".into()))
}

pub(crate) fn parse_cpu_line(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    // guest time is already folded into user/nice
    let total = fields.iter().take(8).sum();
    Some(CpuTimes { idle, total })
}

pub(crate) fn busy_percent(first: CpuTimes, second: CpuTimes) -> f32 {
    let total = second.total.saturating_sub(first.total);
    if total == 0 {
        return 0.0;
    }
    let idle = second.idle.saturating_sub(first.idle);
    (total.saturating_sub(idle) as f32 / total as f32 * 100.0).clamp(0.0, 100.0)
}

fn parse_loadavg(raw: &str) -> Option<f32> {
    raw.split_whitespace().next()?.parse::<f32>().ok()
}
