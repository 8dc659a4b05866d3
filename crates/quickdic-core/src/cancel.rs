use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crate::error::{Result, SchedulerError};

pub type CancelFlag = Arc<AtomicBool>;

pub fn new_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

pub fn check_cancel(cancel: Option<&CancelFlag>) -> Result<()> {
    if let Some(flag) = cancel {
        if flag.load(Ordering::Relaxed) {
            return Err(SchedulerError::Cancelled);
        }
    }
    Ok(())
}

/// Sleep for `duration`, waking every 100ms to honour the cancel flag.
pub fn cancel_sleep(cancel: Option<&CancelFlag>, duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return check_cancel(cancel);
    }

    let start = Instant::now();
    let tick = Duration::from_millis(100);
    while start.elapsed() < duration {
        check_cancel(cancel)?;
        let remaining = duration.saturating_sub(start.elapsed());
        std::thread::sleep(tick.min(remaining));
    }
    check_cancel(cancel)
}
