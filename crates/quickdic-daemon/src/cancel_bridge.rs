//! Bridge a tokio [`CancellationToken`] to the scheduler's blocking cancel flag.

use std::sync::atomic::Ordering;

use quickdic_core::cancel::{new_flag, CancelFlag};
use tokio_util::sync::CancellationToken;

/// Flag that is raised once `token` is cancelled. Must be called inside a
/// tokio runtime.
pub fn create_cancel_flag(token: &CancellationToken) -> CancelFlag {
    let flag = new_flag();
    let flag_for_task = flag.clone();
    let token = token.clone();

    tokio::spawn(async move {
        token.cancelled().await;
        flag_for_task.store(true, Ordering::Relaxed);
    });

    flag
}
