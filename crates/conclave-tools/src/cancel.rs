//! Cancellation helpers
//!
//! Timeouts are expressed as a child [`CancellationToken`] that fires on
//! whichever comes first: the deadline or the parent being cancelled.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Child cancellation scope with an optional deadline.
///
/// The timer task is aborted when the scope is dropped, so no timer outlives
/// the work it guards, whichever path ends that work.
pub struct TimeoutScope {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl TimeoutScope {
    /// Derive a scope from `parent`; `None` means no deadline
    pub fn new(parent: &CancellationToken, timeout: Option<Duration>) -> Self {
        let token = parent.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = timeout.map(|duration| {
            let token = token.clone();
            let flag = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        flag.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });
        Self {
            token,
            timed_out,
            timer,
        }
    }

    /// Token to hand to the guarded work
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait until the scope fires
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Whether the deadline (rather than the parent) fired the scope
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Whether the scope has fired for any reason
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimeoutScope {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Fail fast when `cancel` has already fired
pub fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Sleep that returns [`Error::Cancelled`] if `cancel` fires first
pub async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    ensure_active(cancel)?;
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}
