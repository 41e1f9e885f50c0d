//! Fixed-interval polling with deadline and cancellation
//!
//! Used by the health verifier and by anything else that waits for an
//! external system to converge. There is no backoff and no jitter: the
//! check runs every `interval` until it passes, the deadline elapses, or the
//! caller cancels.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::error::{KubeError, Result};

/// Default poll cadence
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Interval and deadline for a poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// 5-second cadence with the given deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, timeout)
    }
}

/// Fires a [`CancelToken`]
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by long-running operations to stop early
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A linked handle and token
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that is never cancelled
    pub fn never() -> CancelToken {
        Self::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Error out if cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(KubeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancelled; never resolves if the handle is dropped first
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

/// Run `check` every `config.interval` until it returns `Ok(true)`
///
/// A check error counts as "not ready yet"; the last one is reported if the
/// deadline elapses.
pub async fn poll_until<F, Fut>(
    what: &str,
    config: PollConfig,
    cancel: &CancelToken,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let mut cancel = cancel.clone();
    let mut last_error: Option<String> = None;

    loop {
        cancel.check()?;

        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                tracing::debug!("poll check for {} failed: {}", what, e);
                last_error = Some(e.to_string());
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            let what = match last_error {
                Some(err) => format!("{} (last error: {})", what, err),
                None => what.to_string(),
            };
            return Err(KubeError::Timeout { what, elapsed });
        }

        let wait = config.interval.min(config.timeout - elapsed);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => return Err(KubeError::Cancelled),
        }
    }
}
