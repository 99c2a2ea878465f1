use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::PollingConfig;
use crate::error::{Error, Result};

/// Exponential backoff between checks, capped, with an overall deadline.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(polling: &PollingConfig, timeout: Duration) -> Self {
        Self {
            interval: polling.interval(),
            max_interval: polling.max_interval(),
            timeout,
        }
    }
}

/// Run `check` until it returns `true`.
///
/// Errors from `check` end the wait immediately. Running out of time or
/// cancellation is an [`Error::Operation`] named after `what`.
pub async fn poll_until<F, Fut>(
    what: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut delay = policy.interval;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if check().await? {
            trace!(what, attempts, "condition met");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::operation(
                what,
                format!("timed out after {:?} ({} checks)", policy.timeout, attempts),
            ));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::operation(what, "cancelled")),
            _ = tokio::time::sleep(delay.min(deadline - now)) => {}
        }
        delay = (delay * 2).min(policy.max_interval);
    }
}

/// Sleep for `period` unless cancelled first.
pub async fn settle(period: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::operation("settle", "cancelled")),
        _ = tokio::time::sleep(period) => Ok(()),
    }
}
