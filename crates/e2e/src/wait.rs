//! Bounded waits: poll a probe until it yields a value or the deadline passes

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// How long a wait may last and how often it probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Run `probe` until it returns `Some`, an error, or `policy.timeout` elapses.
///
/// The probe always runs at least once, and once more at the deadline, so a
/// zero timeout degrades to a single check. Probe errors are returned as-is.
/// On expiry the error is [`E2eError::Timeout`] with an empty `page`; callers
/// holding a browser attach the page text themselves.
pub async fn until<T, F, Fut>(policy: WaitPolicy, what: &str, mut probe: F) -> E2eResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<Option<T>>>,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut attempts = 0usize;

    loop {
        attempts += 1;
        if let Some(value) = probe().await? {
            debug!("{} ready after {} probe(s)", what, attempts);
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(E2eError::Timeout {
                what: what.to_string(),
                waited: now - start,
                page: String::new(),
            });
        }
        sleep(policy.poll_interval.min(deadline - now)).await;
    }
}
