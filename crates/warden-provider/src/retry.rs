//! Exponential backoff with jitter for throttled and transient failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::session::SessionError;

/// Backoff schedule for retryable session failures.
///
/// Defaults: base 1 s, factor 2, jitter ±10%, cap 30 s, 5 retries (six
/// total attempts). Only `Throttled` and `Transient` are retried; every
/// other kind surfaces immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub jitter: f64,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.1,
            cap: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// A near-zero schedule for tests.
    pub fn fast() -> Self {
        Self {
            base: Duration::from_millis(1),
            factor: 2.0,
            jitter: 0.0,
            cap: Duration::from_millis(5),
            max_retries: 5,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff delay before retry number `attempt` (zero-based), jittered.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = exp.min(self.cap.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            // fastrand::f64 is uniform over [0, 1).
            capped * (1.0 + self.jitter * (fastrand::f64() * 2.0 - 1.0))
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Run a session operation under the retry policy.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: &str,
    mut f: F,
) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    op,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying provider call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
