use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::utils::time::{backoff_delay, sleep_with_jitter};

/// Retry budgets for calls to the scanning service.
///
/// Rate-limit responses and connectivity failures draw from separate
/// budgets; every other error is returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub rate_limit_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same rate-limit budget, no connectivity retries. Used for calls that
    /// are not safe to repeat after an unknown outcome.
    pub fn rate_limit_only(&self) -> Self {
        Self {
            max_retries: 0,
            ..self.clone()
        }
    }
}

pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut connectivity_attempts = 0u32;
    let mut rate_limit_attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let delay = match &err {
            Error::RateLimited { retry_after } if rate_limit_attempts < policy.rate_limit_retries => {
                rate_limit_attempts += 1;
                let backoff = backoff_delay(policy.base_delay, rate_limit_attempts, policy.max_delay);
                Some(retry_after.unwrap_or(backoff).min(policy.max_delay))
            }
            e if e.is_connectivity() && connectivity_attempts < policy.max_retries => {
                connectivity_attempts += 1;
                Some(backoff_delay(policy.base_delay, connectivity_attempts, policy.max_delay))
            }
            _ => None,
        };

        let Some(delay) = delay else {
            return Err(err);
        };

        warn!(
            operation = operation_name,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            connectivity_attempts,
            rate_limit_attempts,
            "Request failed, retrying"
        );

        if !sleep_with_jitter(delay, delay / 4, cancel).await {
            return Err(Error::Cancelled);
        }
    }
}
