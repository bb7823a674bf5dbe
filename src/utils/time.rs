use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `base` plus up to `jitter` extra. Returns `false` when the
/// token was cancelled before the sleep finished.
pub async fn sleep_with_jitter(base: Duration, jitter: Duration, cancel: &CancellationToken) -> bool {
    let jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    let extra = rand::rng().random_range(0..=jitter_ms);
    sleep_or_cancel(base + Duration::from_millis(extra), cancel).await
}

pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// `base * 2^(attempt - 1)`, capped at `max`.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(max)
}
