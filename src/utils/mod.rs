pub mod retry;
pub mod time;

pub use retry::{RetryPolicy, retry_with_backoff};
pub use time::sleep_with_jitter;
