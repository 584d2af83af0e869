//! Bounded retry for idempotent store operations.

use std::future::Future;
use std::time::Duration;

use onair_common::LiveError;
use onair_config::schema::RetryConfig;
use rand::Rng;
use tracing::warn;

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is used up. Only wrap idempotent operations.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T, LiveError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LiveError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut delay_ms = config.base_delay_ms;
    let mut attempt = 1;

    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < attempts => {
                let jitter = if delay_ms > 0 {
                    rand::thread_rng().gen_range(0..=delay_ms / 2)
                } else {
                    0
                };
                warn!(
                    operation = what,
                    attempt,
                    error = %e,
                    "Transient store failure, retrying in {}ms",
                    delay_ms + jitter
                );
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(config.max_delay_ms);
                attempt += 1;
            }
            other => return other,
        }
    }
}
