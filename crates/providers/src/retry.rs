//! Retry with exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use mando_domain::error::{Error, Result};

/// Run `op` up to `1 + max_retries` times, sleeping `100ms × 2^(n−1)`
/// before retry `n`.
///
/// Only transient errors (timeout, 5xx, connection reset) retry;
/// permanent errors surface immediately.
pub async fn with_backoff<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err: Option<Error> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
            tokio::time::sleep(backoff).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                tracing::debug!(attempt, error = %e, "transient provider failure, retrying");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Other("retry loop exhausted".into())))
}
