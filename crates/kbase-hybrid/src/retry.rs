//! Bounded retry with doubling backoff for candidate-source calls.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use kbase_core::error::SourceError;

/// Run `op`, retrying up to `attempts` additional times when it fails with
/// a retryable error. Backoff starts at `backoff_ms` and doubles per
/// attempt. Non-retryable errors are returned immediately.
pub async fn with_retry<T, F, Fut>(attempts: u32, backoff_ms: u64, op: F) -> Result<T, SourceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut backoff = Duration::from_millis(backoff_ms);
    let mut remaining = attempts;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && remaining > 0 => {
                debug!(error = %e, remaining, "retrying candidate source call");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                remaining -= 1;
            }
            Err(e) => return Err(e),
        }
    }
}
