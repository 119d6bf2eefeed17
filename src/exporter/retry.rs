//! Exponential backoff with jitter for the wire layer.
//!
//! Same shape as `opentelemetry-otlp`'s tonic retry policy (policy struct,
//! jittered exponential delay, retry-until-elapsed loop), generalized to
//! return the last error once the elapsed-time budget is exhausted rather
//! than looping a fixed number of times, since the exporter here honors
//! `RetryMaxElapsedTime` rather than a retry count.

use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Retries `operation` with exponential backoff and jitter until it
/// succeeds or `policy.max_elapsed_time` has passed, whichever comes first.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    E: std::fmt::Debug,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut delay = policy.initial_interval;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if start.elapsed() >= policy.max_elapsed_time {
                    return Err(err);
                }
                tracing::warn!(?err, delay_ms = delay.as_millis() as u64, "retrying export after wire error");
                let jitter = Duration::from_millis(rand::rng().random_range(0..=delay.as_millis() as u64));
                tokio::time::sleep(jitter).await;
                delay = std::cmp::min(delay * 2, policy.max_interval);
            }
        }
    }
}
