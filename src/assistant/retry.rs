//! Exponential backoff for transient assistant-API failures.
//!
//! The caller decides which errors are worth another attempt. Reads retry on
//! [`ApiError::is_transient`]; writes only on [`ApiError::never_sent`], since a
//! write that reached the service may already have been applied.
//!
//! The delay between retries follows:
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use super::client::ApiError;
use rand::{Rng, rng};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Maximum number of retries after the first attempt.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for Backoff {
    /// 5 retries starting at one second.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

impl Backoff {
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// A policy that never retries.
    #[cfg(test)]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds, fails with an error `retry_if` rejects, or
    /// retries run out.
    pub async fn run<T, F, Fut, R>(&self, operation: &str, retry_if: R, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        R: Fn(&ApiError) -> bool,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !retry_if(&e) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_total = total_t0.elapsed().as_millis();

                    if attempt > self.max_retries {
                        error!(
                            operation,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total,
                            error = %e,
                            "Assistant API call exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "Assistant API call failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
