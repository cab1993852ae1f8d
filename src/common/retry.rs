use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with exponential backoff, carried as a plain value so the
/// caller decides what counts as transient.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or `max_attempts` attempts have failed.
    /// The last error is returned once attempts are exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> std::result::Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts.max(1) {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.multiplier);
                }
            }
        }
    }
}
