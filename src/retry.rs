use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, counting from zero
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor.max(1.0));
        delay.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, the attempts run out, or `is_active` turns
/// false. The last error is returned on give-up.
pub async fn retry_with_policy<T, E, F, Fut, A>(
    policy: &RetryPolicy,
    is_active: A,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    A: Fn() -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts.max(1) || !is_active() {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    "Attempt {}/{} failed: {} (retrying in {:?})",
                    attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
