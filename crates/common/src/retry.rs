use std::time::Duration;

/// Exponential backoff schedule for operations the caller chooses to retry.
///
/// The delay doubles after each failed attempt and is capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Run `f` until it succeeds or the attempts are exhausted, sleeping
    /// between attempts. The last error is returned unchanged.
    pub fn run<F, T, E>(&self, operation_name: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match f() {
                Ok(result) => return Ok(result),
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "{} failed after {} attempts: {}",
                        operation_name,
                        attempts,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Retry a function with exponential backoff starting at `base_delay_ms`.
pub fn retry_with_backoff<F, T, E>(
    f: F,
    max_retries: u32,
    base_delay_ms: u64,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    RetryPolicy::new(max_retries, Duration::from_millis(base_delay_ms)).run(operation_name, f)
}
