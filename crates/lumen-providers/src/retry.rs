// Retry-with-backoff for transient adapter network failures: retries up to
// a configured ceiling with exponential backoff, and never retries once any
// byte of the streamed response has been delivered downstream.
//
// Ceiling and base delay aren't pinned by any external contract; the
// defaults here are fixed and documented in DESIGN.md.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Retries `connect` (which must only perform the connection attempt,
    /// not stream consumption) until it succeeds or the attempt ceiling is
    /// reached. Callers must stop calling this once any response byte has
    /// reached the downstream consumer — this helper only governs the
    /// pre-streaming connect phase.
    pub async fn retry_connect<F, Fut, T, E>(&self, mut connect: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match connect().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.max_attempts => {
                    warn!(attempt, %err, "transient provider connect failure, retrying");
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_up_to_ceiling_then_returns_last_error() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let attempts = AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .retry_connect(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            })
            .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_without_exhausting_attempts() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result: Result<i32, &str> = policy
            .retry_connect(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
