use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use cryptodesk_models::config::RetryConfig;
use rand::Rng;
use tracing::warn;

/// Retry schedule composed around an external call site.
///
/// Attempts are bounded, delays grow exponentially up to `max_delay`, and a
/// caller-supplied predicate decides which errors are worth retrying.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay.as_millis() as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((clamped + jitter).max(0.0) as u64)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts. The closure receives the 0-based attempt number.
    pub async fn run<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        is_retryable: P,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let last = attempt + 1 >= max_attempts;
                    if last || !is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn delay_grows_and_clamps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter_factor: 0.3,
        };
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1).as_millis();
            assert!((140..=260).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn config_with_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let result: Result<i32, String> = fast_policy(3)
            .run("test", |_| true, |_| async { Ok(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn eventual_success_after_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<i32, String> = fast_policy(3)
            .run(
                "test",
                |_| true,
                |_| {
                    let c = counter.clone();
                    async move {
                        if c.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("not yet".to_string())
                        } else {
                            Ok(42)
                        }
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<i32, String> = fast_policy(5)
            .run(
                "test",
                |e: &String| e != "fatal",
                |_| {
                    let c = counter.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err("fatal".to_string())
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let result: Result<i32, String> = fast_policy(3)
            .run("test", |_| true, |attempt| async move {
                Err(format!("attempt {attempt}"))
            })
            .await;
        assert_eq!(result.unwrap_err(), "attempt 2");
    }
}
