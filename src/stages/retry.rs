//! Bounded retry with a fixed backoff

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::errors::DomainError;

/// How often and how patiently a transient failure is retried
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only errors for which [`DomainError::is_transient`] holds are retried.
    /// Exhausting the attempts turns the last error into a permanent one.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, DomainError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        "{} failed: {}; retrying in {:?}",
                        label,
                        err,
                        self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(DomainError::PermanentSynthesis(format!(
                        "{} gave up after {} attempts: {}",
                        label, attempts, err
                    )));
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

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = quick(3)
            .run("tts", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(DomainError::TransientSynthesis("busy".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_becomes_permanent() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = quick(3)
            .run("tts", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DomainError::TransientSynthesis("timeout".into())) }
            })
            .await;
        assert!(matches!(result, Err(DomainError::PermanentSynthesis(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = quick(5)
            .run("tts", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DomainError::PermanentSynthesis("bad voice".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
