//! Retry with exponential backoff, and the sleep seam used by back-off paths

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use crate::stream::{StreamError, http_config};

/// Exponential backoff: 2^attempt seconds (2s, 4s, 8s, ...)
pub const fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt))
}

/// Boxed future returned by [`Sleeper::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Suspends the calling task. Back-off paths go through this so tests can
/// substitute a clock that records instead of waiting.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// Real clock: `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Mock clock: records every requested suspension and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration requested so far, in call order.
    pub fn calls(&self) -> Vec<Duration> {
        self.slept.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Virtual time spent sleeping.
    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        Box::pin(std::future::ready(()))
    }
}

/// Retry an async network operation with exponential backoff.
///
/// Retries retryable [`StreamError`]s up to `max_retries` (from the global
/// [`HttpConfig`](crate::stream::HttpConfig)); returns the first success or
/// the final error.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    sleeper: &dyn Sleeper,
    mut attempt_fn: F,
) -> Result<T, StreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StreamError>>,
{
    let max_retries = http_config().max_retries;
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                log::debug!("{label}: attempt {attempt}/{max_retries} failed: {e}, retrying...");
                sleeper.sleep(backoff_duration(attempt)).await;
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_exponential() {
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(2), Duration::from_secs(4));
        assert_eq!(backoff_duration(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", &sleeper, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StreamError::Http {
                        status: Some(500),
                        message: "boom".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn gives_up_on_non_retryable() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff("test", &sleeper, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StreamError::Http {
                    status: Some(404),
                    message: "missing".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn recording_sleeper_totals() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(2)).await;
        sleeper.sleep(Duration::from_secs(3)).await;
        assert_eq!(sleeper.total(), Duration::from_secs(5));
    }
}
