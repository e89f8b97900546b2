//! Retry with exponential backoff for transient provider failures.
//!
//! Retries happen inside a single evaluator call, so the evaluator timeout
//! still bounds the total time spent.

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::human_duration;
use crate::providers::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    /// Total attempts, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_min_delay", with = "human_duration")]
    pub min_delay: Duration,

    #[serde(default = "default_max_delay", with = "human_duration")]
    pub max_delay: Duration,
}

fn default_max_attempts() -> usize {
    3
}

fn default_min_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetrySettings {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.min_delay > self.max_delay {
            return Err("retry.min_delay must not exceed retry.max_delay".to_string());
        }
        Ok(())
    }
}

/// Run `op`, retrying while it fails with a transient [`ProviderError`].
pub async fn retry_transient<T, F, Fut>(
    settings: &RetrySettings,
    evaluator: &str,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    op.retry(settings.backoff())
        .when(|e: &ProviderError| e.is_transient())
        .notify(|e: &ProviderError, after: Duration| {
            warn!(
                evaluator,
                error = %e,
                retry_in_ms = after.as_millis() as u64,
                "Transient provider failure, retrying"
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result = retry_transient(&fast(), "primary", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Http("connection reset".to_string()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result: Result<(), _> = retry_transient(&fast(), "primary", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Auth)
        })
        .await;

        assert_eq!(result, Err(ProviderError::Auth));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result: Result<(), _> = retry_transient(&fast(), "primary", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::RateLimited { retry_after: None })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_settings_from_yaml() {
        let settings: RetrySettings = serde_yaml::from_str("max_attempts: 5\nmin_delay: 50ms\n").unwrap();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.min_delay, Duration::from_millis(50));
        assert_eq!(settings.max_delay, Duration::from_secs(2));
        assert!(settings.validate().is_ok());
        assert!(RetrySettings { max_attempts: 0, ..fast() }.validate().is_err());
    }
}
