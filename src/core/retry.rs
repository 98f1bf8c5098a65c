//! Retry utilities for transient sink failures.

use crate::core::config::RetrySettings;
use crate::core::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff)
    pub multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
            ..Self::default()
        }
    }
}

/// Execute an operation with retry logic.
///
/// Only errors for which [`crate::core::IngestError::is_recoverable`] holds are retried.
pub async fn retry_with_config<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_recoverable() || attempt >= config.max_attempts {
                    return Err(error);
                }

                if attempt > 1 {
                    backoff = Duration::from_secs_f64(backoff.as_secs_f64() * config.multiplier);
                    if backoff > config.max_backoff {
                        backoff = config.max_backoff;
                    }
                }

                let actual_backoff = if config.jitter {
                    let jitter_ms = rand::random::<f64>() * backoff.as_millis() as f64 * 0.1;
                    backoff + Duration::from_millis(jitter_ms as u64)
                } else {
                    backoff
                };

                tracing::warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    error,
                    actual_backoff
                );

                sleep(actual_backoff).await;
            },
        }
    }
}
