//! Retry utilities for calendar operations with exponential backoff.
//!
//! Only transient failures are retried:
//! - Timeouts and connection errors
//! - 5xx server errors
//! - Rate limiting
//!
//! Authentication failures, validation errors and "update unsupported"
//! responses are returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use novacal_core::RetrySettings;

use crate::error::CalendarError;

/// Default retry configuration
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_retries,
            settings.initial_delay_ms,
            settings.max_delay_ms,
        )
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Calculate the delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponential backoff: initial_delay * 2^attempt
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Should retry the request
    Retry,
    /// Should not retry - permanent failure
    NoRetry,
}

/// Decide whether a calendar error is worth another attempt
pub fn retry_decision(error: &CalendarError) -> RetryDecision {
    if error.is_transient() {
        RetryDecision::Retry
    } else {
        RetryDecision::NoRetry
    }
}

/// Run a calendar operation, retrying transient failures.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `label` - Operation name used in log lines
/// * `operation` - Closure producing a fresh future for every attempt
///
/// # Returns
/// The first success, the first non-retryable error, or the last error once
/// all attempts are used up.
///
/// # Example
/// ```ignore
/// let event = with_retry(&RetryConfig::default(), "read", || store.read("evt_123")).await?;
/// ```
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, CalendarError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CalendarError>>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded after {} retries", label, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if retry_decision(&e) == RetryDecision::NoRetry {
                    tracing::debug!("{}: non-retryable error: {}", label, e);
                    return Err(e);
                }

                if attempt >= config.max_retries {
                    tracing::error!(
                        "{}: all {} attempts exhausted, last error: {}",
                        label,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "{}: retryable error on attempt {} of {}: {} (waiting {:?})",
                    label,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use novacal_core::NetworkError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_retry_config_from_settings() {
        let settings = RetrySettings {
            max_retries: 5,
            initial_delay_ms: 20,
            max_delay_ms: 300,
        };
        let config = RetryConfig::from(&settings);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(20));
        assert_eq!(config.max_delay, Duration::from_millis(300));
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::new(3, 100, 5000);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new(10, 100, 1000);

        // With 100ms initial and max 1000ms, 2^4 * 100 = 1600 > 1000
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_decisions() {
        assert_eq!(
            retry_decision(&CalendarError::Network(NetworkError::Timeout)),
            RetryDecision::Retry
        );
        assert_eq!(retry_decision(&CalendarError::RateLimited(1)), RetryDecision::Retry);
        assert_eq!(retry_decision(&CalendarError::TokenExpired), RetryDecision::NoRetry);
        assert_eq!(
            retry_decision(&CalendarError::InvalidEventData("bad".into())),
            RetryDecision::NoRetry
        );
        assert_eq!(
            retry_decision(&CalendarError::UpdateUnsupported("recurring".into())),
            RetryDecision::NoRetry
        );
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(3, 0, 0);

        let result = with_retry(&config, "read", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CalendarError::Network(NetworkError::Timeout))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(2, 0, 0);

        let result: Result<(), _> = with_retry(&config, "create", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CalendarError::Network(NetworkError::ConnectionFailed("reset".into()))) }
        })
        .await;

        assert!(matches!(result, Err(CalendarError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(5, 0, 0);

        let result: Result<(), _> = with_retry(&config, "update", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CalendarError::TokenExpired) }
        })
        .await;

        assert!(matches!(result, Err(CalendarError::TokenExpired)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
