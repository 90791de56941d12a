//! Retry policies.
//!
//! - Transport retries: exponential backoff with full jitter, honoring
//!   Retry-After on 429, for network errors and 5xx.
//! - Optimistic-lock retries: linear backoff between read-modify-write
//!   attempts that lost an `updateTime` race.

use std::time::Duration;

use tracing::{info_span, warn, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_retry;

/// Attempts for a read-modify-write cycle before giving up.
pub const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Linear backoff step between read-modify-write attempts (milliseconds).
pub const WRITE_RETRY_BASE_DELAY_MS: u64 = 50;

// =============================================================================
// Configuration
// =============================================================================

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: std::env::var("FIRESTORE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            base_delay_ms: std::env::var("FIRESTORE_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.base_delay_ms),
            max_delay_ms: std::env::var("FIRESTORE_RETRY_MAX_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_delay_ms),
        }
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Execute an async operation with retry.
///
/// Retries network errors, 429 and 5xx. Everything else, including failed
/// preconditions, is returned to the caller immediately.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = FirestoreResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        let span = info_span!("firestore_retry", operation = %operation, attempt = attempt + 1);

        match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = calculate_delay(config, attempt, e.retry_after_ms());

                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Firestore operation failed, retrying: {}",
                    e
                );

                record_retry(operation);

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| FirestoreError::request_failed("Unknown error")))
}

/// Calculate retry delay with exponential backoff and full jitter.
fn calculate_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    if let Some(after) = retry_after_ms {
        return Duration::from_millis(after);
    }

    let exp_delay = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped_delay = exp_delay.min(config.max_delay_ms);

    // Time-based jitter keeps the rand crate out of the tree
    let jittered = if capped_delay > 0 {
        use std::time::SystemTime;
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let random_factor = (nanos % 1000) as f64 / 1000.0;
        ((capped_delay as f64) * random_factor) as u64
    } else {
        0
    };

    Duration::from_millis(jittered.max(config.base_delay_ms).min(config.max_delay_ms))
}

/// Delay after the `attempt`-th (0-based) lost optimistic-lock race.
pub fn write_conflict_delay(attempt: u32) -> Duration {
    Duration::from_millis(WRITE_RETRY_BASE_DELAY_MS * (attempt as u64 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 100);
        assert_eq!(config.max_delay_ms, 5000);
    }

    #[test]
    fn test_calculate_delay_with_retry_after() {
        let config = RetryConfig::default();
        let delay = calculate_delay(&config, 0, Some(2000));
        assert_eq!(delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_calculate_delay_respects_bounds() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 2000,
        };
        let delay = calculate_delay(&config, 40, None);
        assert!(delay.as_millis() <= 2000);
        assert!(delay.as_millis() >= 1000);
    }

    #[test]
    fn test_write_conflict_delay_is_linear() {
        assert_eq!(write_conflict_delay(0), Duration::from_millis(50));
        assert_eq!(write_conflict_delay(4), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_server_error() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_config(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FirestoreError::from_http_status(503, "unavailable"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_precondition() {
        let calls = AtomicU32::new(0);
        let result: FirestoreResult<()> = with_retry(&fast_config(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FirestoreError::PreconditionFailed("stale".into()))
        })
        .await;

        assert!(result.unwrap_err().is_precondition_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
