//! Retry utilities for provider-level resilience.
//!
//! Retries apply to request initiation only. An in-flight stream is never
//! retried in place: wire-level failures are sticky and surface through the
//! stream's own error channel, and recovery means issuing a new request.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::sleep;

use crate::llm::traits::LlmError;

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,
    /// Initial delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to prevent thundering herd
    pub jitter: bool,
}

impl RetryConfig {
    /// Defaults tuned for local servers, where 502/503 usually means a
    /// model is still loading.
    pub fn local_server_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Disable retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::local_server_default()
    }
}

/// Decision about whether to retry after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    FailImmediately,
}

/// Type alias for boxed futures in retry closures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Calculate delay for exponential backoff with optional jitter.
pub fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config.initial_delay.as_millis() as f64;
    let multiplier = config.backoff_multiplier.powi(attempt as i32);
    let delay = Duration::from_millis((base_delay * multiplier) as u64).min(config.max_delay);

    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

fn add_jitter(delay: Duration) -> Duration {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    now.hash(&mut hasher);
    let hash = hasher.finish();

    // ±25% around the base delay
    let jitter_factor = 0.75 + 0.5 * ((hash % 1000) as f64 / 1000.0);
    Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64)
}

/// Determine if an [`LlmError`] should trigger a retry.
pub fn should_retry_llm_error(error: &LlmError) -> RetryDecision {
    match error {
        LlmError::NetworkError { .. } => RetryDecision::Retry,
        LlmError::RateLimitError { .. } => RetryDecision::Retry,
        LlmError::ProviderError { message, .. } => {
            let msg = message.to_lowercase();
            if msg.contains("connection refused")
                || msg.contains("connection reset")
                || msg.contains("timeout")
                || msg.contains("service unavailable")
                || msg.contains("bad gateway")
                || msg.contains("502")
                || msg.contains("503")
            {
                RetryDecision::Retry
            } else {
                RetryDecision::FailImmediately
            }
        }
        // Everything else is either misconfiguration or a mid-stream
        // failure, neither of which a blind retry fixes.
        _ => RetryDecision::FailImmediately,
    }
}

/// Execute an operation with retry logic and exponential backoff.
pub async fn retry_with_backoff<F, T, E>(
    mut operation: F,
    config: &RetryConfig,
    should_retry: impl Fn(&E) -> RetryDecision,
) -> Result<T, E>
where
    F: FnMut() -> BoxFuture<'static, Result<T, E>>,
{
    match operation().await {
        Ok(result) => return Ok(result),
        Err(error) => {
            if config.max_attempts == 0 || should_retry(&error) == RetryDecision::FailImmediately {
                return Err(error);
            }
        }
    }

    let mut attempt = 1;
    loop {
        let delay = calculate_backoff_delay(attempt - 1, config);
        tracing::debug!(
            "retrying operation after {} ms (attempt {}/{})",
            delay.as_millis(),
            attempt,
            config.max_attempts
        );
        sleep(delay).await;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= config.max_attempts
                    || should_retry(&error) == RetryDecision::FailImmediately
                {
                    return Err(error);
                }
                attempt += 1;
            }
        }
    }
}

/// Convenience wrapper for retrying [`LlmError`] operations.
pub async fn retry_llm_operation<F, T>(operation: F, config: &RetryConfig) -> Result<T, LlmError>
where
    F: FnMut() -> BoxFuture<'static, Result<T, LlmError>>,
{
    retry_with_backoff(operation, config, should_retry_llm_error).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::StreamError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            jitter: false,
            max_attempts: 5,
        };
        assert_eq!(calculate_backoff_delay(0, &config), Duration::from_millis(100));
        assert_eq!(calculate_backoff_delay(1, &config), Duration::from_millis(200));
        assert_eq!(calculate_backoff_delay(2, &config), Duration::from_millis(250));
    }

    #[test]
    fn stream_errors_are_never_retried() {
        let error = LlmError::StreamError(StreamError::transport("reset mid-stream"));
        assert_eq!(
            should_retry_llm_error(&error),
            RetryDecision::FailImmediately
        );
    }

    #[test]
    fn network_errors_are_retried() {
        let error = LlmError::NetworkError {
            message: "connection refused".into(),
            source: None,
        };
        assert_eq!(should_retry_llm_error(&error), RetryDecision::Retry);
    }

    #[tokio::test]
    async fn retries_until_eventual_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            move || {
                let counter = counter_clone.clone();
                Box::pin(async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("temporary failure")
                    } else {
                        Ok(42)
                    }
                }) as BoxFuture<'static, Result<i32, &'static str>>
            },
            &fast_config(3),
            |_| RetryDecision::Retry,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            move || {
                let counter = counter_clone.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, &'static str>("persistent failure")
                }) as BoxFuture<'static, Result<i32, &'static str>>
            },
            &fast_config(2),
            |_| RetryDecision::Retry,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            move || {
                let counter = counter_clone.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, &'static str>("fatal")
                }) as BoxFuture<'static, Result<i32, &'static str>>
            },
            &fast_config(3),
            |_| RetryDecision::FailImmediately,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
