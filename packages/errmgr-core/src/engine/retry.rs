//! Retry of transient storage failures.

use std::future::Future;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::Result;

/// Retry policy applied by an execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Maximum retry attempts after the first failure
    pub max_retries: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
    /// Keep SQL text out of warnings
    pub hide_query_log: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RetryOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            hide_query_log: config.hide_query_log,
        }
    }
}

/// Retries an operation that may fail with transient storage errors.
///
/// Non-transient errors are returned immediately.
pub async fn retry_transient<F, Fut, T>(
    mut operation: F,
    options: RetryOptions,
    label: &str,
    query: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;
                if attempt > options.max_retries || !err.is_transient() {
                    return Err(err);
                }

                if options.hide_query_log {
                    tracing::warn!(
                        "Transient storage error in {} (attempt {}/{}): {}",
                        label,
                        attempt,
                        options.max_retries,
                        err
                    );
                } else {
                    tracing::warn!(
                        query = query,
                        "Transient storage error in {} (attempt {}/{}): {}",
                        label,
                        attempt,
                        options.max_retries,
                        err
                    );
                }

                if !options.retry_delay.is_zero() {
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrMgrError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options(max_retries: u32) -> RetryOptions {
        RetryOptions {
            max_retries,
            retry_delay: Duration::ZERO,
            hide_query_log: true,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ErrMgrError::TransientStorage("busy".to_string()))
                } else {
                    Ok(7)
                }
            },
            options(3),
            "test",
            "",
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ErrMgrError::TransientStorage("busy".to_string()))
            },
            options(2),
            "test",
            "",
        )
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ErrMgrError::Storage("no such table".to_string()))
            },
            options(5),
            "test",
            "",
        )
        .await;
        assert_eq!(
            result,
            Err(ErrMgrError::Storage("no such table".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
