//! Linear retry and backoff logic for daybook sync operations
//!
//! Drive uploads and downloads go through here so every network-bound
//! operation shares one retry policy: a fixed number of attempts with a
//! linearly growing pause between them, surfacing only the final failure.

use futures::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' exceeded maximum retry attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RetryError {
    fn into_source(self) -> Box<dyn std::error::Error + Send + Sync> {
        match self {
            RetryError::MaxRetriesExceeded { source, .. }
            | RetryError::Transient { source, .. }
            | RetryError::Permanent { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Boxed future for retry operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RetryResult<T>> + Send + 'a>>;

/// Attempt count and pacing for one class of operations.
///
/// The delay before retry `n` is `base_delay * n`, so the default policy
/// waits 1 s after the first failure and 2 s after the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to observe after a failed attempt (1-based index).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.base_delay * attempt as u32
    }
}

/// Execute an operation with the default retry policy
pub async fn with_retry<F, T>(op_name: &'static str, f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    with_retry_policy(op_name, RetryPolicy::default(), f).await
}

/// Execute an operation with a custom retry policy
pub async fn with_retry_policy<F, T>(
    op_name: &'static str,
    policy: RetryPolicy,
    mut f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    let mut attempt = 1;

    loop {
        debug!("Attempting operation '{}' (attempt {})", op_name, attempt);

        match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        op_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(err @ RetryError::Permanent { .. }) => {
                warn!(
                    "Operation '{}' failed permanently on attempt {}",
                    op_name, attempt
                );
                return Err(RetryError::MaxRetriesExceeded {
                    operation: op_name,
                    source: err.into_source(),
                });
            }
            Err(err) => {
                warn!(
                    "Operation '{}' failed on attempt {}: {}",
                    op_name, attempt, err
                );

                if attempt >= policy.max_attempts {
                    return Err(RetryError::MaxRetriesExceeded {
                        operation: op_name,
                        source: err.into_source(),
                    });
                }

                let delay = policy.delay_after(attempt);
                attempt += 1;

                #[cfg(feature = "async-rt")]
                tokio::time::sleep(delay).await;

                #[cfg(not(feature = "async-rt"))]
                std::thread::sleep(delay);
            }
        }
    }
}

/// Helper macro for creating transient errors
#[macro_export]
macro_rules! transient_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Transient {
            operation: $op,
            source: Box::new($err),
        }
    };
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: $op,
            source: Box::new($err),
        }
    };
}
