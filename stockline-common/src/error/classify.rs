//! Error classification for retry decisions.
//!
//! Errors self-describe whether a retry can help, which keeps the retry
//! policy out of call sites: the orchestrator retries storage reads once,
//! the FX chain fails over across providers, everything else surfaces.

use std::future::Future;
use std::time::Duration;

use super::FabricError;

/// Classification of error kinds for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// May resolve on retry (connectivity, timeouts)
    Transient,
    /// Will not resolve on retry (bad input, missing data)
    Permanent,
    /// Missing or invalid configuration
    Configuration,
    /// Bug or unexpected state
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            _ => None,
        }
    }
}

impl ErrorClassification for FabricError {
    fn category(&self) -> ErrorCategory {
        match self {
            FabricError::UpstreamTimeout(_)
            | FabricError::UpstreamUnavailable(_)
            | FabricError::StorageUnavailable(_)
            | FabricError::Cache(_) => ErrorCategory::Transient,
            FabricError::Validation(_)
            | FabricError::NotFound(_)
            | FabricError::DataQuality(_)
            | FabricError::StorageFailure(_)
            | FabricError::FxUnavailable(_) => ErrorCategory::Permanent,
            FabricError::Config(_) => ErrorCategory::Configuration,
            FabricError::Internal(_) => ErrorCategory::Internal,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            FabricError::StorageUnavailable(_) => Some(Duration::from_millis(250)),
            FabricError::UpstreamTimeout(_) => Some(Duration::from_millis(500)),
            FabricError::UpstreamUnavailable(_) => Some(Duration::from_secs(1)),
            FabricError::Cache(_) => Some(Duration::from_millis(100)),
            _ => None,
        }
    }
}

/// Retry a fallible operation while its error stays transient.
///
/// Delays follow the error's own suggestion, doubling per attempt with a cap.
pub async fn retry_transient<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
) -> Result<T, E>
where
    E: ErrorClassification + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut fallback_delay = Duration::from_millis(100);

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;
                if !err.is_transient() || attempts >= max_attempts {
                    return Err(err);
                }
                let delay = err.suggested_retry_delay().unwrap_or(fallback_delay);
                tokio::time::sleep(delay).await;
                fallback_delay = std::cmp::min(fallback_delay * 2, Duration::from_secs(5));
            }
        }
    }
}

/// One fallback pass: run once, retry a single time on a transient error.
///
/// This is the storage-read policy: a flaky connection gets one more chance,
/// everything else surfaces immediately.
pub async fn retry_once<T, E, F, Fut>(operation: F) -> Result<T, E>
where
    E: ErrorClassification + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_transient(operation, 2).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fabric_error_classification() {
        let err = FabricError::StorageUnavailable("refused".to_string());
        assert!(err.is_transient());
        assert!(err.suggested_retry_delay().is_some());

        let err = FabricError::NotFound("AAPL".to_string());
        assert!(!err.is_transient());
        assert_eq!(err.category(), ErrorCategory::Permanent);

        let err = FabricError::Config("missing key".to_string());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[tokio::test]
    async fn test_retry_once_recovers_from_single_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, FabricError> = retry_once(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FabricError::StorageUnavailable("first try".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, FabricError> = retry_once(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FabricError::not_found("gone")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
