//! Status Source Traits
//!
//! Trait definitions for status sources. The poller only ever talks to
//! these traits, so tests drive it with in-memory providers and new services
//! slot in without touching the resolution pipeline.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::status::{HomeStatus, SourceStatus};

/// Failure talking to a status source
///
/// Never leaves the poller: every fetch error is logged and downgraded to
/// the source's `ERROR` sentinel.
#[derive(Debug, Error)]
pub enum SourceFetchError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("{source_name} returned HTTP {status}")]
    Status {
        /// Source that answered
        source_name: String,
        /// HTTP status code
        status: u16,
    },

    /// The service answered but reported a failure
    #[error("{source_name} API error: {message}")]
    Api {
        /// Source that answered
        source_name: String,
        /// Error reported by the service
        message: String,
    },

    /// The response did not have the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// No answer within the request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider cannot perform the requested operation
    #[error("{0} does not support this operation")]
    Unsupported(String),
}

/// Chat-presence source (one account)
#[async_trait]
pub trait PresenceProvider: Send + Sync {
    /// Provider name for logging (e.g., "slack:work")
    fn name(&self) -> &str;

    /// Fetch the account's current status
    ///
    /// A provider with no credentials returns [`SourceStatus::empty`].
    async fn fetch_status(&self) -> Result<SourceStatus, SourceFetchError>;

    /// Set the account's status
    async fn set_status(&self, _status: &SourceStatus) -> Result<(), SourceFetchError> {
        Err(SourceFetchError::Unsupported(self.name().to_string()))
    }
}

/// Home-automation source
#[async_trait]
pub trait HomeProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Fetch the current readings
    ///
    /// A provider with no credentials returns [`HomeStatus::empty`].
    async fn fetch_status(&self) -> Result<HomeStatus, SourceFetchError>;
}

/// Timeout and retry budget for one source fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Bound on each attempt
    pub timeout: Duration,
    /// Extra attempts after the first failure
    pub retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    #[must_use]
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }
}

/// Run `op` under the policy's timeout, retrying failed attempts
///
/// Returns the last error once the retry budget is spent.
pub async fn fetch_with_retry<T, F, Fut>(
    source_name: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, SourceFetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceFetchError>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(SourceFetchError::Timeout(policy.timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(SourceFetchError::Unsupported(name)) => {
                return Err(SourceFetchError::Unsupported(name));
            }
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                tracing::debug!(
                    source = source_name,
                    attempt = attempt,
                    error = %e,
                    "Source fetch failed, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn api_error() -> SourceFetchError {
        SourceFetchError::Api {
            source_name: "test".into(),
            message: "boom".into(),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = fetch_with_retry("test", RetryPolicy::default(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(api_error())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fetch_with_retry("test", RetryPolicy::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(api_error())
        })
        .await;

        assert!(matches!(result, Err(SourceFetchError::Api { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_times_out() {
        let policy = RetryPolicy::new(Duration::from_secs(2), 0);
        let result: Result<(), _> = fetch_with_retry("test", policy, || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(SourceFetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_unsupported_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fetch_with_retry("test", RetryPolicy::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceFetchError::Unsupported("test".into()))
        })
        .await;

        assert!(matches!(result, Err(SourceFetchError::Unsupported(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_set_status_is_unsupported() {
        struct ReadOnly;

        #[async_trait]
        impl PresenceProvider for ReadOnly {
            fn name(&self) -> &str {
                "read-only"
            }
            async fn fetch_status(&self) -> Result<SourceStatus, SourceFetchError> {
                Ok(SourceStatus::empty())
            }
        }

        let err = ReadOnly.set_status(&SourceStatus::empty()).await.unwrap_err();
        assert_eq!(err.to_string(), "read-only does not support this operation");
    }
}
