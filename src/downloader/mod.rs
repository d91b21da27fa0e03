//! Download layer: transport abstraction and retry policy.
//!
//! The [`Downloader`] trait hides the transport so the pipeline can run
//! against HTTP in production and scripted mocks in tests. Retries apply
//! only to transient failures; permanent errors fail the request on the
//! attempt that observed them.

mod http;

pub use http::HttpDownloader;

use crate::error::LoadError;
use crate::governor::ThroughputMonitor;
use crate::request::AssetKey;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A single fetch failure, classified by whether retrying could help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    /// True for failures worth retrying (timeouts, connection resets,
    /// server errors). False for failures that will repeat (4xx).
    pub transient: bool,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// Fetches raw bytes for an asset URL.
pub trait Downloader: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Bytes, FetchError>> + Send;
}

/// Retry schedule for transient download failures.
///
/// Backoff doubles per attempt: `backoff_base * 2^(attempt - 1)` after the
/// first failure, so the defaults wait 1s, then 2s, before the final try.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs `downloader.fetch` under the retry policy, recording successful
/// transfers into the throughput monitor. Checks for cancellation at each
/// attempt boundary and while sleeping between attempts.
pub(crate) async fn fetch_with_retry<D: Downloader>(
    downloader: &D,
    key: &AssetKey,
    policy: &RetryPolicy,
    monitor: &ThroughputMonitor,
    cancel: &CancellationToken,
) -> Result<Bytes, LoadError> {
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoadError::Cancelled),
            result = tokio::time::timeout(policy.timeout, downloader.fetch(key.as_str())) => result,
        };

        match outcome {
            Ok(Ok(bytes)) => {
                monitor.record(bytes.len() as u64, started.elapsed());
                debug!(%key, attempt, bytes = bytes.len(), "download complete");
                return Ok(bytes);
            }
            Ok(Err(err)) => {
                last_error = err.message;
                if !err.transient {
                    warn!(%key, attempt, error = %last_error, "permanent download failure");
                    return Err(LoadError::DownloadFailed {
                        key: key.to_string(),
                        attempts: attempt,
                        last_error,
                    });
                }
                warn!(%key, attempt, error = %last_error, "download attempt failed");
            }
            Err(_) => {
                last_error = format!("timed out after {:?}", policy.timeout);
                warn!(%key, attempt, timeout = ?policy.timeout, "download attempt timed out");
            }
        }

        if attempt < policy.max_attempts {
            let backoff = policy.backoff_base * 2u32.pow(attempt - 1);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LoadError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    Err(LoadError::DownloadFailed {
        key: key.to_string(),
        attempts: policy.max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` fetches with a transient error, then
    /// succeeds.
    struct FlakyDownloader {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl Downloader for FlakyDownloader {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(FetchError::transient("connection reset"))
            } else {
                Ok(Bytes::from_static(b"payload"))
            }
        }
    }

    struct PermanentFailure;

    impl Downloader for PermanentFailure {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            Err(FetchError::permanent("404 Not Found"))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_backoff_base(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let downloader = FlakyDownloader {
            failures: 2,
            calls: Arc::clone(&calls),
        };
        let monitor = ThroughputMonitor::new();
        let cancel = CancellationToken::new();

        let bytes = fetch_with_retry(&downloader, &"k".into(), &fast_policy(), &monitor, &cancel)
            .await
            .unwrap();

        assert_eq!(bytes.as_ref(), b"payload");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let downloader = FlakyDownloader {
            failures: u32::MAX,
            calls: Arc::clone(&calls),
        };
        let monitor = ThroughputMonitor::new();
        let cancel = CancellationToken::new();

        let err = fetch_with_retry(&downloader, &"k".into(), &fast_policy(), &monitor, &cancel)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            LoadError::DownloadFailed { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "connection reset");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_does_not_retry() {
        let monitor = ThroughputMonitor::new();
        let cancel = CancellationToken::new();

        let err = fetch_with_retry(
            &PermanentFailure,
            &"k".into(),
            &fast_policy(),
            &monitor,
            &cancel,
        )
        .await
        .unwrap_err();

        match err {
            LoadError::DownloadFailed { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let downloader = FlakyDownloader {
            failures: u32::MAX,
            calls,
        };
        let monitor = ThroughputMonitor::new();
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::default().with_backoff_base(Duration::from_secs(60));

        cancel.cancel();
        let err = fetch_with_retry(&downloader, &"k".into(), &policy, &monitor, &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, LoadError::Cancelled);
    }

    #[tokio::test]
    async fn test_success_records_throughput() {
        let downloader = FlakyDownloader {
            failures: 0,
            calls: Arc::new(AtomicU32::new(0)),
        };
        let monitor = ThroughputMonitor::new();
        let cancel = CancellationToken::new();

        fetch_with_retry(&downloader, &"k".into(), &fast_policy(), &monitor, &cancel)
            .await
            .unwrap();

        assert_eq!(monitor.total_bytes(), 7);
    }
}
