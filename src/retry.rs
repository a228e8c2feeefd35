//! Retry logic with an injected policy
//!
//! Which failures are retried, how often, and how long to wait in between is
//! decided by a [`RetryConfig`] passed in by the caller instead of being fixed
//! at each call site. Errors expose a [`RetryClass`] through [`IsRetryable`];
//! an error is retried only when its class is listed in
//! [`RetryConfig::retry_on`] and attempts remain.
//!
//! # Example
//!
//! ```no_run
//! use segment_dl::retry::{IsRetryable, RetryClass, download_with_retry};
//! use segment_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Handshake,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn retry_class(&self) -> Option<RetryClass> {
//!         match self {
//!             MyError::Handshake => Some(RetryClass::SecureChannel),
//!             MyError::Permanent => None,
//!         }
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::segment_default();
//! download_with_retry(&config, || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, TransportErrorKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Failure classes a retry policy can opt into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    /// TLS handshake / secure channel failure, seen intermittently under heavy
    /// parallel load against one host
    SecureChannel,
    /// A single request timed out
    Timeout,
    /// Connection refused, reset, or dropped while reading the body
    Connect,
    /// 5xx or 429 response
    ServerError,
    /// A whole segment batch missed its aggregate deadline
    BatchTimeout,
}

/// Trait for errors that can be classified for retrying
///
/// Returning `None` marks the error as permanent under every policy.
pub trait IsRetryable {
    /// The retry class of this error, if it is transient at all
    fn retry_class(&self) -> Option<RetryClass>;
}

impl IsRetryable for Error {
    fn retry_class(&self) -> Option<RetryClass> {
        match self {
            Error::Transport(e) => match e.kind {
                TransportErrorKind::SecureChannel => Some(RetryClass::SecureChannel),
                TransportErrorKind::Timeout => Some(RetryClass::Timeout),
                // A body that breaks off mid-read is a dropped connection
                TransportErrorKind::Connect | TransportErrorKind::Body => Some(RetryClass::Connect),
                TransportErrorKind::Status(code) if code >= 500 || code == 429 => {
                    Some(RetryClass::ServerError)
                }
                TransportErrorKind::Status(_) | TransportErrorKind::Other => None,
            },
            Error::BatchTimeout { .. } => Some(RetryClass::BatchTimeout),
            // Local disk failures, muxer failures, config and resolution problems
            // need a different input, not another attempt
            Error::Config { .. }
            | Error::Io(_)
            | Error::MuxerFailed { .. }
            | Error::MuxerUnavailable(_)
            | Error::Resolve(_)
            | Error::InvalidUrl(_)
            | Error::NoTranslations(_)
            | Error::Serialization(_)
            | Error::Other(_) => None,
        }
    }
}

impl RetryConfig {
    /// Whether `err` may be retried under this policy (ignoring attempt count)
    pub fn allows<E: IsRetryable>(&self, err: &E) -> bool {
        err.retry_class()
            .is_some_and(|class| self.retry_on.contains(&class))
    }
}

/// Execute an async operation under a retry policy
///
/// The operation runs once, then up to `config.max_attempts` more times while
/// it keeps failing with an error the policy allows. Delays grow by
/// `backoff_multiplier`, are capped at `max_delay`, and get jitter when
/// enabled.
///
/// # Returns
///
/// The successful result, or the last error once the policy gives up.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if config.allows(&e) && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                if !jittered_delay.is_zero() {
                    tokio::time::sleep(jittered_delay).await;
                }

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if config.allows(&e) {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result is uniformly distributed between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Handshake,
        Timeout,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Handshake => write!(f, "tls handshake eof"),
                TestError::Timeout => write!(f, "timed out"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn retry_class(&self) -> Option<RetryClass> {
            match self {
                TestError::Handshake => Some(RetryClass::SecureChannel),
                TestError::Timeout => Some(RetryClass::Timeout),
                TestError::Permanent => None,
            }
        }
    }

    fn fast_config(max_attempts: u32, retry_on: Vec<RetryClass>) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
            retry_on,
        }
    }

    async fn run_counting(
        config: &RetryConfig,
        fail_times: u32,
        error: fn() -> TestError,
    ) -> (Result<i32, TestError>, u32) {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let result = download_with_retry(config, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < fail_times {
                    Err(error())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        (result, counter.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let config = RetryConfig::segment_default();
        let (result, calls) = run_counting(&config, 0, || TestError::Handshake).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1, "should only call once");
    }

    #[tokio::test]
    async fn segment_default_retries_handshake_once_then_succeeds() {
        let config = RetryConfig::segment_default();
        let (result, calls) = run_counting(&config, 1, || TestError::Handshake).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn segment_default_gives_up_after_second_handshake_failure() {
        let config = RetryConfig::segment_default();
        let (result, calls) = run_counting(&config, 5, || TestError::Handshake).await;

        assert!(matches!(result, Err(TestError::Handshake)));
        assert_eq!(calls, 2, "exactly one retry, never a third call");
    }

    #[tokio::test]
    async fn segment_default_does_not_retry_timeouts() {
        let config = RetryConfig::segment_default();
        let (result, calls) = run_counting(&config, 1, || TestError::Timeout).await;

        assert!(matches!(result, Err(TestError::Timeout)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let config = fast_config(3, vec![RetryClass::SecureChannel, RetryClass::Timeout]);
        let (result, calls) = run_counting(&config, 1, || TestError::Permanent).await;

        assert!(result.is_err());
        assert_eq!(calls, 1, "should not retry permanent error");
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let config = fast_config(2, vec![RetryClass::Timeout]);
        let (result, calls) = run_counting(&config, 10, || TestError::Timeout).await;

        assert!(result.is_err());
        assert_eq!(calls, 3, "should try initial + 2 retries");
    }

    #[tokio::test]
    async fn zero_max_attempts_fails_on_first_error() {
        let config = fast_config(0, vec![RetryClass::SecureChannel]);
        let (result, calls) = run_counting(&config, 1, || TestError::Handshake).await;

        assert!(matches!(result, Err(TestError::Handshake)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let config = fast_config(3, vec![RetryClass::Timeout]);

        let start = std::time::Instant::now();
        let _ = run_counting(&config, 10, || TestError::Timeout).await;
        let elapsed = start.elapsed();

        // 10ms + 20ms + 40ms
        assert!(
            elapsed >= Duration::from_millis(70),
            "should wait at least 70ms, waited {:?}",
            elapsed
        );
        assert!(elapsed < Duration::from_secs(2), "waited {:?}", elapsed);
    }

    #[tokio::test]
    async fn individual_delays_never_exceed_max_delay() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 10.0,
            jitter: false,
            retry_on: vec![RetryClass::Timeout],
        };

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _result = download_with_retry(&config, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err::<i32, _>(TestError::Timeout)
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 4);
        let max_allowed = Duration::from_millis(250);
        for i in 1..ts.len() {
            let gap = ts[i].duration_since(ts[i - 1]);
            assert!(gap <= max_allowed, "gap {i} was {gap:?}");
        }
    }

    #[test]
    fn add_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay, "iteration {i}: {jittered:?}");
            assert!(jittered <= delay * 2, "iteration {i}: {jittered:?}");
        }
    }

    #[test]
    fn add_jitter_on_zero_delay_returns_zero() {
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    fn transport(kind: TransportErrorKind) -> Error {
        Error::Transport(TransportError::new("https://cdn.example/seg", kind, "boom"))
    }

    #[test]
    fn transport_kinds_map_to_retry_classes() {
        assert_eq!(
            transport(TransportErrorKind::SecureChannel).retry_class(),
            Some(RetryClass::SecureChannel)
        );
        assert_eq!(
            transport(TransportErrorKind::Timeout).retry_class(),
            Some(RetryClass::Timeout)
        );
        assert_eq!(
            transport(TransportErrorKind::Connect).retry_class(),
            Some(RetryClass::Connect)
        );
        assert_eq!(
            transport(TransportErrorKind::Body).retry_class(),
            Some(RetryClass::Connect)
        );
        assert_eq!(
            transport(TransportErrorKind::Status(503)).retry_class(),
            Some(RetryClass::ServerError)
        );
        assert_eq!(
            transport(TransportErrorKind::Status(429)).retry_class(),
            Some(RetryClass::ServerError)
        );
        assert_eq!(transport(TransportErrorKind::Status(404)).retry_class(), None);
        assert_eq!(transport(TransportErrorKind::Other).retry_class(), None);
    }

    #[test]
    fn batch_timeout_has_its_own_class() {
        let err = Error::BatchTimeout {
            timeout: Duration::from_secs(1),
            completed: 0,
            dropped: 1,
        };
        assert_eq!(err.retry_class(), Some(RetryClass::BatchTimeout));
    }

    #[test]
    fn muxer_and_io_failures_are_permanent() {
        let muxer = Error::MuxerFailed {
            status: "exit status: 1".into(),
            stderr: "bad input".into(),
        };
        assert_eq!(muxer.retry_class(), None);
        assert_eq!(Error::MuxerUnavailable("no ffmpeg".into()).retry_class(), None);
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(io.retry_class(), None);
    }

    #[test]
    fn segment_policy_only_allows_secure_channel() {
        let config = RetryConfig::segment_default();
        assert!(config.allows(&transport(TransportErrorKind::SecureChannel)));
        assert!(!config.allows(&transport(TransportErrorKind::Timeout)));
        assert!(!config.allows(&transport(TransportErrorKind::Status(500))));
        assert!(!config.allows(&transport(TransportErrorKind::Connect)));
    }

    #[test]
    fn request_policy_allows_batch_timeout() {
        let config = RetryConfig::default();
        assert!(config.allows(&Error::BatchTimeout {
            timeout: Duration::from_secs(1),
            completed: 0,
            dropped: 1,
        }));
    }
}
