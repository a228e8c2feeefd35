//! Error types for segment-dl
//!
//! This module provides the error taxonomy for the download pipeline:
//! - Transport failures for manifest and segment requests, classified by kind
//! - Batch timeouts raised by the parallel coordinator
//! - Muxer failures and muxer availability problems
//! - Configuration, I/O and link resolution errors

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for segment-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for segment-dl
///
/// A manifest that parses to zero segments is not an error; it is reported as
/// [`DownloadOutcome::NoSegments`](crate::types::DownloadOutcome::NoSegments).
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "segment_timeout")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request for a manifest or segment failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The whole segment batch did not finish before the aggregate deadline
    #[error(
        "segment batch timed out after {timeout:?}: {completed} completed, {dropped} still in flight were dropped"
    )]
    BatchTimeout {
        /// Aggregate deadline that was exceeded
        timeout: Duration,
        /// Number of scheduled segments that finished in time
        completed: usize,
        /// Number of scheduled segments abandoned at the deadline
        dropped: usize,
    },

    /// External muxer exited unsuccessfully
    #[error("muxer failed ({status}): {stderr}")]
    MuxerFailed {
        /// Exit status description (e.g., "exit status: 1")
        status: String,
        /// Everything the muxer wrote to its error stream, trailing whitespace trimmed
        stderr: String,
    },

    /// External muxer binary cannot be invoked
    #[error("muxer unavailable: {0}")]
    MuxerUnavailable(String),

    /// Stream link resolution failed
    #[error("link resolution failed: {0}")]
    Resolve(String),

    /// A segment or manifest URL could not be built
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No translation is available for a title
    #[error("no usable translation: {0}")]
    NoTranslations(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error on a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Classification of an HTTP transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// TLS handshake or secure channel failure
    SecureChannel,
    /// Request exceeded its timeout
    Timeout,
    /// Server answered with a non-2xx status
    Status(u16),
    /// Connection could not be established (DNS, refused, reset)
    Connect,
    /// Response body could not be read
    Body,
    /// Anything else
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::SecureChannel => write!(f, "secure channel"),
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Status(code) => write!(f, "HTTP {}", code),
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Body => write!(f, "body"),
            TransportErrorKind::Other => write!(f, "other"),
        }
    }
}

/// HTTP failure for one request, with the URL it was made against
#[derive(Debug, Clone, Error)]
#[error("{kind} error for {url}: {message}")]
pub struct TransportError {
    /// Requested URL
    pub url: String,
    /// Failure class
    pub kind: TransportErrorKind,
    /// Underlying error text
    pub message: String,
}

impl TransportError {
    /// Create a transport error
    pub fn new(url: impl Into<String>, kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind,
            message: message.into(),
        }
    }

    /// Classify a reqwest error raised while requesting `url`
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        let kind = classify_reqwest(err);
        Self::new(url, kind, error_chain_text(err))
    }
}

/// Map a reqwest error to a [`TransportErrorKind`].
///
/// reqwest does not expose TLS failures as a distinct kind, so the source chain
/// is searched for TLS/SSL markers before falling back to reqwest's own flags.
/// The top-level message embeds the request URL, so only sources are searched.
fn classify_reqwest(err: &reqwest::Error) -> TransportErrorKind {
    if std::error::Error::source(err).is_some_and(is_secure_channel_failure) {
        return TransportErrorKind::SecureChannel;
    }
    if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if let Some(status) = err.status() {
        TransportErrorKind::Status(status.as_u16())
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Other
    }
}

const SECURE_CHANNEL_MARKERS: &[&str] = &[
    "tls",
    "ssl",
    "handshake",
    "certificate",
    "received fatal alert",
    "close_notify",
];

fn is_secure_channel_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_ascii_lowercase();
        if SECURE_CHANNEL_MARKERS.iter().any(|m| text.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}
