//! Single-segment HTTP fetch

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result, TransportError, TransportErrorKind};

/// Trait for fetching one segment to a local path
///
/// One call is one attempt. Retrying is the caller's job (see
/// [`download_with_retry`](crate::retry::download_with_retry)), so tests can
/// substitute scripted fetchers and count attempts.
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    /// GET `url` within `timeout` and write the full body to `destination`
    ///
    /// Returns the number of bytes written. `destination` is overwritten.
    async fn fetch(&self, url: &Url, destination: &Path, timeout: Duration) -> Result<u64>;
}

/// [`SegmentFetcher`] backed by a shared reqwest client
#[derive(Clone, Debug, Default)]
pub struct HttpSegmentFetcher {
    client: reqwest::Client,
}

impl HttpSegmentFetcher {
    /// Fetcher using `client` (connection pool is shared with the caller)
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SegmentFetcher for HttpSegmentFetcher {
    async fn fetch(&self, url: &Url, destination: &Path, timeout: Duration) -> Result<u64> {
        let url_str = url.as_str();
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url_str, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(TransportError::new(
                url_str,
                TransportErrorKind::Status(status.as_u16()),
                format!("segment request returned {status}"),
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(url_str, &e))?;

        tokio::fs::write(destination, &body).await?;
        tracing::trace!(url = url_str, bytes = body.len(), "Segment fetched");
        Ok(body.len() as u64)
    }
}
