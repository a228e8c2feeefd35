//! Segment manifests
//!
//! The manifest dialect is isolated behind [`ManifestParser`]; the rest of the
//! pipeline only sees ordered [`SegmentRef`]s. [`PairedLineParser`] handles the
//! flat playlist served by the default stream source: a fixed block of header
//! lines followed by alternating reference and metadata lines.

use std::time::Duration;
use url::Url;

use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::source::StreamLink;
use crate::types::{Quality, SegmentRef};

/// Suffix appended to `<link><quality>` to address the manifest
pub const MANIFEST_SUFFIX: &str = ".mp4:hls:manifest.m3u8";

/// Turns manifest text into ordered segment references
pub trait ManifestParser: Send + Sync {
    /// Parse `text`, resolving references against `segment_base`
    ///
    /// An empty result is valid and means there is nothing to download.
    fn parse(&self, text: &str, segment_base: &str) -> Result<Vec<SegmentRef>>;
}

/// Parser for the skip-header, paired-line dialect
///
/// After `header_lines` lines, every other line (starting with the first) is a
/// segment reference such as `./seg-12-v1-a1.ts`. The index is the second
/// `-`-separated field of that reference. Blank reference lines are skipped.
#[derive(Clone, Debug)]
pub struct PairedLineParser {
    /// Leading lines that carry no segment references
    pub header_lines: usize,
}

impl Default for PairedLineParser {
    fn default() -> Self {
        Self { header_lines: 7 }
    }
}

impl ManifestParser for PairedLineParser {
    fn parse(&self, text: &str, segment_base: &str) -> Result<Vec<SegmentRef>> {
        let mut segments = Vec::new();

        for line in text.lines().skip(self.header_lines).step_by(2) {
            let reference = line.trim();
            if reference.is_empty() {
                continue;
            }

            let Some(index) = reference
                .split('-')
                .nth(1)
                .and_then(|field| field.parse::<u64>().ok())
            else {
                tracing::warn!(line = reference, "Skipping manifest line without a segment index");
                continue;
            };

            let url = resolve_reference(segment_base, reference)?;
            segments.push(SegmentRef { url, index });
        }

        tracing::debug!(segments = segments.len(), "Parsed manifest");
        Ok(segments)
    }
}

/// Absolute URL for a segment reference
///
/// Absolute references are used as-is; relative ones lose a leading `./` and
/// are appended to the base link.
fn resolve_reference(segment_base: &str, reference: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(reference) {
        return Ok(url);
    }
    let relative = reference.strip_prefix("./").unwrap_or(reference);
    Ok(Url::parse(&format!("{segment_base}{relative}"))?)
}

/// Where a stream's manifest and segments live
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestLocation {
    /// Manifest URL
    pub manifest_url: Url,
    /// Prefix for relative segment references
    pub segment_base: String,
}

impl ManifestLocation {
    /// `<link><quality>.mp4:hls:manifest.m3u8`, with segments under `<link>`
    pub fn for_link(link: &StreamLink, quality: Quality) -> Result<Self> {
        let base = link.absolute();
        let manifest_url = Url::parse(&format!("{base}{}{MANIFEST_SUFFIX}", quality.as_str()))?;
        Ok(Self {
            manifest_url,
            segment_base: base,
        })
    }
}

/// GET the manifest text; non-2xx responses are transport errors
pub async fn fetch_manifest(
    client: &reqwest::Client,
    url: &Url,
    timeout: Duration,
) -> Result<String> {
    let url_str = url.as_str();
    let response = client
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
            format!("manifest request returned {status}"),
        )));
    }

    let text = response
        .text()
        .await
        .map_err(|e| TransportError::from_reqwest(url_str, &e))?;
    Ok(text)
}
