//! Common test utilities for segment-dl integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use segment_dl::{
    CacheConfig, Config, Error, Event, HttpSegmentFetcher, IdNamespace, MuxJob, Muxer, Result,
    SegmentDownloader, SegmentFetcher, StaticLinkResolver, StreamLink, TransportError,
    TransportErrorKind,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const IDENTIFIER: &str = "20";
pub const TRANSLATION: &str = "610";

/// Seven header lines, as served by the stream source
pub const MANIFEST_HEADER: &str =
    "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:1\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-ALLOW-CACHE:YES\n#EXT-X-INDEPENDENT-SEGMENTS\n";

/// Body served for segment `index`
pub fn segment_body(index: u64) -> Vec<u8> {
    format!("<segment {index}>").into_bytes()
}

/// Manifest text listing `indices` in the given order
pub fn manifest_text(indices: &[u64]) -> String {
    let mut text = MANIFEST_HEADER.to_string();
    for index in indices {
        text.push_str(&format!("./seg-{index}-v1-a1.ts\n#EXTINF:6.000,\n"));
    }
    text
}

/// Mount the manifest for `indices` at `/stream/720.mp4:hls:manifest.m3u8`
pub async fn mount_manifest(server: &MockServer, indices: &[u64], expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/stream/720.mp4:hls:manifest.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest_text(indices)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Mount one segment, expecting exactly `expected_calls` requests
pub async fn mount_segment(server: &MockServer, index: u64, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/stream/seg-{index}-v1-a1.ts")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(segment_body(index)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Mount one segment without a call-count expectation
///
/// For segments whose request may still be in flight when a sibling's failure
/// ends the batch.
pub async fn mount_segment_lenient(server: &MockServer, index: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/stream/seg-{index}-v1-a1.ts")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(segment_body(index)))
        .mount(server)
        .await;
}

pub fn resolver(server: &MockServer) -> Arc<StaticLinkResolver> {
    Arc::new(StaticLinkResolver::new().with_link(
        IDENTIFIER,
        IdNamespace::Shikimori,
        1,
        TRANSLATION,
        StreamLink::new(format!("{}/stream/", server.uri())),
    ))
}

/// Config rooted in `tmp` with short timeouts
pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config {
        cache: CacheConfig {
            root: tmp.path().join("cache"),
        },
        ..Config::default()
    };
    config.download.segment_timeout = Duration::from_secs(5);
    config.download.manifest_timeout = Duration::from_secs(5);
    config
}

pub fn downloader(
    tmp: &TempDir,
    server: &MockServer,
    muxer: Arc<dyn Muxer>,
) -> SegmentDownloader {
    SegmentDownloader::new(test_config(tmp), resolver(server))
        .expect("valid config")
        .with_muxer(muxer)
}

/// Muxer that concatenates the listed files in list order
#[derive(Default)]
pub struct ConcatMuxer {
    runs: AtomicUsize,
}

impl ConcatMuxer {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Muxer for ConcatMuxer {
    async fn ensure_available(&self) -> Result<()> {
        Ok(())
    }

    async fn mux(&self, job: &MuxJob) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let list = tokio::fs::read_to_string(&job.input_list).await?;
        let mut out = Vec::new();
        for line in list.lines() {
            let name = line
                .strip_prefix("file ")
                .ok_or_else(|| Error::Other(format!("bad input line: {line}")))?;
            out.extend(tokio::fs::read(job.working_dir.join(name)).await?);
        }
        tokio::fs::write(&job.output, out).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "concat"
    }
}

/// HTTP fetcher that fails the first `n` attempts for chosen URLs with a
/// secure channel error
#[derive(Default)]
pub struct FlakyFetcher {
    inner: HttpSegmentFetcher,
    failures: Mutex<HashMap<String, usize>>,
}

impl FlakyFetcher {
    pub fn fail_first(self, path_suffix: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(path_suffix.to_string(), times);
        self
    }
}

#[async_trait]
impl SegmentFetcher for FlakyFetcher {
    async fn fetch(&self, url: &Url, destination: &Path, timeout: Duration) -> Result<u64> {
        let inject = {
            let mut failures = self.failures.lock().unwrap();
            failures
                .iter_mut()
                .find(|(suffix, _)| url.path().ends_with(suffix.as_str()))
                .map(|(_, remaining)| {
                    let fail = *remaining > 0;
                    *remaining = remaining.saturating_sub(1);
                    fail
                })
                .unwrap_or(false)
        };
        if inject {
            return Err(Error::Transport(TransportError::new(
                url.as_str(),
                TransportErrorKind::SecureChannel,
                "received fatal alert: handshake_failure",
            )));
        }
        self.inner.fetch(url, destination, timeout).await
    }
}

/// Drain every event currently buffered on `rx`
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
