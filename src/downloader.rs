//! End-to-end download pipeline
//!
//! [`SegmentDownloader::download`] runs, in order:
//! muxer availability check, cache key, whole-artifact check, working
//! directory, link resolution, manifest fetch and parse, parallel segment
//! download, assembly.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::assembler::Assembler;
use crate::cache::CacheManager;
use crate::cache_key::CacheKey;
use crate::config::Config;
use crate::coordinator::SegmentCoordinator;
use crate::error::{Error, Result};
use crate::fetcher::{HttpSegmentFetcher, SegmentFetcher};
use crate::manifest::{ManifestLocation, ManifestParser, PairedLineParser, fetch_manifest};
use crate::muxer::{FfmpegMuxer, Muxer};
use crate::source::{LinkResolver, TranslationInfo};
use crate::types::{CacheParams, DownloadOutcome, DownloadRequest, Event, IdNamespace};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Segment downloader (cloneable, all collaborators are Arc-wrapped)
#[derive(Clone)]
pub struct SegmentDownloader {
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    event_tx: broadcast::Sender<Event>,
    /// Working directory lifecycle
    cache: CacheManager,
    /// Stream link lookup
    resolver: Arc<dyn LinkResolver>,
    /// Manifest dialect
    parser: Arc<dyn ManifestParser>,
    /// Segment transport
    fetcher: Arc<dyn SegmentFetcher>,
    /// External muxer
    muxer: Arc<dyn Muxer>,
    /// Client used for manifests (and segments, with the default fetcher)
    client: reqwest::Client,
}

impl SegmentDownloader {
    /// Create a downloader with the default collaborators
    ///
    /// - ffmpeg located per [`ToolsConfig`](crate::config::ToolsConfig)
    /// - [`PairedLineParser`] for manifests
    /// - [`HttpSegmentFetcher`] sharing one reqwest client with manifest requests
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is invalid.
    pub fn new(config: Config, resolver: Arc<dyn LinkResolver>) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("segment-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let muxer = FfmpegMuxer::from_config(&config.tools);

        Ok(Self {
            cache: CacheManager::new(config.cache.root.clone()),
            config: Arc::new(config),
            event_tx,
            resolver,
            parser: Arc::new(PairedLineParser::default()),
            fetcher: Arc::new(HttpSegmentFetcher::new(client.clone())),
            muxer: Arc::new(muxer),
            client,
        })
    }

    /// Replace the muxer
    pub fn with_muxer(mut self, muxer: Arc<dyn Muxer>) -> Self {
        self.muxer = muxer;
        self
    }

    /// Replace the manifest parser
    pub fn with_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Replace the segment fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SegmentFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Subscribe to download events
    ///
    /// Events emitted before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Working directory manager
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine
        self.event_tx.send(event).ok();
    }

    /// Final artifact path: `<output_dir>/<output_name>.mp4`, or inside the
    /// working directory when no output directory was given
    pub fn output_path(&self, request: &DownloadRequest) -> PathBuf {
        let dir = match &request.output_dir {
            Some(dir) => dir.clone(),
            None => self
                .cache
                .working_dir_path(&CacheKey::for_request(request)),
        };
        dir.join(format!("{}.mp4", request.output_name))
    }

    /// Download, assemble and place one episode
    ///
    /// # Errors
    ///
    /// - [`Error::MuxerUnavailable`] before any network activity
    /// - [`Error::Resolve`] / [`Error::Transport`] for link or manifest problems
    /// - [`Error::Transport`] / [`Error::BatchTimeout`] from the segment batch
    /// - [`Error::MuxerFailed`] from assembly
    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadOutcome> {
        match self.run_pipeline(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.emit_event(Event::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, request: &DownloadRequest) -> Result<DownloadOutcome> {
        self.muxer.ensure_available().await?;

        let key = CacheKey::for_request(request);
        let output = self.output_path(request);

        if tokio::fs::try_exists(&output).await? {
            tracing::info!(key = %key, output = ?output, "Artifact already exists");
            self.emit_event(Event::AlreadyAssembled {
                output: output.clone(),
            });
            return Ok(DownloadOutcome::AlreadyExists(output));
        }

        let dir = self.cache.resolve_working_dir(&key).await?;

        let link = self
            .resolver
            .resolve(
                &request.identifier,
                request.namespace,
                request.episode,
                &request.translation_id,
            )
            .await?;
        let location = ManifestLocation::for_link(&link, request.quality)?;

        tracing::debug!(
            key = %key,
            resolver = self.resolver.name(),
            manifest = %location.manifest_url,
            "Fetching manifest"
        );
        let text = fetch_manifest(
            &self.client,
            &location.manifest_url,
            self.config.download.manifest_timeout,
        )
        .await?;
        let segments = self.parser.parse(&text, &location.segment_base)?;

        self.emit_event(Event::ManifestParsed {
            segments: segments.len(),
        });
        if segments.is_empty() {
            tracing::warn!(key = %key, manifest = %location.manifest_url, "Manifest lists no segments");
            return Ok(DownloadOutcome::NoSegments);
        }

        let coordinator =
            SegmentCoordinator::new(Arc::clone(&self.fetcher), self.config.segment_retry.clone())
                .with_max_concurrency(self.config.download.max_concurrent_segments)
                .with_events(self.event_tx.clone());
        let report = coordinator
            .download_all(
                &segments,
                &dir,
                &output,
                self.config.download.segment_timeout,
            )
            .await?;

        if report.artifact_present {
            self.emit_event(Event::AlreadyAssembled {
                output: output.clone(),
            });
            return Ok(DownloadOutcome::AlreadyExists(output));
        }

        tracing::info!(
            key = %key,
            downloaded = report.downloaded,
            skipped = report.skipped,
            bytes = report.bytes,
            "Segments complete"
        );

        self.emit_event(Event::Assembling {
            segments: report.downloaded + report.skipped,
        });
        let path = Assembler::new(Arc::clone(&self.muxer))
            .combine(&dir, &output, request.frame_rate, request.include_audio)
            .await?;

        self.emit_event(Event::Complete {
            output: path.clone(),
        });
        Ok(DownloadOutcome::Completed(path))
    }

    /// Remove the working directory for `params`
    ///
    /// A missing directory is not an error.
    pub async fn purge(&self, params: &CacheParams) -> Result<()> {
        let key = CacheKey::compute(params);
        self.cache.purge(&key).await?;
        self.emit_event(Event::CachePurged {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Translations offered for a title
    pub async fn available_translations(
        &self,
        identifier: &str,
        namespace: IdNamespace,
    ) -> Result<Vec<TranslationInfo>> {
        self.resolver
            .available_translations(identifier, namespace)
            .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::muxer::MuxJob;
    use crate::source::{StaticLinkResolver, StreamLink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Muxer that copies the first listed segment, or is missing entirely
    #[derive(Default)]
    struct StubMuxer {
        missing: bool,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Muxer for StubMuxer {
        async fn ensure_available(&self) -> Result<()> {
            if self.missing {
                return Err(Error::MuxerUnavailable("stub muxer missing".into()));
            }
            Ok(())
        }

        async fn mux(&self, job: &MuxJob) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(&job.output, b"muxed").await?;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn config(tmp: &TempDir) -> Config {
        Config {
            cache: CacheConfig {
                root: tmp.path().join("cache"),
            },
            ..Config::default()
        }
    }

    fn request(tmp: &TempDir) -> DownloadRequest {
        let mut req = DownloadRequest::new("20", IdNamespace::Shikimori, 1, "610", "ep1");
        req.output_dir = Some(tmp.path().join("videos"));
        req
    }

    fn resolver_for(server: &MockServer) -> Arc<StaticLinkResolver> {
        Arc::new(StaticLinkResolver::new().with_link(
            "20",
            IdNamespace::Shikimori,
            1,
            "610",
            StreamLink::new(format!("{}/v/", server.uri())),
        ))
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.download.segment_timeout = std::time::Duration::ZERO;

        let result = SegmentDownloader::new(config, Arc::new(StaticLinkResolver::new()));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn missing_muxer_fails_before_any_request() {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let downloader = SegmentDownloader::new(config(&tmp), resolver_for(&server))
            .unwrap()
            .with_muxer(Arc::new(StubMuxer {
                missing: true,
                ..StubMuxer::default()
            }));
        let mut events = downloader.subscribe();

        let err = downloader.download(&request(&tmp)).await.unwrap_err();

        assert!(matches!(err, Error::MuxerUnavailable(_)));
        assert!(matches!(events.recv().await.unwrap(), Event::Failed { .. }));
    }

    #[tokio::test]
    async fn existing_artifact_skips_network_and_muxer() {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let muxer = Arc::new(StubMuxer::default());
        let downloader = SegmentDownloader::new(config(&tmp), resolver_for(&server))
            .unwrap()
            .with_muxer(muxer.clone());
        let req = request(&tmp);
        let output = downloader.output_path(&req);
        tokio::fs::create_dir_all(output.parent().unwrap()).await.unwrap();
        tokio::fs::write(&output, b"done").await.unwrap();

        let outcome = downloader.download(&req).await.unwrap();

        assert_eq!(outcome, DownloadOutcome::AlreadyExists(output));
        assert_eq!(muxer.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_manifest_is_no_segments() {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/720.mp4:hls:manifest.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .expect(1)
            .mount(&server)
            .await;

        let muxer = Arc::new(StubMuxer::default());
        let downloader = SegmentDownloader::new(config(&tmp), resolver_for(&server))
            .unwrap()
            .with_muxer(muxer.clone());

        let outcome = downloader.download(&request(&tmp)).await.unwrap();

        assert_eq!(outcome, DownloadOutcome::NoSegments);
        assert_eq!(muxer.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_link_is_a_resolve_error() {
        let tmp = TempDir::new().unwrap();
        let downloader = SegmentDownloader::new(config(&tmp), Arc::new(StaticLinkResolver::new()))
            .unwrap()
            .with_muxer(Arc::new(StubMuxer::default()));

        let err = downloader.download(&request(&tmp)).await.unwrap_err();
        assert!(matches!(err, Error::Resolve(_)));
    }

    #[tokio::test]
    async fn output_defaults_to_working_directory() {
        let tmp = TempDir::new().unwrap();
        let downloader =
            SegmentDownloader::new(config(&tmp), Arc::new(StaticLinkResolver::new())).unwrap();
        let mut req = request(&tmp);
        req.output_dir = None;

        let key = CacheKey::for_request(&req);
        assert_eq!(
            downloader.output_path(&req),
            downloader.cache().working_dir_path(&key).join("ep1.mp4")
        );
    }

    #[tokio::test]
    async fn purge_removes_working_dir_and_emits_event() {
        let tmp = TempDir::new().unwrap();
        let downloader =
            SegmentDownloader::new(config(&tmp), Arc::new(StaticLinkResolver::new())).unwrap();
        let req = request(&tmp);
        let key = CacheKey::for_request(&req);
        downloader.cache().resolve_working_dir(&key).await.unwrap();
        let mut events = downloader.subscribe();

        downloader.purge(&req.cache_params()).await.unwrap();

        assert!(!downloader.cache().exists(&key).await);
        match events.recv().await.unwrap() {
            Event::CachePurged { key: purged } => assert_eq!(purged, key.to_string()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn purge_of_unknown_key_succeeds() {
        let tmp = TempDir::new().unwrap();
        let downloader =
            SegmentDownloader::new(config(&tmp), Arc::new(StaticLinkResolver::new())).unwrap();

        downloader
            .purge(&request(&tmp).cache_params())
            .await
            .unwrap();
    }
}
