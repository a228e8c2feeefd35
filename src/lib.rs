//! # segment-dl
//!
//! Resumable, parallel downloader for segmented streams.
//!
//! A stream's manifest lists numbered segments. segment-dl downloads them
//! concurrently into a per-request working directory, commits each one with a
//! temp-to-final rename, and hands the complete, numerically ordered set to an
//! external muxer (ffmpeg). The muxed file is written under a temporary name and
//! renamed into place, so the output path never holds a partial file.
//!
//! ## Design Philosophy
//!
//! - **Resumable** - committed segments survive restarts and are never refetched
//! - **Atomic outputs** - segments and artifacts only appear under their final names when complete
//! - **Injected policy** - retry behavior, concurrency, manifest dialect and muxer are all pluggable
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use segment_dl::{
//!     Config, DownloadRequest, IdNamespace, SegmentDownloader, StaticLinkResolver, StreamLink,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = StaticLinkResolver::new().with_link(
//!         "20",
//!         IdNamespace::Shikimori,
//!         1,
//!         "610",
//!         StreamLink::new("//cdn.example/useruploads/abc/"),
//!     );
//!     let downloader = SegmentDownloader::new(Config::default(), Arc::new(resolver))?;
//!
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let mut request = DownloadRequest::new("20", IdNamespace::Shikimori, 1, "610", "episode-1");
//!     request.output_dir = Some("videos".into());
//!     let outcome = downloader.download(&request).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Segment assembly and output promotion
pub mod assembler;
/// Working directory lifecycle
pub mod cache;
/// Cache key derivation
pub mod cache_key;
/// Configuration types
pub mod config;
/// Parallel segment download coordinator
pub mod coordinator;
/// End-to-end download pipeline
pub mod downloader;
/// Error types
pub mod error;
/// Request-level retry and translation fallback
pub mod fallback;
/// Single-segment HTTP fetch
pub mod fetcher;
/// Manifest location, fetch and parsing
pub mod manifest;
/// External muxer invocation
pub mod muxer;
/// Retry logic with an injected policy
pub mod retry;
/// Stream link resolution interface
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use assembler::Assembler;
pub use cache::{CacheManager, WorkingDir};
pub use cache_key::CacheKey;
pub use config::{CacheConfig, Config, DownloadConfig, RetryConfig, ToolsConfig};
pub use coordinator::SegmentCoordinator;
pub use downloader::SegmentDownloader;
pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use fallback::{FallbackRequest, download_with_fallback};
pub use fetcher::{HttpSegmentFetcher, SegmentFetcher};
pub use manifest::{ManifestLocation, ManifestParser, PairedLineParser};
pub use muxer::{FfmpegMuxer, MuxJob, Muxer};
pub use retry::{IsRetryable, RetryClass};
pub use source::{LinkResolver, StaticLinkResolver, StreamLink, TranslationInfo, TranslationKind};
pub use types::{
    BatchReport, CacheParams, DownloadOutcome, DownloadRequest, Event, IdNamespace, Quality,
    SegmentRef,
};
