//! Core types for segment-dl

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

use crate::error::Error;

/// Catalog a title identifier belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdNamespace {
    /// Shikimori catalog id
    Shikimori,
    /// Kinopoisk catalog id
    Kinopoisk,
}

impl IdNamespace {
    /// Wire name of the namespace, as used in cache keys and resolver lookups
    pub fn as_str(&self) -> &'static str {
        match self {
            IdNamespace::Shikimori => "shikimori",
            IdNamespace::Kinopoisk => "kinopoisk",
        }
    }
}

impl fmt::Display for IdNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdNamespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shikimori" | "sh" => Ok(IdNamespace::Shikimori),
            "kinopoisk" | "kp" => Ok(IdNamespace::Kinopoisk),
            other => Err(Error::Other(format!("unknown id namespace: {other}"))),
        }
    }
}

/// Quality tier of a stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    /// 480p
    #[serde(rename = "480")]
    P480,
    /// 720p
    #[default]
    #[serde(rename = "720")]
    P720,
    /// 1080p
    #[serde(rename = "1080")]
    P1080,
}

impl Quality {
    /// Manifest suffix for this tier ("480", "720", "1080")
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::P480 => "480",
            Quality::P720 => "720",
            Quality::P1080 => "1080",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches('p') {
            "480" => Ok(Quality::P480),
            "720" => Ok(Quality::P720),
            "1080" => Ok(Quality::P1080),
            other => Err(Error::Other(format!("unsupported quality: {other}"))),
        }
    }
}

/// The parameters that determine which bytes are fetched
///
/// Everything a [`CacheKey`](crate::cache_key::CacheKey) is derived from, and
/// nothing else. Used directly for cache purges.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheParams {
    /// Title identifier within its namespace
    pub identifier: String,
    /// Namespace of `identifier`
    pub namespace: IdNamespace,
    /// Translation / audio track identifier
    pub translation_id: String,
    /// Episode number
    pub episode: u32,
    /// Quality tier
    pub quality: Quality,
}

/// One download: what to fetch plus how to assemble it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Title identifier within its namespace
    pub identifier: String,
    /// Namespace of `identifier`
    pub namespace: IdNamespace,
    /// Episode number
    pub episode: u32,
    /// Translation / audio track identifier
    pub translation_id: String,
    /// Quality tier
    #[serde(default)]
    pub quality: Quality,
    /// Directory for the final artifact (working directory when None)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Artifact base name, without extension
    pub output_name: String,
    /// Re-encode to this frame rate instead of stream-copying
    #[serde(default)]
    pub frame_rate: Option<f64>,
    /// Keep the audio track (default: true)
    #[serde(default = "default_true")]
    pub include_audio: bool,
}

fn default_true() -> bool {
    true
}

impl DownloadRequest {
    /// Create a request with stream-copy assembly, audio kept, 720p
    pub fn new(
        identifier: impl Into<String>,
        namespace: IdNamespace,
        episode: u32,
        translation_id: impl Into<String>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            namespace,
            episode,
            translation_id: translation_id.into(),
            quality: Quality::default(),
            output_dir: None,
            output_name: output_name.into(),
            frame_rate: None,
            include_audio: true,
        }
    }

    /// The subset of fields that selects the fetched bytes
    pub fn cache_params(&self) -> CacheParams {
        CacheParams {
            identifier: self.identifier.clone(),
            namespace: self.namespace,
            translation_id: self.translation_id.clone(),
            episode: self.episode,
            quality: self.quality,
        }
    }

    /// Same request for a different translation
    pub fn with_translation(&self, translation_id: impl Into<String>) -> Self {
        Self {
            translation_id: translation_id.into(),
            ..self.clone()
        }
    }
}

/// One segment reference from a manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentRef {
    /// Absolute segment URL
    pub url: Url,
    /// Sequence index taken from the manifest (not necessarily contiguous)
    pub index: u64,
}

/// Result of a [`SegmentDownloader::download`](crate::SegmentDownloader::download) call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Artifact was produced at this path
    Completed(PathBuf),
    /// Artifact already existed; nothing was fetched or muxed
    AlreadyExists(PathBuf),
    /// The manifest listed no segments
    NoSegments,
}

impl DownloadOutcome {
    /// Artifact path, if one exists
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            DownloadOutcome::Completed(p) | DownloadOutcome::AlreadyExists(p) => Some(p),
            DownloadOutcome::NoSegments => None,
        }
    }
}

/// Summary of one coordinator batch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Segments in the manifest
    pub total: usize,
    /// Segments whose final file already existed
    pub skipped: usize,
    /// Segments fetched in this batch
    pub downloaded: usize,
    /// Bytes written by this batch
    pub bytes: u64,
    /// The artifact existed, so nothing was examined
    pub artifact_present: bool,
}

/// Event emitted during a download
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Artifact already exists, pipeline skipped
    AlreadyAssembled {
        /// Existing artifact path
        output: PathBuf,
    },

    /// Manifest fetched and parsed
    ManifestParsed {
        /// Number of segments listed
        segments: usize,
    },

    /// Segment already on disk
    SegmentSkipped {
        /// Segment index
        index: u64,
    },

    /// Segment fetched and committed
    SegmentCompleted {
        /// Segment index
        index: u64,
        /// Bytes written
        bytes: u64,
        /// Segments committed so far in this batch
        completed: usize,
        /// Segments scheduled in this batch
        total: usize,
    },

    /// Muxer started
    Assembling {
        /// Number of segment files handed to the muxer
        segments: usize,
    },

    /// Artifact promoted to its final path
    Complete {
        /// Artifact path
        output: PathBuf,
    },

    /// Download failed
    Failed {
        /// Error description
        error: String,
    },

    /// Working directory removed
    CachePurged {
        /// Cache key of the removed directory
        key: String,
    },
}
