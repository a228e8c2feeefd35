//! Per-key working directories
//!
//! Each [`CacheKey`] owns one directory under the cache root, named by the
//! digest plus a `~` suffix. Inside it, a committed segment is stored as
//! `<index>.ts`; a fetch in progress writes to `<index>~.ts`. Only the
//! committed name counts as evidence that a segment is done.

use std::path::{Path, PathBuf};

use crate::cache_key::CacheKey;
use crate::error::Result;

/// Extension of committed and temporary segment files
pub const SEGMENT_EXTENSION: &str = "ts";

/// Marker appended to file stems that are still being written
pub const TEMP_MARKER: char = '~';

/// Name of the muxer input list written into the working directory
pub const INPUT_LIST_NAME: &str = "files.txt";

/// Owns the working directory lifecycle below a cache root
#[derive(Clone, Debug)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    /// Create a manager rooted at `root` (created lazily)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the working directory for `key`, without touching the filesystem
    pub fn working_dir_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}{}", key, TEMP_MARKER))
    }

    /// Working directory for `key`, created if absent
    pub async fn resolve_working_dir(&self, key: &CacheKey) -> Result<WorkingDir> {
        let path = self.working_dir_path(key);
        tokio::fs::create_dir_all(&path).await?;
        tracing::debug!(key = %key, path = ?path, "Working directory ready");
        Ok(WorkingDir::new(path))
    }

    /// Whether a working directory exists for `key`
    pub async fn exists(&self, key: &CacheKey) -> bool {
        tokio::fs::try_exists(self.working_dir_path(key))
            .await
            .unwrap_or(false)
    }

    /// Recursively remove the working directory for `key`
    ///
    /// A missing directory is not an error. Finished artifacts are never touched
    /// unless they were written inside the working directory.
    pub async fn purge(&self, key: &CacheKey) -> Result<()> {
        let path = self.working_dir_path(key);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                tracing::info!(key = %key, path = ?path, "Purged working directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %key, "Nothing to purge");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A working directory and its file naming scheme
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingDir {
    path: PathBuf,
}

impl WorkingDir {
    /// Wrap an existing directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed file for segment `index`
    pub fn segment_path(&self, index: u64) -> PathBuf {
        self.path.join(format!("{index}.{SEGMENT_EXTENSION}"))
    }

    /// In-progress file for segment `index`
    pub fn temp_segment_path(&self, index: u64) -> PathBuf {
        self.path
            .join(format!("{index}{TEMP_MARKER}.{SEGMENT_EXTENSION}"))
    }

    /// Muxer input list
    pub fn input_list_path(&self) -> PathBuf {
        self.path.join(INPUT_LIST_NAME)
    }

    /// Whether segment `index` has been committed
    pub async fn has_segment(&self, index: u64) -> bool {
        tokio::fs::try_exists(self.segment_path(index))
            .await
            .unwrap_or(false)
    }

    /// Committed segments, sorted numerically by index
    ///
    /// Temporary files and anything not named `<digits>.ts` are ignored.
    pub async fn completed_segments(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut segments = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(index) = parse_segment_name(&path)
                && entry.file_type().await?.is_file()
            {
                segments.push((index, path));
            }
        }

        segments.sort_by_key(|(index, _)| *index);
        Ok(segments)
    }
}

/// Index of a committed segment file name, or None for anything else
fn parse_segment_name(path: &Path) -> Option<u64> {
    if path.extension()? != SEGMENT_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
