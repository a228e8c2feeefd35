//! Parallel segment download with per-segment commit
//!
//! [`SegmentCoordinator::download_all`] fills a [`WorkingDir`] with committed
//! segment files:
//!
//! 1. If the finished artifact already exists, nothing is examined or fetched.
//! 2. Segments whose committed file exists are skipped.
//! 3. Every other segment is fetched into its temporary slot by a spawned task,
//!    under the injected [`RetryConfig`] and an optional concurrency cap.
//! 4. Results are consumed in completion order; each success is renamed from
//!    its temporary name to its committed name.
//! 5. The first failure, or the batch deadline (`timeout_per_segment` times the
//!    number of segments), ends the call. Tasks still running are detached, not
//!    aborted, and their results are discarded.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use url::Url;

use crate::cache::WorkingDir;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::fetcher::SegmentFetcher;
use crate::retry::download_with_retry;
use crate::types::{BatchReport, Event, SegmentRef};

/// Fans segment fetches out over spawned tasks and commits the results
#[derive(Clone)]
pub struct SegmentCoordinator {
    fetcher: Arc<dyn SegmentFetcher>,
    retry: Arc<RetryConfig>,
    max_concurrency: Option<usize>,
    event_tx: Option<broadcast::Sender<Event>>,
}

/// Everything one spawned fetch task owns
struct FetchJob {
    fetcher: Arc<dyn SegmentFetcher>,
    retry: Arc<RetryConfig>,
    url: Url,
    temp_path: PathBuf,
    timeout: Duration,
    permits: Option<Arc<Semaphore>>,
}

impl SegmentCoordinator {
    /// Coordinator with one task per segment and no event channel
    pub fn new(fetcher: Arc<dyn SegmentFetcher>, retry: RetryConfig) -> Self {
        Self {
            fetcher,
            retry: Arc::new(retry),
            max_concurrency: None,
            event_tx: None,
        }
    }

    /// Cap the number of fetches running at once (None = unbounded)
    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Emit per-segment events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // No subscribers is fine
            tx.send(event).ok();
        }
    }

    /// Download every segment not yet committed in `dir`
    ///
    /// # Errors
    ///
    /// - The first fetch failure that the retry policy gives up on
    /// - [`Error::BatchTimeout`] when the aggregate deadline passes
    /// - [`Error::Io`] when a stale temp file cannot be removed or a rename fails
    pub async fn download_all(
        &self,
        segments: &[SegmentRef],
        dir: &WorkingDir,
        artifact: &Path,
        timeout_per_segment: Duration,
    ) -> Result<BatchReport> {
        let mut report = BatchReport {
            total: segments.len(),
            ..BatchReport::default()
        };

        if tokio::fs::try_exists(artifact).await? {
            tracing::debug!(artifact = ?artifact, "Artifact exists, skipping segment batch");
            report.artifact_present = true;
            return Ok(report);
        }

        let permits = self
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let mut seen = HashSet::with_capacity(segments.len());
        let mut pending = FuturesUnordered::new();

        for segment in segments {
            if !seen.insert(segment.index) {
                tracing::debug!(segment = segment.index, "Duplicate segment index in manifest");
                continue;
            }

            let final_path = dir.segment_path(segment.index);
            if tokio::fs::try_exists(&final_path).await? {
                report.skipped += 1;
                self.emit(Event::SegmentSkipped {
                    index: segment.index,
                });
                continue;
            }

            let temp_path = dir.temp_segment_path(segment.index);
            remove_stale(&temp_path).await?;

            let job = FetchJob {
                fetcher: Arc::clone(&self.fetcher),
                retry: Arc::clone(&self.retry),
                url: segment.url.clone(),
                temp_path: temp_path.clone(),
                timeout: timeout_per_segment,
                permits: permits.clone(),
            };
            let handle = tokio::spawn(run_fetch(job));
            let index = segment.index;
            pending.push(async move { (index, temp_path, final_path, handle.await) });
        }

        let scheduled = pending.len();
        if scheduled == 0 {
            tracing::info!(
                total = report.total,
                skipped = report.skipped,
                "All segments already downloaded"
            );
            return Ok(report);
        }

        let segment_count = u32::try_from(segments.len()).unwrap_or(u32::MAX);
        let budget = timeout_per_segment.saturating_mul(segment_count);
        let deadline = tokio::time::Instant::now().checked_add(budget);

        tracing::info!(
            scheduled,
            skipped = report.skipped,
            budget_secs = budget.as_secs(),
            "Downloading segments"
        );

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let dropped = pending.len();
                        tracing::warn!(
                            completed = report.downloaded,
                            dropped,
                            "Segment batch deadline exceeded"
                        );
                        return Err(Error::BatchTimeout {
                            timeout: budget,
                            completed: report.downloaded,
                            dropped,
                        });
                    }
                },
                None => pending.next().await,
            };

            let Some((index, temp_path, final_path, joined)) = next else {
                break;
            };

            let bytes = match joined {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    tracing::error!(segment = index, error = %e, "Segment download failed");
                    return Err(e);
                }
                Err(join_err) => {
                    return Err(Error::Other(format!(
                        "segment {index} task panicked: {join_err}"
                    )));
                }
            };

            tokio::fs::rename(&temp_path, &final_path).await?;
            report.downloaded += 1;
            report.bytes += bytes;

            tracing::debug!(
                segment = index,
                bytes,
                completed = report.downloaded,
                total = scheduled,
                "Segment committed"
            );
            self.emit(Event::SegmentCompleted {
                index,
                bytes,
                completed: report.downloaded,
                total: scheduled,
            });
        }

        Ok(report)
    }
}

/// Fetch one segment into its temporary slot under the retry policy
async fn run_fetch(job: FetchJob) -> Result<u64> {
    let FetchJob {
        fetcher,
        retry,
        url,
        temp_path,
        timeout,
        permits,
    } = job;

    let _permit = match permits {
        Some(semaphore) => Some(
            semaphore
                .acquire_owned()
                .await
                .map_err(|e| Error::Other(format!("segment pool closed: {e}")))?,
        ),
        None => None,
    };

    // A failed fetch leaves its temporary slot alone: the task may have been
    // detached, and a later batch for the same key may own that slot by now.
    download_with_retry(&retry, || {
        let fetcher = Arc::clone(&fetcher);
        let url = url.clone();
        let temp_path = temp_path.clone();
        async move { fetcher.fetch(&url, &temp_path, timeout).await }
    })
    .await
}

async fn remove_stale(temp_path: &Path) -> Result<()> {
    match tokio::fs::remove_file(temp_path).await {
        Ok(()) => {
            tracing::debug!(path = ?temp_path, "Removed stale temporary segment");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
