//! Request-level retry and translation fallback
//!
//! [`download_with_fallback`] walks a title's translations in the order the
//! resolver reports them. Each candidate is downloaded under
//! `Config::request_retry`. A candidate whose manifest is empty has its working
//! directory purged; one that still fails keeps its committed segments for a
//! later resume. Either way the next candidate is tried.

use crate::downloader::SegmentDownloader;
use crate::error::{Error, Result};
use crate::retry::download_with_retry;
use crate::source::{TranslationInfo, TranslationKind};
use crate::types::{DownloadOutcome, DownloadRequest};

/// What to download, with the translation left open
#[derive(Clone, Debug)]
pub struct FallbackRequest {
    /// Request template; its `translation_id` is replaced by each candidate
    pub base: DownloadRequest,
    /// Only consider translations of this kind (None = all)
    pub preferred_kind: Option<TranslationKind>,
}

impl FallbackRequest {
    /// Fallback over dubbed translations only
    pub fn dubbed(base: DownloadRequest) -> Self {
        Self {
            base,
            preferred_kind: Some(TranslationKind::Dub),
        }
    }
}

/// Download `request`, falling back across translations
///
/// # Errors
///
/// - [`Error::NoTranslations`] when no translation matches `preferred_kind`
/// - The last candidate's error when every candidate fails
///
/// Returns [`DownloadOutcome::NoSegments`] when every candidate's manifest was empty.
pub async fn download_with_fallback(
    downloader: &SegmentDownloader,
    request: &FallbackRequest,
) -> Result<DownloadOutcome> {
    let base = &request.base;
    let candidates: Vec<TranslationInfo> = downloader
        .available_translations(&base.identifier, base.namespace)
        .await?
        .into_iter()
        .filter(|t| request.preferred_kind.is_none_or(|kind| t.kind == kind))
        .collect();

    if candidates.is_empty() {
        return Err(Error::NoTranslations(format!(
            "{}:{} has no {} translation",
            base.namespace,
            base.identifier,
            request
                .preferred_kind
                .map(|k| format!("{k:?}").to_lowercase())
                .unwrap_or_else(|| "usable".to_string()),
        )));
    }

    let retry = &downloader.config().request_retry;
    let mut last_error = None;

    for (position, translation) in candidates.iter().enumerate() {
        let attempt = base.with_translation(&translation.id);
        tracing::info!(
            identifier = %base.identifier,
            translation = %translation.id,
            name = %translation.name,
            candidate = position + 1,
            candidates = candidates.len(),
            "Trying translation"
        );

        let attempt_ref = &attempt;
        let result = download_with_retry(retry, move || downloader.download(attempt_ref)).await;

        match result {
            Ok(outcome @ (DownloadOutcome::Completed(_) | DownloadOutcome::AlreadyExists(_))) => {
                if downloader.config().download.purge_on_success {
                    if attempt.output_dir.is_some() {
                        purge_quietly(downloader, &attempt).await;
                    } else {
                        tracing::debug!("Artifact lives in the working directory, keeping it");
                    }
                }
                return Ok(outcome);
            }
            Ok(DownloadOutcome::NoSegments) => {
                tracing::warn!(translation = %translation.id, "Translation has no segments");
                purge_quietly(downloader, &attempt).await;
            }
            Err(e) => {
                tracing::warn!(
                    translation = %translation.id,
                    error = %e,
                    "Translation failed, keeping its segments"
                );
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok(DownloadOutcome::NoSegments),
    }
}

async fn purge_quietly(downloader: &SegmentDownloader, request: &DownloadRequest) {
    if let Err(e) = downloader.purge(&request.cache_params()).await {
        tracing::warn!(error = %e, "Failed to purge working directory");
    }
}
