//! The public entry point: chapter discovery, title metadata, and page
//! image discovery with retries, a per-attempt deadline and downloads.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chapters;
use crate::config::EngineConfig;
use crate::coordinator::{CoordinatorOutcome, ExtractionCoordinator};
use crate::document::DocumentQuery;
use crate::download::{DecodedImage, Downloader, HttpClient, ImageCache, ImageFetcher};
use crate::metadata;
use crate::progress::{ProgressEmitter, ProgressEventKind, ProgressSender};
use crate::retry::RetryManager;
use crate::types::{
    ChapterList, EngineResult, ExtractionError, RankedImageSet, TitleMetadata,
};

/// How long a timed-out attempt may take to wind down after its token fires.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Result of a page discovery request.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub request_id: String,
    pub ranked: RankedImageSet,
    /// Decoded images in ranked order. Empty for ranking-only requests.
    pub images: Vec<Arc<DecodedImage>>,
    /// `(url, reason)` for ranked images that were not kept.
    pub skipped: Vec<(String, String)>,
    pub escalated: bool,
    /// The caller's token fired; results are partial.
    pub cancelled: bool,
    /// The attempt deadline expired; results are partial.
    pub timed_out: bool,
    /// Attempt number that produced this outcome.
    pub attempt: u32,
}

/// Engine facade owning configuration, the fetcher and the image cache.
pub struct PagePipeline {
    config: EngineConfig,
    fetcher: Arc<dyn ImageFetcher>,
    cache: ImageCache,
    progress: Option<ProgressSender>,
}

impl PagePipeline {
    /// A pipeline fetching over HTTP with the configured user agent.
    pub fn new(config: EngineConfig) -> Self {
        let fetcher = Arc::new(HttpClient::new(&config.user_agent));
        Self::with_fetcher(config, fetcher)
    }

    pub fn with_fetcher(config: EngineConfig, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            config,
            fetcher,
            cache: ImageCache::new(),
            progress: None,
        }
    }

    /// Broadcast progress events to `tx`.
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Drop every cached image.
    pub fn reset(&self) {
        self.cache.reset();
    }

    /// Chapter links on a title page, dated against the local clock.
    pub async fn discover_chapters(&self, doc: &dyn DocumentQuery) -> ChapterList {
        self.discover_chapters_at(doc, chrono::Local::now().naive_local())
            .await
    }

    /// Chapter links on a title page, dated against `now`.
    pub async fn discover_chapters_at(
        &self,
        doc: &dyn DocumentQuery,
        now: NaiveDateTime,
    ) -> ChapterList {
        chapters::discover_chapters(doc, now).await
    }

    pub async fn extract_metadata(&self, doc: &dyn DocumentQuery) -> Option<TitleMetadata> {
        metadata::extract_metadata(doc).await
    }

    /// Ranked page-image URLs without downloading anything.
    pub async fn rank_pages(
        &self,
        doc: &dyn DocumentQuery,
        token: &CancellationToken,
    ) -> EngineResult<PageOutcome> {
        self.run_attempts(doc, token, false).await
    }

    /// Ranked page images, fetched and decoded.
    pub async fn discover_pages(
        &self,
        doc: &dyn DocumentQuery,
        token: &CancellationToken,
    ) -> EngineResult<PageOutcome> {
        self.run_attempts(doc, token, true).await
    }

    async fn run_attempts(
        &self,
        doc: &dyn DocumentQuery,
        token: &CancellationToken,
        download: bool,
    ) -> EngineResult<PageOutcome> {
        let request_id = format!("pages-{}", uuid::Uuid::new_v4());
        let progress = ProgressEmitter::new(self.progress.clone(), request_id.clone());
        let retry = RetryManager::new(self.config.max_attempts, self.config.retry_base_delay());
        let deadline = self.config.attempt_timeout();

        info!("[{}] page discovery started", request_id);
        let result = retry
            .run(token, |attempt| {
                progress.emit(ProgressEventKind::AttemptStarted {
                    attempt,
                    max_attempts: retry.max_attempts(),
                });
                let progress = progress.clone();
                let request_id = request_id.clone();
                async move {
                    let mut outcome = with_deadline(token, deadline, |attempt_token| async move {
                        self.attempt(doc, &attempt_token, &progress, download).await
                    })
                    .await?;
                    outcome.request_id = request_id;
                    outcome.attempt = attempt;
                    Ok(outcome)
                }
            })
            .await;

        match &result {
            Ok(outcome) => info!(
                "[{}] {} ranked, {} decoded on attempt {}",
                outcome.request_id,
                outcome.ranked.len(),
                outcome.images.len(),
                outcome.attempt
            ),
            Err(e) => warn!("[{}] page discovery failed: {}", request_id, e),
        }
        result
    }

    /// One attempt: coordinate, then optionally download.
    ///
    /// Cancellation after ranking keeps the ranked set even when nothing
    /// was downloaded yet.
    async fn attempt(
        &self,
        doc: &dyn DocumentQuery,
        token: &CancellationToken,
        progress: &ProgressEmitter,
        download: bool,
    ) -> EngineResult<PageOutcome> {
        let coordinator = ExtractionCoordinator::from_config(&self.config);
        let CoordinatorOutcome {
            ranked,
            escalated,
            cancelled,
            ..
        } = coordinator.run(doc, token, progress).await?;

        let mut outcome = PageOutcome {
            request_id: String::new(),
            ranked,
            images: Vec::new(),
            skipped: Vec::new(),
            escalated,
            cancelled,
            timed_out: false,
            attempt: 0,
        };
        if !download {
            return Ok(outcome);
        }

        let downloader = Downloader {
            fetcher: self.fetcher.as_ref(),
            cache: &self.cache,
            timeout: self.config.fetch_timeout(),
            logo_max_width: self.config.logo_max_width,
            logo_max_height: self.config.logo_max_height,
        };
        match downloader.download_all(&outcome.ranked, token, progress).await {
            Ok(fetched) => {
                outcome.images = fetched.images;
                outcome.skipped = fetched.skipped;
                outcome.cancelled |= fetched.cancelled;
                Ok(outcome)
            }
            Err(ExtractionError::Cancelled) => {
                outcome.cancelled = true;
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }
}

/// Run `attempt` under a child of `token`, cancelling it when `deadline`
/// expires.
///
/// A timed-out attempt gets a short grace period to return what it has.
/// Partial results are kept and flagged; an empty one becomes `Timeout`.
async fn with_deadline<F, Fut>(
    token: &CancellationToken,
    deadline: Duration,
    attempt: F,
) -> EngineResult<PageOutcome>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = EngineResult<PageOutcome>>,
{
    let child = token.child_token();
    let fut = attempt(child.clone());
    tokio::pin!(fut);

    tokio::select! {
        res = &mut fut => res,
        _ = tokio::time::sleep(deadline) => {
            warn!("Attempt exceeded {:?}, cancelling", deadline);
            child.cancel();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut fut).await {
                Ok(Ok(mut partial)) if !partial.ranked.is_empty() && !token.is_cancelled() => {
                    partial.cancelled = false;
                    partial.timed_out = true;
                    Ok(partial)
                }
                Ok(Ok(partial)) => Ok(partial),
                Ok(Err(ExtractionError::Cancelled)) if !token.is_cancelled() => {
                    Err(ExtractionError::Timeout(deadline))
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ExtractionError::Timeout(deadline)),
            }
        }
    }
}
