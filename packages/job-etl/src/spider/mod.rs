//! Acquisition service.
//!
//! The [`Spider`] owns a [`ListingSource`] for its whole life, enumerates
//! listing summaries with a bounded worker pool, loads detail pages with the
//! same bound, and retries every request per [`SpiderConfig::retry`].
//!
//! Every enumerated summary ends up either as a detail or as a
//! [`FetchError`] attributed to it; nothing is dropped silently.

pub mod http;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FetchError, FetchResult};
use crate::retry::with_retry;
use crate::traits::source::ListingSource;
use crate::types::config::SpiderConfig;
use crate::types::listing::{
    ListingDetail, ListingFilter, ListingPage, ListingSelection, ListingSummary,
};
use crate::types::metrics::{FailureStage, SpiderMetrics, StageError};

pub use http::HttpListingSource;

#[derive(Default)]
struct SpiderStats {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    window: Mutex<SpiderWindow>,
}

#[derive(Default)]
struct SpiderWindow {
    started_at: Option<chrono::DateTime<Utc>>,
    finished_at: Option<chrono::DateTime<Utc>>,
    errors: Vec<StageError>,
}

/// Acquisition service over a listing source.
pub struct Spider<S: ListingSource> {
    source: S,
    config: SpiderConfig,
    stats: SpiderStats,
    closed: AtomicBool,
}

impl<S: ListingSource> Spider<S> {
    /// Take exclusive ownership of a source.
    pub fn new(source: S, config: SpiderConfig) -> Self {
        Self {
            source,
            config,
            stats: SpiderStats::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SpiderConfig {
        &self.config
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Enumerate summaries in posting order, stopping at `max_records`.
    pub async fn list_summaries(
        &self,
        max_records: Option<usize>,
    ) -> FetchResult<Vec<ListingSummary>> {
        self.list_matching(max_records, &ListingFilter::new()).await
    }

    /// Enumerate summaries that pass `filter`, stopping once `max_records`
    /// of them have been collected.
    pub async fn list_matching(
        &self,
        max_records: Option<usize>,
        filter: &ListingFilter,
    ) -> FetchResult<Vec<ListingSummary>> {
        Ok(self.select_listings(max_records, filter).await?.summaries)
    }

    /// Enumerate summaries that pass `filter`, recording the matching
    /// listings the cap left behind.
    ///
    /// Page 1 is fetched first to learn the page count; the rest are fetched
    /// by a worker pool of `config.concurrency` and consumed in page order.
    /// Once the cap is reached, paging continues only until one more
    /// matching listing has been seen. A page that still fails after retries
    /// fails the whole enumeration.
    pub async fn select_listings(
        &self,
        max_records: Option<usize>,
        filter: &ListingFilter,
    ) -> FetchResult<ListingSelection> {
        self.mark_started();
        let cap = max_records.filter(|m| *m > 0);
        let mut selection = ListingSelection::default();

        let first = self.fetch_page(1).await?;
        let total_pages = first.total_pages;
        collect_page(&mut selection, first, filter, cap);

        if !selection.is_truncated() && total_pages > 1 {
            let mut pages = stream::iter(2..=total_pages)
                .map(|page| self.fetch_page(page))
                .buffered(self.config.concurrency.max(1));

            while let Some(page) = pages.next().await {
                collect_page(&mut selection, page?, filter, cap);
                if selection.is_truncated() {
                    break;
                }
            }
        }

        info!(
            count = selection.summaries.len(),
            passed_over = selection.passed_over.len(),
            total_pages,
            "Enumerated listings"
        );
        Ok(selection)
    }

    async fn fetch_page(&self, page: u32) -> FetchResult<ListingPage> {
        let target = format!("page {}", page);
        let page_size = self.config.page_size;
        self.stats.total.fetch_add(1, Ordering::SeqCst);

        let result = with_retry(&self.config.retry, &target, || {
            self.source.fetch_page(page, page_size)
        })
        .await;

        match result {
            Ok(listing_page) => {
                self.stats.succeeded.fetch_add(1, Ordering::SeqCst);
                Ok(listing_page)
            }
            Err(failure) => {
                let error = exhausted(&target, failure.attempts, failure.error);
                self.record_error(FailureStage::Enumeration, &target, &error);
                Err(error)
            }
        }
    }

    /// Load one listing's detail page.
    ///
    /// Transient failures are retried; parse failures are reported at once.
    /// The returned error always carries the listing id.
    pub async fn fetch_detail(&self, summary: &ListingSummary) -> FetchResult<ListingDetail> {
        self.mark_started();
        self.stats.total.fetch_add(1, Ordering::SeqCst);

        let result = with_retry(&self.config.retry, &summary.id, || {
            self.source.fetch_detail(summary)
        })
        .await;

        match result {
            Ok(detail) => {
                self.stats.succeeded.fetch_add(1, Ordering::SeqCst);
                Ok(detail)
            }
            Err(failure) => {
                let error = exhausted(&summary.id, failure.attempts, failure.error);
                self.record_error(FailureStage::Fetch, &summary.id, &error);
                Err(error)
            }
        }
    }

    /// Load details for many summaries with the worker-pool bound.
    ///
    /// One result per summary, in input order.
    pub async fn fetch_details(
        &self,
        summaries: &[ListingSummary],
    ) -> Vec<FetchResult<ListingDetail>> {
        self.fetch_details_until(summaries, &CancellationToken::new())
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Like [`Spider::fetch_details`], but once `stop` is cancelled no new
    /// fetch starts. Fetches already running finish; the summaries never
    /// started come back as `None`.
    pub async fn fetch_details_until(
        &self,
        summaries: &[ListingSummary],
        stop: &CancellationToken,
    ) -> Vec<Option<FetchResult<ListingDetail>>> {
        stream::iter(summaries)
            .map(|summary| async move {
                if stop.is_cancelled() {
                    return None;
                }
                Some(self.fetch_detail(summary).await)
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// Snapshot of request totals and errors so far.
    pub fn metrics(&self) -> SpiderMetrics {
        let window = self.stats.window.lock().unwrap_or_else(PoisonError::into_inner);
        SpiderMetrics {
            total: self.stats.total.load(Ordering::SeqCst),
            succeeded: self.stats.succeeded.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            started_at: window.started_at,
            finished_at: window.finished_at,
            errors: window.errors.clone(),
        }
    }

    /// Release the source's session resource.
    ///
    /// Only the first call reaches the source; later calls are no-ops.
    pub async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Spider already cleaned up");
            return;
        }

        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Failed to close listing source");
        }

        self.stats
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished_at = Some(Utc::now());
        info!("Spider cleaned up");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mark_started(&self) {
        let mut window = self.stats.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.started_at.get_or_insert_with(Utc::now);
    }

    fn record_error(&self, stage: FailureStage, target: &str, error: &FetchError) {
        self.stats.failed.fetch_add(1, Ordering::SeqCst);
        self.stats
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .errors
            .push(StageError::new(stage, target, error.to_string()));
    }
}

impl<S: ListingSource> Drop for Spider<S> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!("Spider dropped without cleanup; listing source session was not closed");
        }
    }
}

/// Append matching items up to the cap; later matches are passed over.
fn collect_page(
    selection: &mut ListingSelection,
    page: ListingPage,
    filter: &ListingFilter,
    cap: Option<usize>,
) {
    for item in page.items {
        if !filter.matches(&item) {
            continue;
        }
        if cap.is_some_and(|c| selection.summaries.len() >= c) {
            selection.passed_over.push(item.last_modified());
        } else {
            selection.summaries.push(item);
        }
    }
}

/// Wrap a retried-to-exhaustion error; structural errors pass through.
fn exhausted(target: &str, attempts: u32, error: FetchError) -> FetchError {
    if error.is_transient() {
        FetchError::Exhausted {
            target: target.to_string(),
            attempts,
            source: Box::new(error),
        }
    } else {
        error
    }
}
