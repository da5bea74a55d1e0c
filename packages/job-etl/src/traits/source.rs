//! Listing source trait - the transport behind the spider.

use async_trait::async_trait;

use crate::error::FetchResult;
use crate::types::listing::{ListingDetail, ListingPage, ListingSummary};

/// A paginated listings feed with per-listing detail pages.
///
/// Implementations own whatever session resource they need (HTTP client,
/// browser automation handle). The spider calls [`ListingSource::close`]
/// exactly once when it is done with the source.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch one page of summaries, 1-based, in posting order.
    async fn fetch_page(&self, page: u32, page_size: u32) -> FetchResult<ListingPage>;

    /// Load and parse the detail page for one listing.
    async fn fetch_detail(&self, summary: &ListingSummary) -> FetchResult<ListingDetail>;

    /// Release the session resource.
    async fn close(&self) -> FetchResult<()> {
        Ok(())
    }
}
