//! Testing utilities including mock implementations.
//!
//! These let applications exercise the pipeline without a real listings
//! feed, model provider or database. Every mock is cheap to clone and clones
//! share state, so a test can hand one copy to the pipeline and keep another
//! for assertions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{FetchError, FetchResult, ProviderError, ProviderResult};
use crate::traits::{
    ai::{
        ClassificationRequest, EmbeddingModel, LanguageModel, RawCapabilityMatch,
        RawClassification,
    },
    source::ListingSource,
};
use crate::types::{
    catalog::{CapabilityDefinition, TaxonomyGroup},
    listing::{Contact, ListingDetail, ListingPage, ListingSummary},
};

const ORGANISATIONS: [&str; 3] = ["Treasury", "Health", "Education"];
const LOCATIONS: [&str; 2] = ["Sydney", "Parramatta"];

/// Posting time of the first generated listing.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

/// Generated listing `index`: posted and modified `index` hours after
/// [`base_time`].
pub fn sample_summary(index: usize) -> ListingSummary {
    let at = base_time() + chrono::Duration::hours(index as i64);
    ListingSummary::new(
        format!("JOB-{}", index),
        format!("Data Analyst {}", index),
        ORGANISATIONS[index % ORGANISATIONS.len()],
        at,
    )
    .with_location(LOCATIONS[index % LOCATIONS.len()])
    .with_modified_at(at)
}

/// A detail page for `summary` with a short description.
pub fn detail_for(summary: &ListingSummary) -> ListingDetail {
    let mut detail = ListingDetail::new(
        summary.clone(),
        format!("{} works with data across {}.", summary.title, summary.organisation),
    )
    .with_responsibilities(["Build reports", "Clean datasets"])
    .with_requirements(["SQL", "Clear written communication"]);
    detail.contact = Some(Contact {
        name: Some("Hiring Manager".into()),
        email: Some("jobs@example.gov".into()),
        phone: None,
    });
    detail
}

/// Detail for a listing id, with the summary fields generated.
pub fn sample_detail(id: &str) -> ListingDetail {
    let summary = ListingSummary::new(id, format!("Analyst {}", id), "Treasury", base_time())
        .with_location("Sydney");
    detail_for(&summary)
}

/// Catalog of `n` capabilities `cap-0..cap-{n-1}` with no embeddings.
pub fn sample_catalog(n: usize) -> Vec<CapabilityDefinition> {
    (0..n)
        .map(|i| {
            CapabilityDefinition::new(
                format!("cap-{}", i),
                format!("Capability {}", i),
                format!("Demonstrates behaviour {} at work", i),
                if i % 2 == 0 { "Results" } else { "Relationships" },
            )
        })
        .collect()
}

/// Two taxonomy groups: `grp-data` and `grp-people`.
pub fn sample_groups() -> Vec<TaxonomyGroup> {
    vec![
        TaxonomyGroup::new("grp-data", "Data and analytics")
            .with_description("Working with data, reporting and analysis"),
        TaxonomyGroup::new("grp-people", "People and communication"),
    ]
}

// ============================================================================
// Listing source
// ============================================================================

#[derive(Default)]
struct SourceState {
    listings: Vec<ListingSummary>,
    failing_pages: HashSet<u32>,
    flaky_details: HashMap<String, u32>,
    failing_details: HashSet<String>,
    malformed_details: HashSet<String>,
    detail_delay: Option<Duration>,
    page_calls: usize,
    detail_calls: HashMap<String, usize>,
    close_calls: usize,
}

/// A mock listings feed backed by an in-memory list.
///
/// Pages are sliced from the list with the requested page size. Failures
/// can be injected per page or per listing.
#[derive(Clone, Default)]
pub struct MockListingSource {
    state: Arc<RwLock<SourceState>>,
}

impl MockListingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed of `n` generated listings, see [`sample_summary`].
    pub fn with_listings(n: usize) -> Self {
        Self::new().with_summaries((0..n).map(sample_summary))
    }

    pub fn with_summaries(self, summaries: impl IntoIterator<Item = ListingSummary>) -> Self {
        self.state.write().unwrap().listings.extend(summaries);
        self
    }

    /// Every fetch of `page` answers 503.
    pub fn failing_page(self, page: u32) -> Self {
        self.state.write().unwrap().failing_pages.insert(page);
        self
    }

    /// The first `failures` fetches of the listing fail with a transport error.
    pub fn flaky_detail(self, id: impl Into<String>, failures: u32) -> Self {
        self.state
            .write()
            .unwrap()
            .flaky_details
            .insert(id.into(), failures);
        self
    }

    /// Every fetch of the listing fails with a transport error.
    pub fn failing_detail(self, id: impl Into<String>) -> Self {
        self.state.write().unwrap().failing_details.insert(id.into());
        self
    }

    /// The listing's detail page is missing a required field.
    pub fn malformed_detail(self, id: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap()
            .malformed_details
            .insert(id.into());
        self
    }

    /// Sleep before answering each detail fetch.
    pub fn with_detail_delay(self, delay: Duration) -> Self {
        self.state.write().unwrap().detail_delay = Some(delay);
        self
    }

    pub fn page_calls(&self) -> usize {
        self.state.read().unwrap().page_calls
    }

    pub fn detail_calls(&self, id: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .detail_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_detail_calls(&self) -> usize {
        self.state.read().unwrap().detail_calls.values().sum()
    }

    pub fn close_calls(&self) -> usize {
        self.state.read().unwrap().close_calls
    }
}

#[async_trait]
impl ListingSource for MockListingSource {
    async fn fetch_page(&self, page: u32, page_size: u32) -> FetchResult<ListingPage> {
        let mut state = self.state.write().unwrap();
        state.page_calls += 1;

        if state.failing_pages.contains(&page) {
            return Err(FetchError::Status {
                target: format!("page {}", page),
                status: 503,
            });
        }

        let size = page_size.max(1) as usize;
        let total_pages = state.listings.len().div_ceil(size).max(1) as u32;
        let start = (page.saturating_sub(1) as usize) * size;
        let items = state
            .listings
            .iter()
            .skip(start)
            .take(size)
            .cloned()
            .collect();

        Ok(ListingPage {
            page,
            total_pages,
            items,
        })
    }

    async fn fetch_detail(&self, summary: &ListingSummary) -> FetchResult<ListingDetail> {
        let delay = {
            let mut state = self.state.write().unwrap();
            *state.detail_calls.entry(summary.id.clone()).or_default() += 1;
            state.detail_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        if state.malformed_details.contains(&summary.id) {
            return Err(FetchError::Parse {
                target: summary.id.clone(),
                message: "missing field `description`".into(),
            });
        }
        if state.failing_details.contains(&summary.id) {
            return Err(FetchError::Http {
                target: summary.id.clone(),
                message: "connection reset".into(),
            });
        }
        if let Some(remaining) = state.flaky_details.get_mut(&summary.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError::Http {
                    target: summary.id.clone(),
                    message: "connection reset".into(),
                });
            }
        }

        Ok(detail_for(summary))
    }

    async fn close(&self) -> FetchResult<()> {
        self.state.write().unwrap().close_calls += 1;
        Ok(())
    }
}

// ============================================================================
// Language model
// ============================================================================

#[derive(Default)]
struct LanguageModelState {
    responses: HashMap<String, RawClassification>,
    failures: HashMap<String, ProviderError>,
    flaky: HashMap<String, (u32, ProviderError)>,
    delay: Option<Duration>,
    requests: Vec<ClassificationRequest>,
}

/// A mock language model with per-listing responses and failures.
///
/// Listings without a configured response get [`default_classification`].
#[derive(Clone, Default)]
pub struct MockLanguageModel {
    state: Arc<RwLock<LanguageModelState>>,
}

/// Answer the mock gives when nothing else is configured.
///
/// References `cap-0`, `cap-1` and the `grp-data` group, so it resolves
/// against [`sample_catalog`] and [`sample_groups`].
pub fn default_classification() -> RawClassification {
    RawClassification {
        capabilities: vec![
            RawCapabilityMatch {
                capability_id: "cap-0".into(),
                level: "adept".into(),
                relevance: 0.9,
            },
            RawCapabilityMatch {
                capability_id: "cap-1".into(),
                level: "intermediate".into(),
                relevance: 0.6,
            },
        ],
        technical_skills: vec!["SQL".into(), "Data analysis".into()],
        soft_skills: vec!["Communication".into()],
        taxonomy_groups: vec!["Data and analytics".into()],
    }
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, listing_id: impl Into<String>, response: RawClassification) -> Self {
        self.state
            .write()
            .unwrap()
            .responses
            .insert(listing_id.into(), response);
        self
    }

    /// Every call for the listing fails with `error`.
    pub fn failing_for(self, listing_id: impl Into<String>, error: ProviderError) -> Self {
        self.state
            .write()
            .unwrap()
            .failures
            .insert(listing_id.into(), error);
        self
    }

    /// The first `failures` calls for the listing fail with `error`.
    pub fn flaky_for(
        self,
        listing_id: impl Into<String>,
        failures: u32,
        error: ProviderError,
    ) -> Self {
        self.state
            .write()
            .unwrap()
            .flaky
            .insert(listing_id.into(), (failures, error));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.write().unwrap().delay = Some(delay);
        self
    }

    /// Every request received, in call order.
    pub fn requests(&self) -> Vec<ClassificationRequest> {
        self.state.read().unwrap().requests.clone()
    }

    pub fn calls_for(&self, listing_id: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.listing_id == listing_id)
            .count()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn classify(&self, request: &ClassificationRequest) -> ProviderResult<RawClassification> {
        let delay = {
            let mut state = self.state.write().unwrap();
            state.requests.push(request.clone());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        if let Some(error) = state.failures.get(&request.listing_id) {
            return Err(error.clone());
        }
        if let Some((remaining, error)) = state.flaky.get_mut(&request.listing_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }

        Ok(state
            .responses
            .get(&request.listing_id)
            .cloned()
            .unwrap_or_else(default_classification))
    }
}

// ============================================================================
// Embedding model
// ============================================================================

#[derive(Default)]
struct EmbeddingState {
    failing_texts: HashMap<String, ProviderError>,
    flaky_texts: HashMap<String, (u32, ProviderError)>,
    delay: Option<Duration>,
    calls: usize,
    texts: Vec<String>,
}

/// A mock embedding model returning deterministic vectors.
///
/// The vector for a text depends only on the text and the dimension, so
/// batched and single calls agree.
#[derive(Clone)]
pub struct MockEmbeddingModel {
    dimensions: usize,
    state: Arc<RwLock<EmbeddingState>>,
}

impl MockEmbeddingModel {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: Arc::default(),
        }
    }

    /// Any call containing `text` fails with `error`.
    pub fn failing_text(self, text: impl Into<String>, error: ProviderError) -> Self {
        self.state
            .write()
            .unwrap()
            .failing_texts
            .insert(text.into(), error);
        self
    }

    /// The first `failures` calls containing `text` fail with `error`.
    pub fn flaky_text(self, text: impl Into<String>, failures: u32, error: ProviderError) -> Self {
        self.state
            .write()
            .unwrap()
            .flaky_texts
            .insert(text.into(), (failures, error));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.write().unwrap().delay = Some(delay);
        self
    }

    /// Provider calls made, counting a batch as one call.
    pub fn call_count(&self) -> usize {
        self.state.read().unwrap().calls
    }

    /// How many times `text` was sent to the provider.
    pub fn embed_count(&self, text: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .texts
            .iter()
            .filter(|t| t.as_str() == text)
            .count()
    }

    /// The vector this mock returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        deterministic_embedding(text, self.dimensions)
    }
}

/// Hash-seeded vector in [-1, 1].
pub fn deterministic_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(text.as_bytes());
    (0..dimensions)
        .map(|i| (hash[i % hash.len()] as f32 / 127.5) - 1.0)
        .collect()
}

#[async_trait]
impl EmbeddingModel for MockEmbeddingModel {
    async fn embed_texts(&self, _model: &str, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        let delay = {
            let mut state = self.state.write().unwrap();
            state.calls += 1;
            state.texts.extend(texts.iter().cloned());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        if let Some(error) = texts.iter().find_map(|t| state.failing_texts.get(t)) {
            return Err(error.clone());
        }
        for text in texts {
            if let Some((remaining, error)) = state.flaky_texts.get_mut(text) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
        }

        Ok(texts
            .iter()
            .map(|t| deterministic_embedding(t, self.dimensions))
            .collect())
    }
}
