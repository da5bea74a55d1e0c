//! Configuration types for every pipeline component.
//!
//! Each component gets its own struct with every recognised field spelled
//! out and a documented default, plus `with_*` builders for the fields
//! callers usually change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::listing::ListingFilter;
use crate::types::record::CapabilityMatch;

/// Retry-with-fixed-delay policy shared by every external call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 3.
    pub attempts: u32,

    /// Fixed delay between attempts. Default: 1s.
    pub delay: Duration,

    /// Per-attempt timeout. A timeout counts as a transient failure.
    /// Default: 30s.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration, timeout: Duration) -> Self {
        Self {
            attempts,
            delay,
            timeout,
        }
    }

    /// Policy that never waits; for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for the acquisition service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiderConfig {
    /// Base URL of the listings feed.
    pub base_url: String,

    /// User agent sent with every request. Default: `JobEtlBot/1.0`.
    pub user_agent: String,

    /// Listings requested per page. Default: 50.
    pub page_size: u32,

    /// Worker-pool size for page and detail fetches. Default: 4.
    pub concurrency: usize,

    /// Optional request rate cap against the source. Default: none.
    pub requests_per_second: Option<u32>,

    /// Retry policy for page and detail fetches.
    pub retry: RetryPolicy,
}

impl SpiderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: "JobEtlBot/1.0".to_string(),
            page_size: 50,
            concurrency: 4,
            requests_per_second: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = Some(requests_per_second);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Which matched capabilities the analyzer keeps.
///
/// Relevance only ranks matches; this policy is what decides inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilitySelection {
    /// Keep every valid match.
    All,

    /// Keep the `n` most relevant matches.
    TopN { n: usize },

    /// Keep every match at or above `min` relevance.
    MinRelevance { min: f32 },

    /// Keep at most `n` matches, each at or above `min` relevance.
    TopNAbove { n: usize, min: f32 },
}

impl Default for CapabilitySelection {
    fn default() -> Self {
        Self::TopN { n: 10 }
    }
}

impl CapabilitySelection {
    /// Sort by relevance (descending, stable) and apply the policy.
    pub fn select(&self, mut matches: Vec<CapabilityMatch>) -> Vec<CapabilityMatch> {
        matches.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        match *self {
            Self::All => matches,
            Self::TopN { n } => {
                matches.truncate(n);
                matches
            }
            Self::MinRelevance { min } => {
                matches.retain(|m| m.relevance >= min);
                matches
            }
            Self::TopNAbove { n, min } => {
                matches.retain(|m| m.relevance >= min);
                matches.truncate(n);
                matches
            }
        }
    }
}

/// Configuration for the enrichment analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Chat model identifier. Default: `gpt-4o-mini`.
    pub model: String,

    /// Sampling temperature, fixed so repeated runs are stable. Default: 0.0.
    pub temperature: f32,

    /// Maximum completion tokens. Default: 2000.
    pub max_output_tokens: u32,

    /// Retry policy; timeout defaults to 60s.
    pub retry: RetryPolicy,

    /// Inclusion policy for capability matches. Default: top 10.
    pub selection: CapabilitySelection,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_output_tokens: 2000,
            retry: RetryPolicy::default()
                .with_delay(Duration::from_secs(2))
                .with_timeout(Duration::from_secs(60)),
            selection: CapabilitySelection::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_selection(mut self, selection: CapabilitySelection) -> Self {
        self.selection = selection;
        self
    }
}

/// Configuration for the embedding generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model identifier. Default: `text-embedding-3-small`.
    pub model: String,

    /// Dimensionality every vector must have. Default: 1536.
    pub dimensions: usize,

    /// Texts per provider call. Default: 32.
    pub batch_size: usize,

    pub retry: RetryPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 32,
            retry: RetryPolicy::default(),
        }
    }
}

impl EmbeddingConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for the per-listing processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Listings classified/embedded at once. Default: 3.
    pub concurrency: usize,

    /// Version stamped on every record. Default: the crate version.
    pub pipeline_version: String,

    /// Cap on structured errors kept in run metrics. Default: 500.
    pub max_recorded_errors: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
            max_recorded_errors: 500,
        }
    }
}

impl ProcessorConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_pipeline_version(mut self, version: impl Into<String>) -> Self {
        self.pipeline_version = version.into();
        self
    }
}

/// Options for one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Only listings posted at or after this instant.
    pub date_from: Option<DateTime<Utc>>,

    /// Only listings posted at or before this instant.
    pub date_to: Option<DateTime<Utc>>,

    /// Organisation allow-list (empty = all).
    #[serde(default)]
    pub organisations: Vec<String>,

    /// Location allow-list (empty = all).
    #[serde(default)]
    pub locations: Vec<String>,

    /// Maximum listings to take from the source; 0 = unlimited.
    pub max_records: usize,

    /// Listings fetched, processed and persisted per batch. Default: 20.
    pub batch_size: usize,

    /// Stop after acquisition.
    pub skip_processing: bool,

    /// Stop after processing; nothing is written and no checkpoint moves.
    pub skip_storage: bool,

    /// Keep going past isolated item failures. Default: true.
    pub continue_on_error: bool,

    /// Ignore the stored checkpoint and consider every listing.
    pub full_refresh: bool,

    /// Checkpoint scope key. Default: `listings`.
    pub checkpoint_scope: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            organisations: Vec::new(),
            locations: Vec::new(),
            max_records: 0,
            batch_size: 20,
            skip_processing: false,
            skip_storage: false,
            continue_on_error: true,
            full_refresh: false,
            checkpoint_scope: "listings".to_string(),
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn skip_processing(mut self) -> Self {
        self.skip_processing = true;
        self
    }

    pub fn skip_storage(mut self) -> Self {
        self.skip_storage = true;
        self
    }

    pub fn full_refresh(mut self) -> Self {
        self.full_refresh = true;
        self
    }

    pub fn with_organisations(mut self, orgs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.organisations = orgs.into_iter().map(|o| o.into()).collect();
        self
    }

    pub fn with_locations(mut self, locs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.locations = locs.into_iter().map(|l| l.into()).collect();
        self
    }

    pub fn with_date_window(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    /// Build the enumeration filter for this run.
    ///
    /// The checkpoint is ignored when `full_refresh` is set.
    pub fn listing_filter(&self, checkpoint: Option<DateTime<Utc>>) -> ListingFilter {
        ListingFilter {
            modified_since: if self.full_refresh { None } else { checkpoint },
            posted_from: self.date_from,
            posted_to: self.date_to,
            organisations: self.organisations.clone(),
            locations: self.locations.clone(),
        }
    }

    /// The cap as an option.
    pub fn record_cap(&self) -> Option<usize> {
        (self.max_records > 0).then_some(self.max_records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::catalog::ProficiencyLevel;
    use proptest::prelude::*;

    fn cap(id: &str, relevance: f32) -> CapabilityMatch {
        CapabilityMatch {
            capability_id: id.into(),
            name: id.into(),
            group: "g".into(),
            level: ProficiencyLevel::Adept,
            relevance,
        }
    }

    #[test]
    fn test_selection_policies() {
        let matches = vec![cap("a", 0.2), cap("b", 0.9), cap("c", 0.5)];

        let all = CapabilitySelection::All.select(matches.clone());
        assert_eq!(
            all.iter().map(|m| m.capability_id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c", "a"]
        );

        let top = CapabilitySelection::TopN { n: 2 }.select(matches.clone());
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].capability_id, "b");

        let min = CapabilitySelection::MinRelevance { min: 0.5 }.select(matches.clone());
        assert_eq!(min.len(), 2);

        let both = CapabilitySelection::TopNAbove { n: 1, min: 0.3 }.select(matches);
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].capability_id, "b");
    }

    #[test]
    fn test_listing_filter_respects_full_refresh() {
        let checkpoint = Utc::now();
        let options = RunOptions::new();
        assert_eq!(options.listing_filter(Some(checkpoint)).modified_since, Some(checkpoint));

        let refresh = RunOptions::new().full_refresh();
        assert_eq!(refresh.listing_filter(Some(checkpoint)).modified_since, None);
    }

    #[test]
    fn test_record_cap() {
        assert_eq!(RunOptions::new().record_cap(), None);
        assert_eq!(RunOptions::new().with_max_records(5).record_cap(), Some(5));
    }

    proptest! {
        #[test]
        fn prop_top_n_is_sorted_and_bounded(
            relevances in proptest::collection::vec(0.0f32..=1.0, 0..30),
            n in 0usize..15,
        ) {
            let matches: Vec<_> = relevances
                .iter()
                .enumerate()
                .map(|(i, r)| cap(&i.to_string(), *r))
                .collect();

            let selected = CapabilitySelection::TopN { n }.select(matches);

            prop_assert!(selected.len() <= n);
            prop_assert!(selected.len() == n.min(relevances.len()));
            for pair in selected.windows(2) {
                prop_assert!(pair[0].relevance >= pair[1].relevance);
            }
        }
    }
}
