//! HTTP listing source.
//!
//! Talks to a paginated JSON listings feed:
//! - `GET {base}/listings?page=N&pageSize=M` returns a [`ListingPage`]
//! - `GET {detail_ref}` (resolved against the base) returns the detail body
//!
//! Optionally rate limited with `governor`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, FetchResult, PipelineError, Result};
use crate::traits::source::ListingSource;
use crate::types::config::SpiderConfig;
use crate::types::listing::{Contact, ListingDetail, ListingDocument, ListingPage, ListingSummary};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Detail-page body; summary fields come from enumeration.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailBody {
    description: String,
    #[serde(default)]
    responsibilities: Vec<String>,
    #[serde(default)]
    requirements: Vec<String>,
    #[serde(default)]
    contact: Option<Contact>,
    #[serde(default)]
    documents: Vec<ListingDocument>,
}

/// Listing source backed by a JSON HTTP feed.
pub struct HttpListingSource {
    client: reqwest::Client,
    base_url: Url,
    limiter: Option<Arc<DefaultRateLimiter>>,
}

impl HttpListingSource {
    /// Build a source from spider configuration.
    pub fn new(config: &SpiderConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| PipelineError::Config(format!("invalid source URL {}: {}", config.base_url, e)))?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.retry.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        let limiter = config
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        Ok(Self {
            client,
            base_url,
            limiter,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn page_url(&self, page: u32, page_size: u32) -> FetchResult<Url> {
        let mut url = self.base_url.join("listings").map_err(|e| FetchError::Parse {
            target: format!("page {}", page),
            message: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("pageSize", &page_size.to_string());
        Ok(url)
    }

    /// Resolve a detail reference; absolute references override the base.
    fn detail_url(&self, summary: &ListingSummary) -> FetchResult<Url> {
        self.base_url
            .join(&summary.detail_ref)
            .map_err(|e| FetchError::Parse {
                target: summary.id.clone(),
                message: format!("bad detail reference {}: {}", summary.detail_ref, e),
            })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, target: &str) -> FetchResult<T> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        debug!(url = %url, target = %target, "HTTP fetch starting");
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP request failed");
            if e.is_timeout() {
                FetchError::Timeout {
                    target: target.to_string(),
                }
            } else {
                FetchError::Http {
                    target: target.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                target: target.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Http {
            target: target.to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&body).map_err(|e| FetchError::Parse {
            target: target.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch_page(&self, page: u32, page_size: u32) -> FetchResult<ListingPage> {
        let url = self.page_url(page, page_size)?;
        self.get_json(url, &format!("page {}", page)).await
    }

    async fn fetch_detail(&self, summary: &ListingSummary) -> FetchResult<ListingDetail> {
        let url = self.detail_url(summary)?;
        let body: DetailBody = self.get_json(url, &summary.id).await?;

        Ok(ListingDetail {
            summary: summary.clone(),
            description: body.description,
            responsibilities: body.responsibilities,
            requirements: body.requirements,
            contact: body.contact,
            documents: body.documents,
        })
    }

    async fn close(&self) -> FetchResult<()> {
        debug!(base_url = %self.base_url, "Closing HTTP listing source");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn source(base: &str) -> HttpListingSource {
        HttpListingSource::new(&SpiderConfig::new(base)).unwrap()
    }

    #[test]
    fn test_page_url() {
        let source = source("https://jobs.example.gov/api");
        let url = source.page_url(3, 50).unwrap();
        assert_eq!(
            url.as_str(),
            "https://jobs.example.gov/api/listings?page=3&pageSize=50"
        );
    }

    #[test]
    fn test_detail_url_relative_and_absolute() {
        let source = source("https://jobs.example.gov/api/");
        let summary = ListingSummary::new("JOB-9", "Analyst", "Treasury", Utc::now());
        assert_eq!(
            source.detail_url(&summary).unwrap().as_str(),
            "https://jobs.example.gov/api/listings/JOB-9"
        );

        let absolute = summary.with_detail_ref("https://other.example.gov/jobs/9");
        assert_eq!(
            source.detail_url(&absolute).unwrap().as_str(),
            "https://other.example.gov/jobs/9"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = HttpListingSource::new(&SpiderConfig::new("not a url"));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rate_limiter_only_when_configured() {
        assert!(source("https://jobs.example.gov").limiter.is_none());
        let limited =
            HttpListingSource::new(&SpiderConfig::new("https://jobs.example.gov").with_rate_limit(2))
                .unwrap();
        assert!(limited.limiter.is_some());
    }
}
