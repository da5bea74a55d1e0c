//! Provider traits for the language model and the embedding model.
//!
//! Both traits sit at the raw provider boundary: one call, no retries,
//! no validation. Retry, timeout and result policy live in
//! [`crate::analyzer::Analyzer`] and [`crate::embedder::EmbeddingGenerator`].

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// One classification call.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    /// Listing the call is made for (used for logging and by mocks)
    pub listing_id: String,

    pub model: String,

    pub system_prompt: String,

    pub user_prompt: String,

    pub temperature: f32,

    pub max_output_tokens: u32,
}

/// A capability match as returned by the model, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawCapabilityMatch {
    /// Catalog identifier of the capability
    pub capability_id: String,

    /// One of foundational, intermediate, adept, advanced, highly_advanced
    pub level: String,

    /// Relevance to the role between 0 and 1
    pub relevance: f32,
}

/// Structured classification as returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawClassification {
    pub capabilities: Vec<RawCapabilityMatch>,

    pub technical_skills: Vec<String>,

    pub soft_skills: Vec<String>,

    /// Taxonomy group names (or identifiers) the skills fall under
    pub taxonomy_groups: Vec<String>,
}

/// Chat/completion provider that returns structured classifications.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> ProviderResult<RawClassification>;
}

/// Vector embedding provider.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed each text, returning one vector per input in input order.
    async fn embed_texts(&self, model: &str, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>>;
}
