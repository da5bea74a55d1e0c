//! OpenAI implementation of the provider traits.
//!
//! Chat completions with a `json_schema` response format for classification
//! and the embeddings endpoint for vectors. One HTTP call per trait call;
//! retries belong to the callers.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_etl::ai::OpenAI;
//!
//! let openai = OpenAI::from_env()?;
//! let analyzer = Analyzer::new(openai.clone(), AnalyzerConfig::default());
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::traits::ai::{ClassificationRequest, EmbeddingModel, LanguageModel, RawClassification};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider client.
///
/// The API key is held as a [`SecretString`] and never logged.
#[derive(Clone)]
pub struct OpenAI {
    client: Client,
    api_key: Arc<SecretString>,
    base_url: String,
}

impl std::fmt::Debug for OpenAI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAI")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAI {
    /// Create a client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: Arc::new(SecretString::from(api_key.into())),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from `OPENAI_API_KEY`, honouring `OPENAI_BASE_URL` if set.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Config("OPENAI_API_KEY not set".into()))?;
        let client = Self::new(api_key);
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => client.with_base_url(url),
            _ => client,
        })
    }

    /// Set a custom base URL (Azure, proxies, compatible servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set a client-level request timeout.
    ///
    /// Callers also bound each attempt with their retry policy.
    pub fn with_timeout(mut self, timeout: Duration) -> ProviderResult<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ProviderResult<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

fn classification_schema() -> ProviderResult<serde_json::Value> {
    serde_json::to_value(schemars::schema_for!(RawClassification))
        .map_err(|e| ProviderError::Parse(format!("schema generation failed: {}", e)))
}

#[async_trait]
impl LanguageModel for OpenAI {
    async fn classify(&self, request: &ClassificationRequest) -> ProviderResult<RawClassification> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "listing_classification",
                    strict: false,
                    schema: classification_schema()?,
                },
            },
        };

        debug!(listing_id = %request.listing_id, model = %request.model, "Classification request");
        let response: ChatResponse = self.post("chat/completions", &body).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("no content in completion".into()))?;

        serde_json::from_str(&content)
            .map_err(|e| ProviderError::Parse(format!("classification JSON: {}", e)))
    }
}

#[async_trait]
impl EmbeddingModel for OpenAI {
    async fn embed_texts(&self, model: &str, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest { model, input: texts };
        let response: EmbeddingResponse = self.post("embeddings", &body).await?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lists_classification_fields() {
        let schema = classification_schema().unwrap();
        let properties = schema["properties"].as_object().unwrap();

        for field in ["capabilities", "technical_skills", "soft_skills", "taxonomy_groups"] {
            assert!(properties.contains_key(field), "missing {field}");
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OpenAI::new("sk-test").with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAI::new("sk-very-secret");
        assert!(!format!("{:?}", client).contains("sk-very-secret"));
    }

    #[test]
    fn test_embedding_response_is_reordered_by_index() {
        let body = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let response: EmbeddingResponse = serde_json::from_str(body).unwrap();
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        assert_eq!(data[0].embedding, vec![1.0]);
    }
}
