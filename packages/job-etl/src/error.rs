//! Typed errors for the job ETL pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell
//! transient failures from structural ones and attribute every failure to
//! the listing it belongs to.

use thiserror::Error;

/// Errors raised while acquiring listings from the source feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (connection refused, reset, DNS).
    #[error("HTTP error fetching {target}: {message}")]
    Http { target: String, message: String },

    /// Source answered with a non-success status.
    #[error("HTTP {status} fetching {target}")]
    Status { target: String, status: u16 },

    /// Request exceeded its timeout.
    #[error("timeout fetching {target}")]
    Timeout { target: String },

    /// Response was structurally invalid (missing required field, bad JSON).
    #[error("parse error for {target}: {message}")]
    Parse { target: String, message: String },

    /// Retries were exhausted.
    #[error("giving up on {target} after {attempts} attempts: {source}")]
    Exhausted {
        target: String,
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether the failure is worth another attempt.
    ///
    /// Timeouts, transport errors, 429 and 5xx are transient. Parse errors
    /// and other 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Parse { .. } | FetchError::Exhausted { .. } => false,
        }
    }

    /// The page or listing identifier this error is attributed to.
    pub fn target(&self) -> &str {
        match self {
            FetchError::Http { target, .. }
            | FetchError::Status { target, .. }
            | FetchError::Timeout { target }
            | FetchError::Parse { target, .. }
            | FetchError::Exhausted { target, .. } => target,
        }
    }
}

/// Errors returned by language-model and embedding backends.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network error (connection failed, reset)
    #[error("network error: {0}")]
    Network(String),

    /// Call exceeded its timeout
    #[error("provider call timed out")]
    Timeout,

    /// Non-2xx response from the provider
    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response did not match the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// Missing credentials or invalid settings
    #[error("provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether the failure is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Parse(_) | ProviderError::Config(_) => false,
        }
    }
}

/// Classification of a listing failed after retries.
#[derive(Debug, Error)]
#[error("analysis failed for listing {listing_id} after {attempts} attempts: {source}")]
pub struct AnalysisError {
    pub listing_id: String,
    pub attempts: u32,
    #[source]
    pub source: ProviderError,
}

/// Embedding generation failed.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider kept failing after retries.
    #[error("embedding failed for {context} after {attempts} attempts: {source}")]
    Provider {
        context: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// Provider returned a vector of the wrong size.
    #[error("embedding dimension mismatch for {context}: expected {expected}, got {actual}")]
    Dimension {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Provider returned a different number of vectors than inputs.
    #[error("embedding count mismatch: sent {sent} texts, received {received} vectors")]
    Count { sent: usize, received: usize },
}

/// Errors from the staging/live repository.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection could not be established or validated.
    #[error("{environment} store unreachable: {message}")]
    Connectivity {
        environment: &'static str,
        message: String,
    },

    /// A read or write failed.
    #[error("storage query failed: {0}")]
    Query(String),

    /// Referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Top-level pipeline error.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or missing configuration
    #[error("config error: {0}")]
    Config(String),

    /// Repository failed its startup check
    #[error("connectivity check failed: {0}")]
    Connectivity(#[source] StorageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Run was stopped
    #[error("run cancelled")]
    Cancelled,

    /// Orchestrator asked for a state change the machine does not allow
    #[error("invalid run state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::types::run::RunState,
        to: crate::types::run::RunState,
    },
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for acquisition operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
