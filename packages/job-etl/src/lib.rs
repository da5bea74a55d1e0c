//! Job-Listing ETL Pipeline
//!
//! Crawls a paginated job-listings feed, classifies every listing against a
//! capability catalog and a skill taxonomy with a language model, embeds the
//! listing, its capabilities and its skills, and upserts the enriched record
//! into a staging store that is later promoted to live.
//!
//! # Design
//!
//! - Every external call (page, detail, classify, embed) is retried with a
//!   fixed delay and bounded by a per-attempt timeout
//! - Per-listing failures are isolated and recorded, never silently dropped
//! - Capability embeddings are computed once and persisted with a content
//!   hash, so edited descriptions are re-embedded
//! - Runs are incremental: a checkpoint only moves past persisted listings
//!
//! # Usage
//!
//! ```rust,ignore
//! use job_etl::{Analyzer, EmbeddingGenerator, Orchestrator, RunOptions, Spider};
//! use job_etl::spider::HttpListingSource;
//! use job_etl::ai::OpenAI;
//!
//! let source = HttpListingSource::new(&spider_config)?;
//! let openai = OpenAI::from_env()?;
//! let orchestrator = Orchestrator::new(
//!     Spider::new(source, spider_config),
//!     Analyzer::new(openai.clone(), AnalyzerConfig::default()),
//!     EmbeddingGenerator::new(openai, EmbeddingConfig::default()),
//!     repository,
//! );
//!
//! let control = orchestrator.control();
//! let report = orchestrator.run(RunOptions::new().with_max_records(100)).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams to the outside world (ListingSource, LanguageModel, EmbeddingModel, Repository)
//! - [`types`] - Listings, catalog, records, configuration, metrics, run state
//! - [`spider`] - Acquisition service and the HTTP listing source
//! - [`analyzer`] - Capability and skill classification
//! - [`embedder`] - Batched, validated embedding generation
//! - [`cache`] - Single-flight capability embedding cache
//! - [`pipeline`] - Processor, run control and the orchestrator
//! - [`stores`] - Repository implementations (MemoryRepository, PostgresRepository)
//! - [`ai`] - OpenAI provider
//! - [`testing`] - Mock implementations for testing

pub mod ai;
pub mod analyzer;
pub mod cache;
pub mod embedder;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod spider;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    AnalysisError, EmbeddingError, FetchError, PipelineError, ProviderError, Result, StorageError,
};
pub use traits::{
    ai::{ClassificationRequest, EmbeddingModel, LanguageModel, RawClassification},
    source::ListingSource,
    store::{CheckpointStore, RecordStore, ReferenceData, Repository},
};
pub use types::{
    catalog::{CapabilityDefinition, ProficiencyLevel, TaxonomyGroup},
    config::{
        AnalyzerConfig, CapabilitySelection, EmbeddingConfig, ProcessorConfig, RetryPolicy,
        RunOptions, SpiderConfig,
    },
    listing::{ListingDetail, ListingFilter, ListingPage, ListingSelection, ListingSummary},
    metrics::{FailureStage, MetricsSnapshot, RunMetrics, SpiderMetrics, Stage, StageError},
    record::{CapabilityMatch, Classification, EnrichedRecord, TaxonomyClassification},
    run::{ProgressEvent, RunReport, RunState},
};

pub use analyzer::Analyzer;
pub use cache::CapabilityEmbeddingCache;
pub use embedder::EmbeddingGenerator;
pub use pipeline::{
    fill_missing_capability_embeddings, Orchestrator, ProgressReporter, Processor, RunControl,
    TracingProgress,
};
pub use spider::{HttpListingSource, Spider};

// Re-export stores
pub use stores::MemoryRepository;

#[cfg(feature = "postgres")]
pub use stores::PostgresRepository;
