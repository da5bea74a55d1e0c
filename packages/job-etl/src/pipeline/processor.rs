//! Listing processor: classification plus embeddings for each listing.
//!
//! A bounded number of listings run concurrently. Results keep input order
//! and a failed listing never affects the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::analyzer::Analyzer;
use crate::cache::CapabilityEmbeddingCache;
use crate::embedder::EmbeddingGenerator;
use crate::error::{PipelineError, Result};
use crate::traits::ai::{EmbeddingModel, LanguageModel};
use crate::types::catalog::{CapabilityDefinition, TaxonomyGroup};
use crate::types::config::ProcessorConfig;
use crate::types::listing::ListingDetail;
use crate::types::metrics::{FailureStage, RunMetrics, Stage, StageError};
use crate::types::record::{
    EnrichedRecord, LabeledEmbedding, ProcessingMetadata, ProcessingStatus, RecordEmbeddings,
};

/// What happened to one listing in a batch.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Enriched(Box<EnrichedRecord>),
    /// Failed; the error is recorded in the run metrics
    Failed,
    /// Never started because the run was stopped or halted
    Skipped,
}

impl ItemOutcome {
    pub fn record(&self) -> Option<&EnrichedRecord> {
        match self {
            ItemOutcome::Enriched(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<EnrichedRecord> {
        match self {
            ItemOutcome::Enriched(record) => Some(*record),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ItemOutcome::Failed)
    }
}

/// Turns listing details into enriched records.
pub struct Processor<M: LanguageModel, E: EmbeddingModel> {
    analyzer: Arc<Analyzer<M>>,
    generator: Arc<EmbeddingGenerator<E>>,
    cache: Arc<CapabilityEmbeddingCache>,
    catalog: Arc<Vec<CapabilityDefinition>>,
    catalog_index: HashMap<String, usize>,
    groups: Arc<Vec<TaxonomyGroup>>,
    metrics: Arc<RunMetrics>,
    config: ProcessorConfig,
    stop: CancellationToken,
    fail_fast: bool,
}

impl<M: LanguageModel, E: EmbeddingModel> Processor<M, E> {
    pub fn new(
        analyzer: Arc<Analyzer<M>>,
        generator: Arc<EmbeddingGenerator<E>>,
        cache: Arc<CapabilityEmbeddingCache>,
        metrics: Arc<RunMetrics>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            analyzer,
            generator,
            cache,
            catalog: Arc::new(Vec::new()),
            catalog_index: HashMap::new(),
            groups: Arc::new(Vec::new()),
            metrics,
            config,
            stop: CancellationToken::new(),
            fail_fast: false,
        }
    }

    /// Reference data every listing is classified against.
    pub fn with_reference_data(
        mut self,
        catalog: Vec<CapabilityDefinition>,
        groups: Vec<TaxonomyGroup>,
    ) -> Self {
        self.catalog_index = catalog
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        self.catalog = Arc::new(catalog);
        self.groups = Arc::new(groups);
        self
    }

    /// Once `stop` is cancelled no new listing is started.
    pub fn with_stop_signal(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Stop starting new listings in a batch after the first failure.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Process one listing. Failures are recorded in the metrics and
    /// yield `None`.
    pub async fn process_one(&self, detail: &ListingDetail) -> Option<EnrichedRecord> {
        let started = Instant::now();
        self.metrics.record_attempt(Stage::Processing);

        match self.enrich(detail).await {
            Ok(record) => {
                self.metrics.record_success(Stage::Processing);
                self.metrics.record_duration(started.elapsed());
                Some(record)
            }
            Err(e) => {
                let stage = match &e {
                    PipelineError::Analysis(_) => FailureStage::Analysis,
                    _ => FailureStage::Embedding,
                };
                warn!(listing_id = %detail.id(), stage = ?stage, error = %e, "Listing processing failed");
                self.metrics
                    .record_failure(StageError::new(stage, detail.id(), e.to_string()));
                None
            }
        }
    }

    /// Process a batch, one slot per input in input order.
    ///
    /// `None` marks a listing that failed or was never started.
    pub async fn process_batch(&self, details: &[ListingDetail]) -> Vec<Option<EnrichedRecord>> {
        self.process_batch_outcomes(details)
            .await
            .into_iter()
            .map(ItemOutcome::into_record)
            .collect()
    }

    /// Process a batch, distinguishing failed listings from skipped ones.
    pub async fn process_batch_outcomes(&self, details: &[ListingDetail]) -> Vec<ItemOutcome> {
        let halt = self.stop.child_token();

        stream::iter(details)
            .map(|detail| {
                let halt = &halt;
                async move {
                    if halt.is_cancelled() {
                        debug!(listing_id = %detail.id(), "Skipping listing, run halted");
                        return ItemOutcome::Skipped;
                    }
                    match self.process_one(detail).await {
                        Some(record) => ItemOutcome::Enriched(Box::new(record)),
                        None => {
                            if self.fail_fast {
                                halt.cancel();
                            }
                            ItemOutcome::Failed
                        }
                    }
                }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    #[instrument(skip_all, fields(listing_id = %detail.id()))]
    async fn enrich(&self, detail: &ListingDetail) -> Result<EnrichedRecord> {
        let classification = self
            .analyzer
            .classify(detail, &self.catalog, &self.groups)
            .await?;

        let job = self.generator.embed(&detail.embedding_text()).await?;

        let mut capability_vectors = Vec::with_capacity(classification.capabilities.len());
        for matched in &classification.capabilities {
            let Some(capability) = self
                .catalog_index
                .get(&matched.capability_id)
                .map(|i| &self.catalog[*i])
            else {
                continue;
            };
            let generator = &self.generator;
            let text = capability.embedding_text();
            let vector = self
                .cache
                .get_or_compute(&capability.id, move || async move {
                    generator.embed(&text).await
                })
                .await?;
            capability_vectors.push(LabeledEmbedding::new(
                capability.id.clone(),
                vector.as_ref().clone(),
            ));
        }

        let skills = classification.taxonomy.distinct_skills();
        let skill_vectors = self.generator.embed_batch(&skills).await?;

        Ok(EnrichedRecord {
            listing: detail.clone(),
            capabilities: classification.capabilities,
            taxonomy: classification.taxonomy,
            embeddings: RecordEmbeddings {
                job,
                capabilities: capability_vectors,
                skills: skills
                    .into_iter()
                    .zip(skill_vectors)
                    .map(|(skill, vector)| LabeledEmbedding::new(skill, vector))
                    .collect(),
            },
            metadata: ProcessingMetadata {
                processed_at: Utc::now(),
                pipeline_version: self.config.pipeline_version.clone(),
                status: ProcessingStatus::Completed,
            },
        })
    }
}
