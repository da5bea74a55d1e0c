//! Run orchestration: Spider -> Processor -> Repository.
//!
//! One [`Orchestrator`] drives one run. Listings are handled in batches;
//! pause and stop requests are honoured between batches (and stop also
//! before each detail fetch and each processed item). The spider is cleaned
//! up on every exit path.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::analyzer::Analyzer;
use crate::cache::CapabilityEmbeddingCache;
use crate::embedder::EmbeddingGenerator;
use crate::error::{PipelineError, Result};
use crate::pipeline::catalog::{
    fill_missing_capability_embeddings, store_cached_capability_embeddings,
};
use crate::pipeline::control::{ProgressReporter, RunControl, TracingProgress};
use crate::pipeline::processor::{ItemOutcome, Processor};
use crate::spider::Spider;
use crate::traits::ai::{EmbeddingModel, LanguageModel};
use crate::traits::source::ListingSource;
use crate::traits::store::Repository;
use crate::types::config::{ProcessorConfig, RunOptions};
use crate::types::listing::{ListingDetail, ListingSummary};
use crate::types::metrics::{FailureStage, RunMetrics, Stage, StageError};
use crate::types::record::EnrichedRecord;
use crate::types::run::{ProgressEvent, RunReport, RunState};

/// What one run got through, fed to the report and the checkpoint.
#[derive(Default)]
struct Tally {
    selected: Vec<ListingSummary>,
    truncation_cutoff: Option<DateTime<Utc>>,
    persisted: HashSet<String>,
    acquired: usize,
    processed: usize,
    previous_checkpoint: Option<DateTime<Utc>>,
    halt_reason: Option<String>,
    catalog_incomplete: bool,
}

/// Top-level pipeline controller.
pub struct Orchestrator<S, M, E, R>
where
    S: ListingSource,
    M: LanguageModel,
    E: EmbeddingModel,
    R: Repository,
{
    spider: Spider<S>,
    analyzer: Arc<Analyzer<M>>,
    generator: Arc<EmbeddingGenerator<E>>,
    repository: Arc<R>,
    cache: Arc<CapabilityEmbeddingCache>,
    config: ProcessorConfig,
    control: RunControl,
    progress: Arc<dyn ProgressReporter>,
}

impl<S, M, E, R> Orchestrator<S, M, E, R>
where
    S: ListingSource,
    M: LanguageModel,
    E: EmbeddingModel,
    R: Repository,
{
    pub fn new(
        spider: Spider<S>,
        analyzer: Analyzer<M>,
        generator: EmbeddingGenerator<E>,
        repository: Arc<R>,
    ) -> Self {
        Self {
            spider,
            analyzer: Arc::new(analyzer),
            generator: Arc::new(generator),
            repository,
            cache: Arc::new(CapabilityEmbeddingCache::new()),
            config: ProcessorConfig::default(),
            control: RunControl::new(),
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_processor_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.progress = Arc::new(reporter);
        self
    }

    /// Handle for pausing, resuming and stopping the run.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Run the pipeline once.
    ///
    /// Configuration and connectivity failures are returned as errors.
    /// Every other outcome, including a halted or stopped run, produces a
    /// report.
    pub async fn run(self, options: RunOptions) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let metrics = Arc::new(RunMetrics::new(self.config.max_recorded_errors));
        let mut tally = Tally::default();

        info!(%run_id, max_records = options.max_records, "Starting run");
        let outcome = self.execute(run_id, &options, &metrics, &mut tally).await;
        self.spider.cleanup().await;

        let state = match outcome {
            Ok(()) if tally.halt_reason.is_some() => RunState::Failed,
            Ok(()) if self.control.is_stopped() => RunState::Stopped,
            Ok(()) => RunState::Completed,
            Err(
                e @ (PipelineError::Config(_)
                | PipelineError::Connectivity(_)
                | PipelineError::InvalidTransition { .. }),
            ) => {
                error!(%run_id, error = %e, "Run aborted");
                let _ = self.control.transition(RunState::Failed);
                return Err(e);
            }
            Err(e) => {
                error!(%run_id, error = %e, "Run failed");
                tally.halt_reason = Some(e.to_string());
                RunState::Failed
            }
        };
        self.control.transition(state)?;

        if tally.catalog_incomplete {
            self.store_computed_capability_embeddings(&metrics).await;
        }

        let checkpoint = if options.skip_processing || options.skip_storage {
            None
        } else {
            self.advance_checkpoint(&options, state, &tally, &metrics).await
        };

        let report = RunReport {
            run_id,
            state,
            started_at,
            finished_at: Utc::now(),
            listings_selected: tally.selected.len(),
            records_persisted: tally.persisted.len(),
            checkpoint,
            halt_reason: tally.halt_reason,
            spider: self.spider.metrics(),
            metrics: metrics.snapshot(),
        };
        info!(
            %run_id,
            state = %report.state,
            selected = report.listings_selected,
            persisted = report.records_persisted,
            errors = report.metrics.errors.len(),
            "Run finished"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(run_id = %run_id))]
    async fn execute(
        &self,
        run_id: Uuid,
        options: &RunOptions,
        metrics: &Arc<RunMetrics>,
        tally: &mut Tally,
    ) -> Result<()> {
        self.repository
            .initialize()
            .await
            .map_err(PipelineError::Connectivity)?;
        self.control.transition(RunState::Acquiring)?;

        // Read even on a full refresh so the checkpoint never moves backwards
        let checkpoint = self
            .repository
            .get_last_checkpoint(&options.checkpoint_scope)
            .await?;
        tally.previous_checkpoint = checkpoint;

        let processor = if options.skip_processing {
            None
        } else {
            Some(self.prepare_processor(options, metrics, tally).await?)
        };

        let filter = options.listing_filter(checkpoint);
        let selection = self
            .spider
            .select_listings(options.record_cap(), &filter)
            .await
            .inspect_err(|e| {
                metrics.push_error(StageError::new(
                    FailureStage::Enumeration,
                    e.target(),
                    e.to_string(),
                ))
            })?;
        let total = selection.summaries.len();
        info!(
            total,
            passed_over = selection.passed_over.len(),
            since = ?filter.modified_since,
            "Listings selected"
        );
        tally.truncation_cutoff = selection.truncation_cutoff();
        tally.selected = selection.summaries;
        self.report(RunState::Acquiring, 0, total);

        let batch_size = options.batch_size.max(1);
        for start in (0..total).step_by(batch_size) {
            if !self.at_boundary().await? {
                info!(done = start, total, "Run stopped at batch boundary");
                break;
            }
            let batch = tally.selected[start..(start + batch_size).min(total)].to_vec();

            self.control.transition(RunState::Acquiring)?;
            let details = self.acquire(&batch, options, metrics, tally).await;
            self.report(RunState::Acquiring, tally.acquired, total);

            if let Some(processor) = &processor {
                self.control.transition(RunState::Processing)?;
                let records = self.process(processor, &details, options, tally).await;
                self.report(RunState::Processing, tally.processed, total);

                if !options.skip_storage {
                    self.control.transition(RunState::Persisting)?;
                    self.persist(&records, options, metrics, tally).await;
                    self.report(RunState::Persisting, tally.persisted.len(), total);
                }
            }

            if let Some(reason) = &tally.halt_reason {
                warn!(reason = %reason, "Halting run");
                break;
            }
        }

        Ok(())
    }

    /// Load reference data, fill missing capability embeddings and build
    /// the processor.
    async fn prepare_processor(
        &self,
        options: &RunOptions,
        metrics: &Arc<RunMetrics>,
        tally: &mut Tally,
    ) -> Result<Processor<M, E>> {
        let catalog = self.repository.get_capability_catalog().await?;
        let groups = self.repository.get_taxonomy_groups().await?;
        info!(capabilities = catalog.len(), groups = groups.len(), "Loaded reference data");

        let catalog = match fill_missing_capability_embeddings(
            self.repository.as_ref(),
            &self.generator,
            &self.cache,
            catalog.clone(),
            self.config.concurrency,
        )
        .await
        {
            Ok(filled) => filled,
            Err(e) if options.continue_on_error => {
                // Remaining vectors are computed on first use by the processor
                warn!(error = %e, "Capability catalog incomplete, continuing");
                metrics.push_error(StageError::new(
                    FailureStage::Embedding,
                    "capability catalog",
                    e.to_string(),
                ));
                tally.catalog_incomplete = true;
                catalog
            }
            Err(e) => return Err(e),
        };

        Ok(Processor::new(
            Arc::clone(&self.analyzer),
            Arc::clone(&self.generator),
            Arc::clone(&self.cache),
            Arc::clone(metrics),
            self.config.clone(),
        )
        .with_reference_data(catalog, groups)
        .with_stop_signal(self.control.stop_token())
        .with_fail_fast(!options.continue_on_error))
    }

    /// Write back capability vectors the processor computed on demand after
    /// the catalog fill failed.
    async fn store_computed_capability_embeddings(&self, metrics: &RunMetrics) {
        if let Err(e) = store_cached_capability_embeddings(
            self.repository.as_ref(),
            &self.cache,
            self.generator.dimensions(),
        )
        .await
        {
            warn!(error = %e, "Failed to store computed capability embeddings");
            metrics.push_error(StageError::new(
                FailureStage::Storage,
                "capability catalog",
                e.to_string(),
            ));
        }
    }

    /// Fetch details for a batch. Under fail-fast, details after the first
    /// failed fetch are dropped and the run is marked halted. Once a stop is
    /// requested no further fetch starts.
    async fn acquire(
        &self,
        batch: &[ListingSummary],
        options: &RunOptions,
        metrics: &RunMetrics,
        tally: &mut Tally,
    ) -> Vec<ListingDetail> {
        let stop = self.control.stop_token();
        let results = self.spider.fetch_details_until(batch, &stop).await;

        let mut details = Vec::with_capacity(batch.len());
        let mut not_started = 0;
        for (summary, result) in batch.iter().zip(results) {
            let Some(result) = result else {
                not_started += 1;
                continue;
            };
            metrics.record_attempt(Stage::Acquisition);
            match result {
                Ok(detail) => {
                    metrics.record_success(Stage::Acquisition);
                    if tally.halt_reason.is_none() {
                        details.push(detail);
                    }
                }
                Err(e) => {
                    metrics.record_failure(StageError::new(
                        FailureStage::Fetch,
                        &summary.id,
                        e.to_string(),
                    ));
                    if !options.continue_on_error && tally.halt_reason.is_none() {
                        tally.halt_reason = Some(format!("fetch failed for listing {}: {}", summary.id, e));
                    }
                }
            }
        }
        if not_started > 0 {
            info!(not_started, "Stop requested, remaining detail fetches skipped");
        }
        tally.acquired += details.len();
        details
    }

    /// Process a batch, returning the records that may be persisted.
    async fn process(
        &self,
        processor: &Processor<M, E>,
        details: &[ListingDetail],
        options: &RunOptions,
        tally: &mut Tally,
    ) -> Vec<EnrichedRecord> {
        let outcomes = processor.process_batch_outcomes(details).await;
        tally.processed += outcomes.iter().filter(|o| o.record().is_some()).count();

        let first_failure = outcomes.iter().position(ItemOutcome::is_failed);
        let keep = match first_failure {
            Some(index) if !options.continue_on_error => {
                if tally.halt_reason.is_none() {
                    tally.halt_reason = Some(format!(
                        "processing failed for listing {}",
                        details[index].id()
                    ));
                }
                index
            }
            _ => outcomes.len(),
        };

        outcomes
            .into_iter()
            .take(keep)
            .filter_map(ItemOutcome::into_record)
            .collect()
    }

    /// Upsert records one at a time. Under fail-fast the first storage
    /// failure stops the batch.
    async fn persist(
        &self,
        records: &[EnrichedRecord],
        options: &RunOptions,
        metrics: &RunMetrics,
        tally: &mut Tally,
    ) {
        for record in records {
            metrics.record_attempt(Stage::Persistence);
            match self.repository.upsert_enriched_record(record).await {
                Ok(()) => {
                    metrics.record_success(Stage::Persistence);
                    tally.persisted.insert(record.listing_id().to_string());
                }
                Err(e) => {
                    warn!(listing_id = %record.listing_id(), error = %e, "Upsert failed");
                    metrics.record_failure(StageError::new(
                        FailureStage::Storage,
                        record.listing_id(),
                        e.to_string(),
                    ));
                    if !options.continue_on_error {
                        tally.halt_reason.get_or_insert_with(|| {
                            format!("storage failed for listing {}: {}", record.listing_id(), e)
                        });
                        break;
                    }
                }
            }
        }
    }

    /// Honour pause and stop between batches. Returns `false` to stop.
    async fn at_boundary(&self) -> Result<bool> {
        if self.control.is_stopped() {
            return Ok(false);
        }
        if self.control.is_paused() {
            let resume_to = self.control.state();
            self.control.transition(RunState::Paused)?;
            info!("Run paused");
            if !self.control.wait_if_paused().await {
                return Ok(false);
            }
            self.control.transition(resume_to)?;
            info!("Run resumed");
        }
        Ok(!self.control.is_stopped())
    }

    async fn advance_checkpoint(
        &self,
        options: &RunOptions,
        state: RunState,
        tally: &Tally,
        metrics: &RunMetrics,
    ) -> Option<DateTime<Utc>> {
        let next = checkpoint_after(
            &tally.selected,
            &tally.persisted,
            state == RunState::Completed,
            tally.truncation_cutoff,
            tally.previous_checkpoint,
        )?;

        match self
            .repository
            .set_checkpoint(&options.checkpoint_scope, next)
            .await
        {
            Ok(()) => {
                info!(scope = %options.checkpoint_scope, checkpoint = %next, "Checkpoint advanced");
                Some(next)
            }
            Err(e) => {
                error!(error = %e, "Failed to write checkpoint");
                metrics.push_error(StageError::new(
                    FailureStage::Storage,
                    options.checkpoint_scope.clone(),
                    e.to_string(),
                ));
                None
            }
        }
    }

    fn report(&self, stage: RunState, current: usize, total: usize) {
        self.progress.on_progress(&ProgressEvent {
            stage,
            current,
            total,
        });
    }
}

/// Where the checkpoint may move after a run.
///
/// A completed run moves it to the newest persisted listing. An unfinished
/// run moves it only up to persisted listings older than every listing it
/// left unpersisted. `truncated_at` is the oldest listing the record cap
/// left out (see [`ListingSelection::truncation_cutoff`]); the checkpoint
/// stays strictly below it either way. Never moves backwards.
///
/// [`ListingSelection::truncation_cutoff`]: crate::types::listing::ListingSelection::truncation_cutoff
pub fn checkpoint_after(
    selected: &[ListingSummary],
    persisted: &HashSet<String>,
    completed: bool,
    truncated_at: Option<DateTime<Utc>>,
    previous: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let unpersisted = if completed {
        None
    } else {
        selected
            .iter()
            .filter(|s| !persisted.contains(&s.id))
            .map(ListingSummary::last_modified)
            .min()
    };
    let cutoff = match (unpersisted, truncated_at) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };

    selected
        .iter()
        .filter(|s| persisted.contains(&s.id))
        .map(ListingSummary::last_modified)
        .filter(|t| cutoff.map_or(true, |c| *t < c))
        .max()
        .filter(|t| previous.map_or(true, |p| *t > p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_summary;

    fn ids(ids: &[usize]) -> HashSet<String> {
        ids.iter().map(|i| format!("JOB-{i}")).collect()
    }

    #[test]
    fn test_completed_run_advances_to_newest_persisted() {
        let selected: Vec<_> = (0..5).map(sample_summary).collect();

        let next = checkpoint_after(&selected, &ids(&[0, 1, 3]), true, None, None);

        assert_eq!(next, Some(selected[3].last_modified()));
    }

    #[test]
    fn test_halted_run_stops_below_first_unpersisted() {
        let selected: Vec<_> = (0..5).map(sample_summary).collect();

        let next = checkpoint_after(&selected, &ids(&[0, 1, 3]), false, None, None);

        assert_eq!(next, Some(selected[1].last_modified()));
    }

    #[test]
    fn test_halted_run_with_nothing_safe_keeps_checkpoint() {
        let selected: Vec<_> = (0..3).map(sample_summary).collect();

        assert_eq!(checkpoint_after(&selected, &ids(&[1, 2]), false, None, None), None);
    }

    #[test]
    fn test_checkpoint_never_moves_backwards() {
        let selected: Vec<_> = (0..3).map(sample_summary).collect();
        let previous = selected[2].last_modified();

        assert_eq!(
            checkpoint_after(&selected, &ids(&[0, 1, 2]), true, None, Some(previous)),
            None
        );
    }

    #[test]
    fn test_truncated_run_stays_below_passed_over_listings() {
        let selected: Vec<_> = (0..5).map(sample_summary).collect();
        let passed_over = sample_summary(3).last_modified();
        let persisted = ids(&[0, 1, 2, 3, 4]);

        let next = checkpoint_after(&selected, &persisted, true, Some(passed_over), None);

        assert_eq!(next, Some(selected[2].last_modified()));
    }

    #[test]
    fn test_newest_first_truncation_keeps_checkpoint() {
        let selected: Vec<_> = (25..30).rev().map(sample_summary).collect();
        let passed_over = sample_summary(20).last_modified();

        let next = checkpoint_after(
            &selected,
            &ids(&[25, 26, 27, 28, 29]),
            true,
            Some(passed_over),
            None,
        );

        assert_eq!(next, None);
    }
}
