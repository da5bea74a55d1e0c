//! End-to-end runs of the orchestrator against the in-memory repository
//! and the mock source and providers.
//!
//! These cover the run-level guarantees:
//! 1. Every persisted record carries vectors of the configured size
//! 2. The record cap and filters bound what is selected
//! 3. Fail-fast halts and never persists past the first failure
//! 4. Isolated failures are counted and skipped when continuing
//! 5. Re-runs resume from the checkpoint
//! 6. Stop, pause and cleanup behave at batch boundaries

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use job_etl::testing::{
    sample_catalog, sample_groups, sample_summary, MockEmbeddingModel, MockLanguageModel,
    MockListingSource,
};
use job_etl::{
    Analyzer, AnalyzerConfig, EmbeddingConfig, EmbeddingGenerator, FailureStage, MemoryRepository,
    Orchestrator, PipelineError, ProcessorConfig, ProgressEvent, ProviderError, RecordStore,
    ReferenceData, RetryPolicy, RunOptions, RunState, Spider, SpiderConfig,
};

const DIM: usize = 8;

type TestOrchestrator =
    Orchestrator<MockListingSource, MockLanguageModel, MockEmbeddingModel, MemoryRepository>;

fn repository() -> Arc<MemoryRepository> {
    Arc::new(
        MemoryRepository::new()
            .with_catalog(sample_catalog(4))
            .with_groups(sample_groups()),
    )
}

fn spider_config() -> SpiderConfig {
    SpiderConfig::new("http://feed.test")
        .with_page_size(10)
        .with_concurrency(2)
        .with_retry(RetryPolicy::immediate(2))
}

fn orchestrator(
    source: MockListingSource,
    language: MockLanguageModel,
    embedding: MockEmbeddingModel,
    repository: Arc<MemoryRepository>,
) -> TestOrchestrator {
    orchestrator_with_spider(spider_config(), source, language, embedding, repository)
}

fn orchestrator_with_spider(
    spider_config: SpiderConfig,
    source: MockListingSource,
    language: MockLanguageModel,
    embedding: MockEmbeddingModel,
    repository: Arc<MemoryRepository>,
) -> TestOrchestrator {
    let spider = Spider::new(source, spider_config);
    let analyzer = Analyzer::new(
        language,
        AnalyzerConfig::default().with_retry(RetryPolicy::immediate(2)),
    );
    let generator = EmbeddingGenerator::new(
        embedding,
        EmbeddingConfig::default()
            .with_dimensions(DIM)
            .with_retry(RetryPolicy::immediate(2)),
    );

    Orchestrator::new(spider, analyzer, generator, repository)
        .with_processor_config(ProcessorConfig::default().with_concurrency(1))
}

fn default_orchestrator(
    source: MockListingSource,
    repository: Arc<MemoryRepository>,
) -> TestOrchestrator {
    orchestrator(
        source,
        MockLanguageModel::new(),
        MockEmbeddingModel::new(DIM),
        repository,
    )
}

fn ids(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("JOB-{i}")).collect()
}

#[tokio::test]
async fn test_full_run_persists_every_listing() {
    let source = MockListingSource::with_listings(12);
    let repo = repository();

    let report = default_orchestrator(source.clone(), Arc::clone(&repo))
        .run(RunOptions::new().with_batch_size(5))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert!(report.is_success());
    assert_eq!(report.listings_selected, 12);
    assert_eq!(report.records_persisted, 12);
    assert_eq!(repo.record_count(), 12);
    assert_eq!(report.checkpoint, Some(sample_summary(11).last_modified()));
    assert_eq!(repo.checkpoint("listings"), report.checkpoint);

    for stage in [
        report.metrics.acquisition,
        report.metrics.processing,
        report.metrics.persistence,
    ] {
        assert_eq!(stage.attempted, 12);
        assert!(stage.is_balanced());
    }
    assert!(report.metrics.errors.is_empty());
    assert_eq!(source.close_calls(), 1);
}

#[tokio::test]
async fn test_persisted_vectors_have_configured_dimension() {
    let repo = repository();

    default_orchestrator(MockListingSource::with_listings(3), Arc::clone(&repo))
        .run(RunOptions::new())
        .await
        .unwrap();

    let record = repo.record("JOB-1").unwrap();
    assert_eq!(record.embeddings.job.len(), DIM);
    assert!(!record.embeddings.capabilities.is_empty());
    assert!(record
        .embeddings
        .capabilities
        .iter()
        .chain(&record.embeddings.skills)
        .all(|e| e.vector.len() == DIM));

    let link = repo.capability_link("role-JOB-1", "cap-0").unwrap();
    assert_eq!(link.embedding.len(), DIM);
}

#[tokio::test]
async fn test_record_cap_limits_selection_and_pages() {
    let source = MockListingSource::with_listings(30);
    let repo = repository();

    let report = default_orchestrator(source.clone(), Arc::clone(&repo))
        .run(RunOptions::new().with_max_records(5))
        .await
        .unwrap();

    assert_eq!(report.listings_selected, 5);
    assert_eq!(repo.record_count(), 5);
    assert_eq!(source.page_calls(), 1);
    assert_eq!(source.total_detail_calls(), 5);
}

#[tokio::test]
async fn test_capped_runs_page_through_ascending_feed() {
    let repo = repository();

    let first = default_orchestrator(MockListingSource::with_listings(30), Arc::clone(&repo))
        .run(RunOptions::new().with_max_records(5))
        .await
        .unwrap();
    assert_eq!(first.checkpoint, Some(sample_summary(4).last_modified()));

    let second = default_orchestrator(MockListingSource::with_listings(30), Arc::clone(&repo))
        .run(RunOptions::new().with_max_records(5))
        .await
        .unwrap();

    assert_eq!(second.listings_selected, 5);
    assert_eq!(&repo.upserted_ids()[5..], ids(5..10).as_slice());
    assert_eq!(repo.record_count(), 10);
    assert_eq!(second.checkpoint, Some(sample_summary(9).last_modified()));
}

#[tokio::test]
async fn test_capped_newest_first_feed_keeps_checkpoint() {
    let newest_first =
        || MockListingSource::new().with_summaries((0..30).rev().map(sample_summary));
    let repo = repository();

    let capped = default_orchestrator(newest_first(), Arc::clone(&repo))
        .run(RunOptions::new().with_max_records(5))
        .await
        .unwrap();

    assert_eq!(capped.state, RunState::Completed);
    assert_eq!(capped.records_persisted, 5);
    assert_eq!(capped.checkpoint, None);
    assert_eq!(repo.checkpoint("listings"), None);

    let source = newest_first();
    let uncapped = default_orchestrator(source.clone(), Arc::clone(&repo))
        .run(RunOptions::new())
        .await
        .unwrap();

    assert_eq!(uncapped.listings_selected, 30);
    assert_eq!(source.total_detail_calls(), 30);
    assert_eq!(repo.record_count(), 30);
    assert_eq!(uncapped.checkpoint, Some(sample_summary(29).last_modified()));
}

#[tokio::test]
async fn test_organisation_filter_is_case_insensitive() {
    let repo = repository();

    let report = default_orchestrator(MockListingSource::with_listings(9), Arc::clone(&repo))
        .run(RunOptions::new().with_organisations(["treasury"]))
        .await
        .unwrap();

    assert_eq!(report.listings_selected, 3);
    assert_eq!(repo.upserted_ids(), vec!["JOB-0", "JOB-3", "JOB-6"]);
}

#[tokio::test]
async fn test_fail_fast_halts_at_first_processing_failure() {
    let language = MockLanguageModel::new().failing_for(
        "JOB-3",
        ProviderError::Api {
            status: 400,
            message: "bad request".into(),
        },
    );
    let source = MockListingSource::with_listings(8);
    let repo = repository();

    let report = orchestrator(
        source.clone(),
        language,
        MockEmbeddingModel::new(DIM),
        Arc::clone(&repo),
    )
    .run(
        RunOptions::new()
            .with_batch_size(5)
            .with_continue_on_error(false),
    )
    .await
    .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert!(report.halt_reason.as_deref().unwrap().contains("JOB-3"));
    assert_eq!(repo.upserted_ids(), ids(0..3));

    // Second batch never started
    assert_eq!(source.detail_calls("JOB-5"), 0);

    // Checkpoint stays below the failed listing
    assert_eq!(report.checkpoint, Some(sample_summary(2).last_modified()));
    assert_eq!(source.close_calls(), 1);
}

#[tokio::test]
async fn test_fail_fast_halts_at_first_fetch_failure() {
    let source = MockListingSource::with_listings(5).failing_detail("JOB-2");
    let repo = repository();

    let report = default_orchestrator(source.clone(), Arc::clone(&repo))
        .run(RunOptions::new().with_continue_on_error(false))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(repo.upserted_ids(), ids(0..2));
    assert_eq!(source.detail_calls("JOB-2"), 2);
    assert_eq!(report.metrics.errors[0].stage, FailureStage::Fetch);
    assert_eq!(report.metrics.errors[0].identifier, "JOB-2");
}

#[tokio::test]
async fn test_fail_fast_halts_at_first_storage_failure() {
    let repo = Arc::new(
        MemoryRepository::new()
            .with_catalog(sample_catalog(4))
            .with_groups(sample_groups())
            .failing_record("JOB-1"),
    );

    let report = default_orchestrator(MockListingSource::with_listings(4), Arc::clone(&repo))
        .run(RunOptions::new().with_continue_on_error(false))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(repo.upserted_ids(), ids(0..2));
    assert_eq!(repo.record_count(), 1);
    assert_eq!(report.checkpoint, Some(sample_summary(0).last_modified()));
}

#[tokio::test]
async fn test_isolated_failure_is_counted_and_run_completes() {
    let language = MockLanguageModel::new().failing_for(
        "JOB-3",
        ProviderError::Api {
            status: 422,
            message: "unprocessable".into(),
        },
    );
    let repo = repository();

    let report = orchestrator(
        MockListingSource::with_listings(8),
        language,
        MockEmbeddingModel::new(DIM),
        Arc::clone(&repo),
    )
    .run(RunOptions::new().with_batch_size(5))
    .await
    .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.metrics.processing.failed, 1);
    assert_eq!(report.metrics.processing.succeeded, 7);
    assert_eq!(report.records_persisted, 7);
    assert!(repo.record("JOB-3").is_none());

    let error = &report.metrics.errors[0];
    assert_eq!(error.stage, FailureStage::Analysis);
    assert_eq!(error.identifier, "JOB-3");
}

#[tokio::test]
async fn test_second_run_resumes_from_checkpoint() {
    let repo = repository();

    let first = default_orchestrator(MockListingSource::with_listings(6), Arc::clone(&repo))
        .run(RunOptions::new())
        .await
        .unwrap();
    assert_eq!(first.records_persisted, 6);

    let source = MockListingSource::with_listings(6);
    let second = default_orchestrator(source.clone(), Arc::clone(&repo))
        .run(RunOptions::new())
        .await
        .unwrap();

    assert_eq!(second.state, RunState::Completed);
    assert_eq!(second.listings_selected, 0);
    assert_eq!(source.total_detail_calls(), 0);
    assert_eq!(repo.checkpoint("listings"), first.checkpoint);
}

#[tokio::test]
async fn test_full_refresh_reprocesses_without_moving_checkpoint_back() {
    let repo = repository();
    default_orchestrator(MockListingSource::with_listings(4), Arc::clone(&repo))
        .run(RunOptions::new())
        .await
        .unwrap();
    let checkpoint = repo.checkpoint("listings");

    let report = default_orchestrator(MockListingSource::with_listings(4), Arc::clone(&repo))
        .run(RunOptions::new().full_refresh())
        .await
        .unwrap();

    assert_eq!(report.listings_selected, 4);
    assert_eq!(repo.record_count(), 4);
    assert_eq!(repo.upserted_ids().len(), 8);
    assert_eq!(report.checkpoint, None);
    assert_eq!(repo.checkpoint("listings"), checkpoint);
}

#[tokio::test]
async fn test_capability_embeddings_are_stored_once_across_runs() {
    let embedding = MockEmbeddingModel::new(DIM);
    let repo = repository();

    orchestrator(
        MockListingSource::with_listings(3),
        MockLanguageModel::new(),
        embedding.clone(),
        Arc::clone(&repo),
    )
    .run(RunOptions::new())
    .await
    .unwrap();
    assert_eq!(repo.embedding_writes(), 4);

    orchestrator(
        MockListingSource::with_listings(3),
        MockLanguageModel::new(),
        embedding.clone(),
        Arc::clone(&repo),
    )
    .run(RunOptions::new().full_refresh())
    .await
    .unwrap();

    assert_eq!(repo.embedding_writes(), 4);
    let catalog = sample_catalog(4);
    assert_eq!(embedding.embed_count(&catalog[0].embedding_text()), 1);
}

#[tokio::test]
async fn test_capability_vectors_computed_after_fill_failure_are_stored() {
    let catalog = sample_catalog(4);
    let cap_text = catalog[1].embedding_text();
    let embedding =
        MockEmbeddingModel::new(DIM).flaky_text(cap_text.clone(), 2, ProviderError::Timeout);
    let repo = repository();

    let report = orchestrator(
        MockListingSource::with_listings(3),
        MockLanguageModel::new(),
        embedding.clone(),
        Arc::clone(&repo),
    )
    .run(RunOptions::new())
    .await
    .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.records_persisted, 3);
    assert_eq!(report.metrics.errors[0].stage, FailureStage::Embedding);
    assert_eq!(repo.embedding_writes(), 4);
    let stored = repo.get_capability_catalog().await.unwrap();
    assert!(stored.iter().all(|c| !c.needs_embedding(DIM)));
    assert_eq!(embedding.embed_count(&cap_text), 3);

    orchestrator(
        MockListingSource::with_listings(3),
        MockLanguageModel::new(),
        embedding.clone(),
        Arc::clone(&repo),
    )
    .run(RunOptions::new().full_refresh())
    .await
    .unwrap();

    assert_eq!(embedding.embed_count(&cap_text), 3);
    assert_eq!(repo.embedding_writes(), 4);
}

#[tokio::test]
async fn test_stop_during_acquisition_starts_no_new_fetches() {
    let source = MockListingSource::with_listings(10).with_detail_delay(Duration::from_millis(20));
    let repo = repository();
    let orchestrator = orchestrator_with_spider(
        spider_config().with_concurrency(1),
        source.clone(),
        MockLanguageModel::new(),
        MockEmbeddingModel::new(DIM),
        Arc::clone(&repo),
    );

    let control = orchestrator.control();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        control.stop();
    });

    let report = orchestrator
        .run(RunOptions::new().with_batch_size(10))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Stopped);
    let fetched = source.total_detail_calls();
    assert!((1..=3).contains(&fetched), "fetched {fetched} details");
    assert_eq!(report.metrics.acquisition.attempted, fetched);
    assert!(report.metrics.acquisition.is_balanced());
    assert_eq!(report.records_persisted, 0);
    assert_eq!(report.checkpoint, None);
    assert_eq!(source.close_calls(), 1);
}

#[tokio::test]
async fn test_stop_ends_run_at_batch_boundary() {
    let source = MockListingSource::with_listings(10);
    let repo = repository();
    let orchestrator = default_orchestrator(source.clone(), Arc::clone(&repo));

    let control = orchestrator.control();
    let orchestrator = orchestrator.with_progress(move |event: &ProgressEvent| {
        if event.stage == RunState::Persisting {
            control.stop();
        }
    });

    let report = orchestrator
        .run(RunOptions::new().with_batch_size(2))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Stopped);
    assert_eq!(report.records_persisted, 2);
    assert_eq!(repo.upserted_ids(), ids(0..2));
    assert_eq!(report.checkpoint, Some(sample_summary(1).last_modified()));
    assert_eq!(source.close_calls(), 1);
}

#[tokio::test]
async fn test_pause_and_resume_between_batches() {
    let repo = repository();
    let orchestrator = default_orchestrator(MockListingSource::with_listings(6), Arc::clone(&repo));

    let control = orchestrator.control();
    let observed_pause = Arc::new(AtomicBool::new(false));
    let paused_once = Arc::new(AtomicBool::new(false));
    let orchestrator = {
        let control = control.clone();
        let observed_pause = Arc::clone(&observed_pause);
        orchestrator.with_progress(move |event: &ProgressEvent| {
            if event.stage != RunState::Persisting || paused_once.swap(true, Ordering::SeqCst) {
                return;
            }
            control.pause();

            let control = control.clone();
            let observed_pause = Arc::clone(&observed_pause);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                observed_pause.store(control.state() == RunState::Paused, Ordering::SeqCst);
                control.resume();
            });
        })
    };

    let report = orchestrator
        .run(RunOptions::new().with_batch_size(3))
        .await
        .unwrap();

    assert!(observed_pause.load(Ordering::SeqCst));
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.records_persisted, 6);
    assert_eq!(control.state(), RunState::Completed);
}

#[tokio::test]
async fn test_initialize_failure_aborts_and_cleans_up() {
    let source = MockListingSource::with_listings(3);
    let repo = Arc::new(MemoryRepository::new().failing_initialize());

    let result = default_orchestrator(source.clone(), repo)
        .run(RunOptions::new())
        .await;

    assert!(matches!(result, Err(PipelineError::Connectivity(_))));
    assert_eq!(source.page_calls(), 0);
    assert_eq!(source.close_calls(), 1);
}

#[tokio::test]
async fn test_enumeration_failure_fails_run() {
    let source = MockListingSource::with_listings(25).failing_page(2);
    let repo = repository();

    let report = default_orchestrator(source.clone(), Arc::clone(&repo))
        .run(RunOptions::new())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert!(report.halt_reason.is_some());
    assert_eq!(repo.record_count(), 0);
    assert!(report
        .metrics
        .errors
        .iter()
        .any(|e| e.stage == FailureStage::Enumeration));
    assert_eq!(source.close_calls(), 1);
}

#[tokio::test]
async fn test_skip_storage_writes_nothing() {
    let repo = repository();

    let report = default_orchestrator(MockListingSource::with_listings(4), Arc::clone(&repo))
        .run(RunOptions::new().skip_storage())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.metrics.processing.succeeded, 4);
    assert_eq!(report.metrics.persistence.attempted, 0);
    assert!(repo.upserted_ids().is_empty());
    assert_eq!(report.checkpoint, None);
    assert_eq!(repo.checkpoint("listings"), None);
}

#[tokio::test]
async fn test_skip_processing_only_acquires() {
    let language = MockLanguageModel::new();
    let repo = repository();

    let report = orchestrator(
        MockListingSource::with_listings(4),
        language.clone(),
        MockEmbeddingModel::new(DIM),
        Arc::clone(&repo),
    )
    .run(RunOptions::new().skip_processing())
    .await
    .unwrap();

    assert_eq!(report.metrics.acquisition.succeeded, 4);
    assert_eq!(report.metrics.processing.attempted, 0);
    assert!(language.requests().is_empty());
    assert_eq!(repo.embedding_writes(), 0);
    assert_eq!(repo.checkpoint("listings"), None);
}

#[tokio::test]
async fn test_progress_events_reach_total() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    default_orchestrator(MockListingSource::with_listings(5), repository())
        .with_progress(move |event: &ProgressEvent| sink.lock().unwrap().push(event.clone()))
        .run(RunOptions::new().with_batch_size(2))
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(events.iter().all(|e| e.total == 5));
    assert_eq!(events.first().unwrap().current, 0);

    let last = events.last().unwrap();
    assert_eq!(last.stage, RunState::Persisting);
    assert_eq!(last.current, 5);
}

#[tokio::test]
async fn test_promotion_copies_staged_records() {
    let repo = repository();

    let report = default_orchestrator(MockListingSource::with_listings(3), Arc::clone(&repo))
        .run(RunOptions::new())
        .await
        .unwrap();
    assert!(report.is_success());

    assert_eq!(repo.promote_to_live().await.unwrap(), 3);
    assert_eq!(repo.promote_to_live().await.unwrap(), 3);
    assert_eq!(repo.live_record_count(), 3);
}
