//! Run metrics shared by concurrent workers.
//!
//! Counters are atomics; the structured error list sits behind a mutex
//! and is bounded. Workers only ever touch metrics through the recording
//! methods here.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquisition,
    Processing,
    Persistence,
}

/// Where a recorded failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Listing enumeration itself failed
    Enumeration,
    Fetch,
    Analysis,
    Embedding,
    Storage,
}

impl FailureStage {
    /// Counter stage the failure is charged to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Enumeration | Self::Fetch => Stage::Acquisition,
            Self::Analysis | Self::Embedding => Stage::Processing,
            Self::Storage => Stage::Persistence,
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: FailureStage,

    /// Listing (or page) the failure is attributed to
    pub identifier: String,

    pub message: String,

    pub timestamp: DateTime<Utc>,
}

impl StageError {
    pub fn new(
        stage: FailureStage,
        identifier: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            identifier: identifier.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct StageCounters {
    attempted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl StageCounters {
    fn snapshot(&self) -> StageCounts {
        StageCounts {
            attempted: self.attempted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StageCounts {
    /// attempted == succeeded + failed
    pub fn is_balanced(&self) -> bool {
        self.attempted == self.succeeded + self.failed
    }
}

/// Metrics for one orchestrator run.
#[derive(Debug)]
pub struct RunMetrics {
    acquisition: StageCounters,
    processing: StageCounters,
    persistence: StageCounters,
    errors: Mutex<Vec<StageError>>,
    max_errors: usize,
    dropped_errors: AtomicUsize,
    processing_nanos: AtomicU64,
    timed_items: AtomicU64,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new(500)
    }
}

impl RunMetrics {
    /// Create metrics that keep at most `max_errors` structured errors.
    pub fn new(max_errors: usize) -> Self {
        Self {
            acquisition: StageCounters::default(),
            processing: StageCounters::default(),
            persistence: StageCounters::default(),
            errors: Mutex::new(Vec::new()),
            max_errors,
            dropped_errors: AtomicUsize::new(0),
            processing_nanos: AtomicU64::new(0),
            timed_items: AtomicU64::new(0),
        }
    }

    fn counters(&self, stage: Stage) -> &StageCounters {
        match stage {
            Stage::Acquisition => &self.acquisition,
            Stage::Processing => &self.processing,
            Stage::Persistence => &self.persistence,
        }
    }

    pub fn record_attempt(&self, stage: Stage) {
        self.counters(stage).attempted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_success(&self, stage: Stage) {
        self.counters(stage).succeeded.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a failure against its stage and keep the structured error.
    pub fn record_failure(&self, error: StageError) {
        self.counters(error.stage.stage())
            .failed
            .fetch_add(1, Ordering::SeqCst);
        self.push_error(error);
    }

    /// Keep a structured error without touching counters.
    ///
    /// Used for failures outside any item (enumeration).
    pub fn push_error(&self, error: StageError) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        if errors.len() < self.max_errors {
            errors.push(error);
        } else {
            self.dropped_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Add one item's processing time to the running average.
    pub fn record_duration(&self, elapsed: Duration) {
        self.processing_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::SeqCst);
        self.timed_items.fetch_add(1, Ordering::SeqCst);
    }

    pub fn counts(&self, stage: Stage) -> StageCounts {
        self.counters(stage).snapshot()
    }

    /// Mean processing time per item, if any item was timed.
    pub fn average_processing_time(&self) -> Option<Duration> {
        let items = self.timed_items.load(Ordering::SeqCst);
        if items == 0 {
            return None;
        }
        Some(Duration::from_nanos(
            self.processing_nanos.load(Ordering::SeqCst) / items,
        ))
    }

    pub fn errors(&self) -> Vec<StageError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acquisition: self.counts(Stage::Acquisition),
            processing: self.counts(Stage::Processing),
            persistence: self.counts(Stage::Persistence),
            errors: self.errors(),
            dropped_errors: self.dropped_errors.load(Ordering::SeqCst),
            average_processing_ms: self
                .average_processing_time()
                .map(|d| d.as_secs_f64() * 1000.0),
        }
    }
}

/// Serializable view of [`RunMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub acquisition: StageCounts,
    pub processing: StageCounts,
    pub persistence: StageCounts,
    pub errors: Vec<StageError>,
    /// Errors beyond the retention cap
    pub dropped_errors: usize,
    pub average_processing_ms: Option<f64>,
}

/// Snapshot of the acquisition service's own bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpiderMetrics {
    /// Requests issued (pages and details)
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub errors: Vec<StageError>,
}
