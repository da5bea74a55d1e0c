//! Storage traits for the staging/live repository.
//!
//! The repository is split into focused traits:
//! - `ReferenceData`: capability catalog and taxonomy groups (live reads)
//! - `RecordStore`: enriched records and their links (staging writes)
//! - `CheckpointStore`: incremental sync checkpoints
//! - `Repository`: all three plus the startup connectivity check

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::types::{
    catalog::{CapabilityDefinition, TaxonomyGroup},
    record::EnrichedRecord,
};

/// Read access to reference data, plus the capability embedding column.
#[async_trait]
pub trait ReferenceData: Send + Sync {
    /// Every capability in the catalog, with stored embeddings if any.
    async fn get_capability_catalog(&self) -> StorageResult<Vec<CapabilityDefinition>>;

    /// Every taxonomy group.
    async fn get_taxonomy_groups(&self) -> StorageResult<Vec<TaxonomyGroup>>;

    /// Persist a computed capability embedding keyed by capability id.
    ///
    /// `content_hash` identifies the text the vector was computed from.
    async fn store_capability_embedding(
        &self,
        capability_id: &str,
        embedding: &[f32],
        content_hash: &str,
    ) -> StorageResult<()>;
}

/// Idempotent writes of enriched records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write a record and all its capability/skill links.
    ///
    /// Re-submitting a record for the same listing replaces it and never
    /// duplicates links: (role id, capability id) and (role id, skill) are
    /// unique.
    async fn upsert_enriched_record(&self, record: &EnrichedRecord) -> StorageResult<()>;

    /// Copy staged records and links into the live environment.
    ///
    /// Returns the number of records promoted.
    async fn promote_to_live(&self) -> StorageResult<usize>;
}

/// Incremental-run checkpoints, one per scope.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_last_checkpoint(&self, scope: &str) -> StorageResult<Option<DateTime<Utc>>>;

    async fn set_checkpoint(&self, scope: &str, at: DateTime<Utc>) -> StorageResult<()>;
}

/// The full repository used by the orchestrator.
#[async_trait]
pub trait Repository: ReferenceData + RecordStore + CheckpointStore {
    /// Validate both staging and live connections.
    ///
    /// Failure here is fatal; the orchestrator aborts before any stage.
    async fn initialize(&self) -> StorageResult<()>;
}
