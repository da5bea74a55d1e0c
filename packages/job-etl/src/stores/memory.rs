//! In-memory repository for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::traits::store::{CheckpointStore, RecordStore, ReferenceData, Repository};
use crate::types::{
    catalog::{CapabilityDefinition, ProficiencyLevel, TaxonomyGroup},
    record::{skill_key, EnrichedRecord},
};

/// A stored (role, capability) link.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityLink {
    pub level: ProficiencyLevel,
    pub relevance: f32,
    pub embedding: Vec<f32>,
}

/// A stored (role, skill) link. The key is the normalized skill.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillLink {
    pub skill: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
struct Environment {
    records: HashMap<String, EnrichedRecord>,
    capability_links: HashMap<(String, String), CapabilityLink>,
    skill_links: HashMap<(String, String), SkillLink>,
}

impl Environment {
    /// Replace the record and every link of its role.
    fn upsert(&mut self, record: &EnrichedRecord) {
        let role = record.role_id().to_string();
        self.capability_links.retain(|(r, _), _| *r != role);
        self.skill_links.retain(|(r, _), _| *r != role);

        let embeddings: HashMap<&str, &Vec<f32>> = record
            .embeddings
            .capabilities
            .iter()
            .map(|e| (e.key.as_str(), &e.vector))
            .collect();
        for capability in &record.capabilities {
            self.capability_links.insert(
                (role.clone(), capability.capability_id.clone()),
                CapabilityLink {
                    level: capability.level,
                    relevance: capability.relevance,
                    embedding: embeddings
                        .get(capability.capability_id.as_str())
                        .map(|v| v.to_vec())
                        .unwrap_or_default(),
                },
            );
        }

        for skill in &record.embeddings.skills {
            self.skill_links.insert(
                (role.clone(), skill_key(&skill.key)),
                SkillLink {
                    skill: skill.key.clone(),
                    embedding: skill.vector.clone(),
                },
            );
        }

        self.records
            .insert(record.listing_id().to_string(), record.clone());
    }
}

/// In-memory staging/live repository.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart. Failures can be injected for initialization
/// and for individual listings.
pub struct MemoryRepository {
    catalog: RwLock<Vec<CapabilityDefinition>>,
    groups: RwLock<Vec<TaxonomyGroup>>,
    staging: RwLock<Environment>,
    live: RwLock<Environment>,
    checkpoints: RwLock<HashMap<String, DateTime<Utc>>>,
    upserts: RwLock<Vec<String>>,
    failing_records: RwLock<HashSet<String>>,
    fail_initialize: AtomicBool,
    embedding_writes: AtomicUsize,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Vec::new()),
            groups: RwLock::new(Vec::new()),
            staging: RwLock::new(Environment::default()),
            live: RwLock::new(Environment::default()),
            checkpoints: RwLock::new(HashMap::new()),
            upserts: RwLock::new(Vec::new()),
            failing_records: RwLock::new(HashSet::new()),
            fail_initialize: AtomicBool::new(false),
            embedding_writes: AtomicUsize::new(0),
        }
    }

    pub fn with_catalog(self, catalog: Vec<CapabilityDefinition>) -> Self {
        *self.catalog.write().unwrap() = catalog;
        self
    }

    pub fn with_groups(self, groups: Vec<TaxonomyGroup>) -> Self {
        *self.groups.write().unwrap() = groups;
        self
    }

    pub fn with_checkpoint(self, scope: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.checkpoints.write().unwrap().insert(scope.into(), at);
        self
    }

    /// Make [`Repository::initialize`] fail as if staging were unreachable.
    pub fn failing_initialize(self) -> Self {
        self.fail_initialize.store(true, Ordering::SeqCst);
        self
    }

    /// Make every upsert for `listing_id` fail.
    pub fn failing_record(self, listing_id: impl Into<String>) -> Self {
        self.failing_records
            .write()
            .unwrap()
            .insert(listing_id.into());
        self
    }

    /// Listing ids passed to `upsert_enriched_record`, in call order,
    /// including failed calls.
    pub fn upserted_ids(&self) -> Vec<String> {
        self.upserts.read().unwrap().clone()
    }

    /// Number of capability embeddings written.
    pub fn embedding_writes(&self) -> usize {
        self.embedding_writes.load(Ordering::SeqCst)
    }

    /// Get a staged record.
    pub fn record(&self, listing_id: &str) -> Option<EnrichedRecord> {
        self.staging.read().unwrap().records.get(listing_id).cloned()
    }

    /// Get the number of staged records.
    pub fn record_count(&self) -> usize {
        self.staging.read().unwrap().records.len()
    }

    /// Get the number of live records.
    pub fn live_record_count(&self) -> usize {
        self.live.read().unwrap().records.len()
    }

    /// Get the number of staged (role, capability) links.
    pub fn capability_link_count(&self) -> usize {
        self.staging.read().unwrap().capability_links.len()
    }

    /// Get the number of staged (role, skill) links.
    pub fn skill_link_count(&self) -> usize {
        self.staging.read().unwrap().skill_links.len()
    }

    pub fn capability_link(&self, role_id: &str, capability_id: &str) -> Option<CapabilityLink> {
        self.staging
            .read()
            .unwrap()
            .capability_links
            .get(&(role_id.to_string(), capability_id.to_string()))
            .cloned()
    }

    /// Stored checkpoint for a scope.
    pub fn checkpoint(&self, scope: &str) -> Option<DateTime<Utc>> {
        self.checkpoints.read().unwrap().get(scope).copied()
    }
}

#[async_trait]
impl ReferenceData for MemoryRepository {
    async fn get_capability_catalog(&self) -> StorageResult<Vec<CapabilityDefinition>> {
        Ok(self.catalog.read().unwrap().clone())
    }

    async fn get_taxonomy_groups(&self) -> StorageResult<Vec<TaxonomyGroup>> {
        Ok(self.groups.read().unwrap().clone())
    }

    async fn store_capability_embedding(
        &self,
        capability_id: &str,
        embedding: &[f32],
        content_hash: &str,
    ) -> StorageResult<()> {
        let mut catalog = self.catalog.write().unwrap();
        let capability = catalog
            .iter_mut()
            .find(|c| c.id == capability_id)
            .ok_or_else(|| StorageError::NotFound(format!("capability {}", capability_id)))?;
        capability.embedding = Some(embedding.to_vec());
        capability.embedding_hash = Some(content_hash.to_string());
        self.embedding_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRepository {
    async fn upsert_enriched_record(&self, record: &EnrichedRecord) -> StorageResult<()> {
        self.upserts
            .write()
            .unwrap()
            .push(record.listing_id().to_string());

        if self
            .failing_records
            .read()
            .unwrap()
            .contains(record.listing_id())
        {
            return Err(StorageError::Query(format!(
                "insert rejected for listing {}",
                record.listing_id()
            )));
        }

        self.staging.write().unwrap().upsert(record);
        Ok(())
    }

    async fn promote_to_live(&self) -> StorageResult<usize> {
        let staged: Vec<EnrichedRecord> = self
            .staging
            .read()
            .unwrap()
            .records
            .values()
            .cloned()
            .collect();

        let mut live = self.live.write().unwrap();
        for record in &staged {
            live.upsert(record);
        }
        Ok(staged.len())
    }
}

#[async_trait]
impl CheckpointStore for MemoryRepository {
    async fn get_last_checkpoint(&self, scope: &str) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self.checkpoint(scope))
    }

    async fn set_checkpoint(&self, scope: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.checkpoints
            .write()
            .unwrap()
            .insert(scope.to_string(), at);
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn initialize(&self) -> StorageResult<()> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(StorageError::Connectivity {
                environment: "staging",
                message: "connection refused".into(),
            });
        }
        Ok(())
    }
}
