//! Enriched records - the terminal artifact of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::catalog::ProficiencyLevel;
use crate::types::listing::ListingDetail;

/// A catalog capability matched to a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMatch {
    pub capability_id: String,

    pub name: String,

    pub group: String,

    /// Proficiency the role calls for
    pub level: ProficiencyLevel,

    /// Ranking score in [0, 1]
    pub relevance: f32,
}

/// Skill taxonomy classification of a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyClassification {
    #[serde(default)]
    pub technical_skills: Vec<String>,

    #[serde(default)]
    pub soft_skills: Vec<String>,

    /// Taxonomy group identifiers the listing falls under
    #[serde(default)]
    pub taxonomy_ids: Vec<String>,

    /// Role identifier links are keyed on
    pub role_id: String,
}

impl TaxonomyClassification {
    /// Distinct skill phrases, technical first, in first-seen order.
    ///
    /// Comparison ignores case and surrounding whitespace; the first
    /// spelling wins.
    pub fn distinct_skills(&self) -> Vec<String> {
        let mut seen = indexmap::IndexMap::new();
        for skill in self.technical_skills.iter().chain(&self.soft_skills) {
            let trimmed = skill.trim();
            if trimmed.is_empty() {
                continue;
            }
            seen.entry(skill_key(trimmed))
                .or_insert_with(|| trimmed.to_string());
        }
        seen.into_values().collect()
    }
}

/// Key a skill phrase is stored and deduplicated under.
pub fn skill_key(skill: &str) -> String {
    skill.trim().to_lowercase()
}

/// Output of the analyzer for one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Matched capabilities, most relevant first
    pub capabilities: Vec<CapabilityMatch>,

    pub taxonomy: TaxonomyClassification,
}

/// A vector tagged with what it embeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledEmbedding {
    /// Capability id or skill phrase
    pub key: String,

    pub vector: Vec<f32>,
}

impl LabeledEmbedding {
    pub fn new(key: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            key: key.into(),
            vector,
        }
    }
}

/// The three embedding sets attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordEmbeddings {
    /// Whole-listing embedding
    pub job: Vec<f32>,

    /// One per matched capability, keyed by capability id
    pub capabilities: Vec<LabeledEmbedding>,

    /// One per distinct skill phrase
    pub skills: Vec<LabeledEmbedding>,
}

/// Processing status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Bookkeeping stamped on every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub processed_at: DateTime<Utc>,

    pub pipeline_version: String,

    pub status: ProcessingStatus,
}

/// A listing with its classification and embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub listing: ListingDetail,

    pub capabilities: Vec<CapabilityMatch>,

    pub taxonomy: TaxonomyClassification,

    pub embeddings: RecordEmbeddings,

    pub metadata: ProcessingMetadata,
}

impl EnrichedRecord {
    pub fn listing_id(&self) -> &str {
        self.listing.id()
    }

    pub fn role_id(&self) -> &str {
        &self.taxonomy.role_id
    }

    /// Modification time the checkpoint advances to once this record is stored.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.listing.summary.last_modified()
    }
}
