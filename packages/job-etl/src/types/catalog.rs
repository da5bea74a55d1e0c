//! Reference data - the capability catalog and skill taxonomy groups.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Proficiency scale for a capability, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProficiencyLevel {
    Foundational,
    Intermediate,
    Adept,
    Advanced,
    HighlyAdvanced,
}

impl ProficiencyLevel {
    /// Every level in ascending order.
    pub const ALL: [ProficiencyLevel; 5] = [
        ProficiencyLevel::Foundational,
        ProficiencyLevel::Intermediate,
        ProficiencyLevel::Adept,
        ProficiencyLevel::Advanced,
        ProficiencyLevel::HighlyAdvanced,
    ];

    /// Parse a level label as written by a model or a database row.
    ///
    /// Accepts `"highly advanced"`, `"Highly-Advanced"` and `"highly_advanced"`.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "foundational" => Some(Self::Foundational),
            "intermediate" => Some(Self::Intermediate),
            "adept" => Some(Self::Adept),
            "advanced" => Some(Self::Advanced),
            "highly_advanced" => Some(Self::HighlyAdvanced),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foundational => "foundational",
            Self::Intermediate => "intermediate",
            Self::Adept => "adept",
            Self::Advanced => "advanced",
            Self::HighlyAdvanced => "highly_advanced",
        }
    }
}

impl std::fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability in the organisational competency catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    /// Stable identifier
    pub id: String,

    pub name: String,

    pub description: String,

    /// Capability group (e.g. "Shapes strategic thinking")
    pub group: String,

    /// Precomputed embedding of [`Self::embedding_text`]
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,

    /// SHA-256 of the text the stored embedding was computed from.
    ///
    /// `None` for embeddings written before hashes were recorded; those are
    /// trusted as-is.
    #[serde(default)]
    pub embedding_hash: Option<String>,
}

impl CapabilityDefinition {
    /// Create a catalog entry without an embedding.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            group: group.into(),
            embedding: None,
            embedding_hash: None,
        }
    }

    /// Attach a stored embedding without a content hash.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Attach an embedding together with the hash of its source text.
    pub fn with_hashed_embedding(mut self, embedding: Vec<f32>, hash: impl Into<String>) -> Self {
        self.embedding = Some(embedding);
        self.embedding_hash = Some(hash.into());
        self
    }

    /// Text submitted to the embedding model.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.name, self.description)
    }

    /// SHA-256 of [`Self::embedding_text`].
    pub fn content_hash(&self) -> String {
        hash_text(&self.embedding_text())
    }

    /// The stored embedding, if it is still valid for the current text and
    /// has `dimensions` components.
    ///
    /// Vectors of another size come from a different model and are never
    /// reused, hashed or not.
    pub fn valid_embedding(&self, dimensions: usize) -> Option<&[f32]> {
        let embedding = self.embedding.as_deref()?;
        if embedding.len() != dimensions {
            return None;
        }
        match &self.embedding_hash {
            Some(hash) if *hash != self.content_hash() => None,
            _ => Some(embedding),
        }
    }

    /// Whether the embedding is missing, the wrong size, or was computed
    /// from stale text.
    pub fn needs_embedding(&self, dimensions: usize) -> bool {
        self.valid_embedding(dimensions).is_none()
    }
}

/// A group used to classify skills extracted from a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyGroup {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,
}

impl TaxonomyGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// SHA-256 hex digest of a string.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
