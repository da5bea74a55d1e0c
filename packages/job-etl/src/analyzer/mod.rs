//! Enrichment analyzer.
//!
//! Wraps a [`LanguageModel`] with the retry policy, validates what the model
//! returns against the reference data, and applies the configured
//! [`CapabilitySelection`](crate::types::config::CapabilitySelection).

pub mod prompts;

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::error::AnalysisError;
use crate::retry::with_retry;
use crate::traits::ai::{ClassificationRequest, LanguageModel, RawClassification};
use crate::types::catalog::{CapabilityDefinition, ProficiencyLevel, TaxonomyGroup};
use crate::types::config::AnalyzerConfig;
use crate::types::listing::ListingDetail;
use crate::types::record::{CapabilityMatch, Classification, TaxonomyClassification};

pub use prompts::{format_classify_prompt, CLASSIFY_SYSTEM_PROMPT};

/// Level assigned when the model returns a label outside the scale.
const FALLBACK_LEVEL: ProficiencyLevel = ProficiencyLevel::Foundational;

/// Role identifier links are keyed on for a listing.
pub fn role_id_for(listing_id: &str) -> String {
    format!("role-{}", listing_id)
}

/// Capability and skill-taxonomy classifier.
pub struct Analyzer<M: LanguageModel> {
    model: M,
    config: AnalyzerConfig,
}

impl<M: LanguageModel> Analyzer<M> {
    pub fn new(model: M, config: AnalyzerConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Classify one listing against the catalog and taxonomy groups.
    #[instrument(skip_all, fields(listing_id = %detail.id()))]
    pub async fn classify(
        &self,
        detail: &ListingDetail,
        catalog: &[CapabilityDefinition],
        groups: &[TaxonomyGroup],
    ) -> Result<Classification, AnalysisError> {
        let request = ClassificationRequest {
            listing_id: detail.id().to_string(),
            model: self.config.model.clone(),
            system_prompt: CLASSIFY_SYSTEM_PROMPT.to_string(),
            user_prompt: format_classify_prompt(detail, catalog, groups),
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        };

        let raw = with_retry(&self.config.retry, detail.id(), || self.model.classify(&request))
            .await
            .map_err(|failure| AnalysisError {
                listing_id: detail.id().to_string(),
                attempts: failure.attempts,
                source: failure.error,
            })?;

        let classification = self.resolve(detail.id(), raw, catalog, groups);
        debug!(
            capabilities = classification.capabilities.len(),
            skills = classification.taxonomy.technical_skills.len()
                + classification.taxonomy.soft_skills.len(),
            "Listing classified"
        );
        Ok(classification)
    }

    /// Turn a raw model answer into a validated classification.
    ///
    /// Unknown capability ids and group names are dropped, relevance is
    /// clamped to [0, 1], duplicate capabilities keep their best score.
    fn resolve(
        &self,
        listing_id: &str,
        raw: RawClassification,
        catalog: &[CapabilityDefinition],
        groups: &[TaxonomyGroup],
    ) -> Classification {
        let by_id: HashMap<&str, &CapabilityDefinition> =
            catalog.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut best: HashMap<String, CapabilityMatch> = HashMap::new();
        for item in raw.capabilities {
            let Some(capability) = by_id
                .get(item.capability_id.trim())
                .copied()
                .or_else(|| {
                    catalog
                        .iter()
                        .find(|c| c.name.eq_ignore_ascii_case(item.capability_id.trim()))
                })
            else {
                debug!(capability_id = %item.capability_id, "Dropping unknown capability");
                continue;
            };

            let level = ProficiencyLevel::from_label(&item.level).unwrap_or(FALLBACK_LEVEL);
            let relevance = clamp_relevance(item.relevance);
            let candidate = CapabilityMatch {
                capability_id: capability.id.clone(),
                name: capability.name.clone(),
                group: capability.group.clone(),
                level,
                relevance,
            };

            best.entry(capability.id.clone())
                .and_modify(|existing| {
                    if candidate.relevance > existing.relevance {
                        *existing = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }

        let mut matches: Vec<_> = best.into_values().collect();
        // Stable tie-break so equal scores select deterministically
        matches.sort_by(|a, b| a.capability_id.cmp(&b.capability_id));
        let capabilities = self.config.selection.select(matches);

        let mut taxonomy_ids: Vec<String> = Vec::new();
        for name in &raw.taxonomy_groups {
            let name = name.trim();
            if let Some(group) = groups
                .iter()
                .find(|g| g.id == name || g.name.eq_ignore_ascii_case(name))
            {
                if !taxonomy_ids.contains(&group.id) {
                    taxonomy_ids.push(group.id.clone());
                }
            }
        }

        Classification {
            capabilities,
            taxonomy: TaxonomyClassification {
                technical_skills: clean_skills(raw.technical_skills),
                soft_skills: clean_skills(raw.soft_skills),
                taxonomy_ids,
                role_id: role_id_for(listing_id),
            },
        }
    }
}

fn clamp_relevance(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn clean_skills(skills: Vec<String>) -> Vec<String> {
    skills
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::testing::{sample_catalog, sample_detail, sample_groups, MockLanguageModel};
    use crate::traits::ai::RawCapabilityMatch;
    use crate::types::config::{CapabilitySelection, RetryPolicy};

    fn raw(id: &str, level: &str, relevance: f32) -> RawCapabilityMatch {
        RawCapabilityMatch {
            capability_id: id.into(),
            level: level.into(),
            relevance,
        }
    }

    fn analyzer(model: MockLanguageModel) -> Analyzer<MockLanguageModel> {
        Analyzer::new(
            model,
            AnalyzerConfig::default()
                .with_retry(RetryPolicy::immediate(3))
                .with_selection(CapabilitySelection::All),
        )
    }

    #[tokio::test]
    async fn test_classify_validates_model_output() {
        let detail = sample_detail("JOB-1");
        let model = MockLanguageModel::new().with_response(
            "JOB-1",
            RawClassification {
                capabilities: vec![
                    raw("cap-1", "Adept", 0.4),
                    raw("cap-404", "adept", 0.9),
                    raw("cap-2", "guru", 1.7),
                    raw("cap-1", "advanced", 0.8),
                ],
                technical_skills: vec!["SQL".into(), "  ".into()],
                soft_skills: vec!["Teamwork".into()],
                taxonomy_groups: vec!["data and analytics".into(), "Unknown".into()],
            },
        );
        let analyzer = analyzer(model);

        let result = analyzer
            .classify(&detail, &sample_catalog(4), &sample_groups())
            .await
            .unwrap();

        assert_eq!(result.capabilities.len(), 2);
        assert_eq!(result.capabilities[0].capability_id, "cap-2");
        assert_eq!(result.capabilities[0].relevance, 1.0);
        assert_eq!(result.capabilities[0].level, ProficiencyLevel::Foundational);
        assert_eq!(result.capabilities[1].capability_id, "cap-1");
        assert_eq!(result.capabilities[1].level, ProficiencyLevel::Advanced);
        assert_eq!(result.taxonomy.technical_skills, vec!["SQL".to_string()]);
        assert_eq!(result.taxonomy.taxonomy_ids, vec!["grp-data".to_string()]);
        assert_eq!(result.taxonomy.role_id, "role-JOB-1");
    }

    #[tokio::test]
    async fn test_classify_uses_fixed_temperature() {
        let model = MockLanguageModel::new();
        let analyzer = analyzer(model);

        analyzer
            .classify(&sample_detail("JOB-1"), &sample_catalog(2), &sample_groups())
            .await
            .unwrap();

        let requests = analyzer.model().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, 0.0);
    }

    #[tokio::test]
    async fn test_classify_retries_then_fails_with_listing_id() {
        let model = MockLanguageModel::new().failing_for("JOB-3", ProviderError::Timeout);
        let analyzer = analyzer(model);

        let err = analyzer
            .classify(&sample_detail("JOB-3"), &sample_catalog(2), &sample_groups())
            .await
            .unwrap_err();

        assert_eq!(err.listing_id, "JOB-3");
        assert_eq!(err.attempts, 3);
        assert_eq!(analyzer.model().calls_for("JOB-3"), 3);
    }

    #[tokio::test]
    async fn test_selection_policy_limits_matches() {
        let model = MockLanguageModel::new().with_response(
            "JOB-1",
            RawClassification {
                capabilities: vec![raw("cap-0", "adept", 0.3), raw("cap-1", "adept", 0.9)],
                ..Default::default()
            },
        );
        let analyzer = Analyzer::new(
            model,
            AnalyzerConfig::default().with_selection(CapabilitySelection::TopN { n: 1 }),
        );

        let result = analyzer
            .classify(&sample_detail("JOB-1"), &sample_catalog(3), &sample_groups())
            .await
            .unwrap();

        assert_eq!(result.capabilities.len(), 1);
        assert_eq!(result.capabilities[0].capability_id, "cap-1");
    }
}
