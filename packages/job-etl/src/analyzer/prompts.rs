//! Prompts for listing classification.

use crate::types::catalog::{CapabilityDefinition, TaxonomyGroup};
use crate::types::listing::ListingDetail;

/// System prompt for capability and skill classification.
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You classify public-sector job listings.

Given a listing, a capability catalog and a list of skill taxonomy groups:
1. Pick the catalog capabilities the role requires. Use only ids from the catalog.
2. For each, give the proficiency level the role calls for
   (foundational, intermediate, adept, advanced, highly_advanced)
   and a relevance score between 0 and 1.
3. List the technical skills and the soft skills the listing asks for,
   as short phrases.
4. Name the taxonomy groups those skills fall under, using the group names given.

Answer with JSON matching the provided schema and nothing else."#;

/// User prompt listing the catalog, the taxonomy groups and the listing text.
pub fn format_classify_prompt(
    detail: &ListingDetail,
    catalog: &[CapabilityDefinition],
    groups: &[TaxonomyGroup],
) -> String {
    let capabilities = catalog
        .iter()
        .map(|c| format!("- {} | {} | {}: {}", c.id, c.group, c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    let taxonomy = groups
        .iter()
        .map(|g| match &g.description {
            Some(description) => format!("- {}: {}", g.name, description),
            None => format!("- {}", g.name),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Capability catalog (id | group | name: description):\n{}\n\nTaxonomy groups:\n{}\n\nListing:\n{}",
        capabilities,
        taxonomy,
        detail.analysis_text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::listing::ListingSummary;
    use chrono::Utc;

    #[test]
    fn test_prompt_includes_catalog_groups_and_listing() {
        let detail = ListingDetail::new(
            ListingSummary::new("JOB-1", "Data Analyst", "Treasury", Utc::now()),
            "Analyse fiscal data.",
        );
        let catalog = vec![CapabilityDefinition::new(
            "cap-1",
            "Thinks analytically",
            "Interprets data",
            "Strategic thinking",
        )];
        let groups = vec![TaxonomyGroup::new("grp-1", "Data and analytics")];

        let prompt = format_classify_prompt(&detail, &catalog, &groups);

        assert!(prompt.contains("cap-1 | Strategic thinking | Thinks analytically"));
        assert!(prompt.contains("- Data and analytics"));
        assert!(prompt.contains("Analyse fiscal data."));
    }
}
