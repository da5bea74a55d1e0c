//! Listing types - summaries from the search pages and full details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A listing as it appears on a search-results page.
///
/// Created during enumeration and never modified afterwards. Only used
/// to locate the detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSummary {
    /// Source-assigned listing identifier
    pub id: String,

    /// Position title
    pub title: String,

    /// Hiring agency or organisational unit
    pub organisation: String,

    /// One or more work locations
    #[serde(default)]
    pub locations: Vec<String>,

    /// When the listing was posted
    pub posted_at: DateTime<Utc>,

    /// Application closing date, if published
    #[serde(default)]
    pub closes_at: Option<DateTime<Utc>>,

    /// Last modification time reported by the source
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,

    /// Reference to the detail page (absolute URL or path relative to the feed)
    pub detail_ref: String,
}

impl ListingSummary {
    /// Create a summary with the required fields.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        organisation: impl Into<String>,
        posted_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            detail_ref: format!("listings/{}", id),
            id,
            title: title.into(),
            organisation: organisation.into(),
            locations: Vec::new(),
            posted_at,
            closes_at: None,
            modified_at: None,
        }
    }

    /// Add a location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// Set the modification time.
    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// Set the closing date.
    pub fn with_closes_at(mut self, closes_at: DateTime<Utc>) -> Self {
        self.closes_at = Some(closes_at);
        self
    }

    /// Set the detail page reference.
    pub fn with_detail_ref(mut self, detail_ref: impl Into<String>) -> Self {
        self.detail_ref = detail_ref.into();
        self
    }

    /// Modification time used for incremental runs.
    ///
    /// Sources that never report a modification time fall back to the
    /// posting date.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.modified_at.unwrap_or(self.posted_at)
    }
}

/// Contact person for a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A document attached to a listing (position description, selection criteria).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDocument {
    /// Link to the document
    pub url: String,

    /// Document kind as labelled by the source
    #[serde(default)]
    pub doc_type: Option<String>,

    #[serde(default)]
    pub title: Option<String>,
}

/// Full listing as loaded from its detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDetail {
    #[serde(flatten)]
    pub summary: ListingSummary,

    /// Full position description
    pub description: String,

    #[serde(default)]
    pub responsibilities: Vec<String>,

    #[serde(default)]
    pub requirements: Vec<String>,

    #[serde(default)]
    pub contact: Option<Contact>,

    #[serde(default)]
    pub documents: Vec<ListingDocument>,
}

impl ListingDetail {
    /// Create a detail from a summary and its description.
    pub fn new(summary: ListingSummary, description: impl Into<String>) -> Self {
        Self {
            summary,
            description: description.into(),
            responsibilities: Vec::new(),
            requirements: Vec::new(),
            contact: None,
            documents: Vec::new(),
        }
    }

    /// Add responsibilities.
    pub fn with_responsibilities(
        mut self,
        items: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.responsibilities
            .extend(items.into_iter().map(|i| i.into()));
        self
    }

    /// Add requirements.
    pub fn with_requirements(mut self, items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requirements.extend(items.into_iter().map(|i| i.into()));
        self
    }

    /// Attach a document.
    pub fn with_document(mut self, document: ListingDocument) -> Self {
        self.documents.push(document);
        self
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn title(&self) -> &str {
        &self.summary.title
    }

    /// Text submitted to the embedding model for the whole job.
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{}\n\n{}", self.summary.title, self.description);
        for line in self.responsibilities.iter().chain(&self.requirements) {
            text.push('\n');
            text.push_str(line);
        }
        text
    }

    /// Text submitted to the classifier.
    pub fn analysis_text(&self) -> String {
        let mut text = format!(
            "Title: {}\nOrganisation: {}\nLocations: {}\n\n{}",
            self.summary.title,
            self.summary.organisation,
            self.summary.locations.join(", "),
            self.description
        );
        if !self.responsibilities.is_empty() {
            text.push_str("\n\nResponsibilities:\n- ");
            text.push_str(&self.responsibilities.join("\n- "));
        }
        if !self.requirements.is_empty() {
            text.push_str("\n\nRequirements:\n- ");
            text.push_str(&self.requirements.join("\n- "));
        }
        text
    }
}

/// One page of search results from the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    /// 1-based page number
    pub page: u32,

    /// Total number of pages the source reports
    pub total_pages: u32,

    pub items: Vec<ListingSummary>,
}

/// Summaries chosen by one enumeration, and what the record cap left out.
#[derive(Debug, Clone, Default)]
pub struct ListingSelection {
    /// Matching summaries in source order, at most the cap
    pub summaries: Vec<ListingSummary>,

    /// Modification times of matching listings seen after the cap was reached
    pub passed_over: Vec<DateTime<Utc>>,
}

impl ListingSelection {
    /// The cap left at least one matching listing behind.
    pub fn is_truncated(&self) -> bool {
        !self.passed_over.is_empty()
    }

    /// Earliest modification time a checkpoint must stay below because of
    /// listings the cap left out.
    ///
    /// Listings on pages never fetched are not considered; the bound holds
    /// when the source orders listings by modification time, in either
    /// direction.
    pub fn truncation_cutoff(&self) -> Option<DateTime<Utc>> {
        self.passed_over.iter().min().copied()
    }
}

/// Filter applied while enumerating listings.
///
/// Organisation and location allow-lists share one rule: an entry matches
/// when, trimmed, it appears anywhere in the listing's value ignoring case
/// (Unicode lowercase). A listing passes a list when any entry matches. An
/// empty list, or one holding only blank entries, matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingFilter {
    /// Only listings modified strictly after this instant
    pub modified_since: Option<DateTime<Utc>>,

    /// Only listings posted at or after this instant
    pub posted_from: Option<DateTime<Utc>>,

    /// Only listings posted at or before this instant
    pub posted_to: Option<DateTime<Utc>>,

    #[serde(default)]
    pub organisations: Vec<String>,

    #[serde(default)]
    pub locations: Vec<String>,
}

impl ListingFilter {
    /// Create an empty filter (matches all).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.modified_since = Some(since);
        self
    }

    pub fn with_organisations(mut self, orgs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.organisations = orgs.into_iter().map(|o| o.into()).collect();
        self
    }

    pub fn with_locations(mut self, locs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.locations = locs.into_iter().map(|l| l.into()).collect();
        self
    }

    /// Check whether a summary passes every clause of the filter.
    pub fn matches(&self, summary: &ListingSummary) -> bool {
        if let Some(since) = self.modified_since {
            if summary.last_modified() <= since {
                return false;
            }
        }
        if let Some(from) = self.posted_from {
            if summary.posted_at < from {
                return false;
            }
        }
        if let Some(to) = self.posted_to {
            if summary.posted_at > to {
                return false;
            }
        }
        if !allowed_by(&self.organisations, std::slice::from_ref(&summary.organisation)) {
            return false;
        }
        if !allowed_by(&self.locations, &summary.locations) {
            return false;
        }
        true
    }
}

fn allowed_by(allow_list: &[String], values: &[String]) -> bool {
    let needles: Vec<String> = allow_list
        .iter()
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect();
    if needles.is_empty() {
        return true;
    }
    values.iter().any(|value| {
        let value = value.to_lowercase();
        needles.iter().any(|needle| value.contains(needle.as_str()))
    })
}
