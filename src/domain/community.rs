//! Community Domain Models
//!
//! The nested community schema derived from a clustering run, and the
//! structured reports generated for each community.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// Community Schema
// =============================================================================

/// One community in the derived hierarchy.
///
/// Invariants: every pair in `edges` has both endpoints in `nodes`; every
/// entry in `sub_communities` names a community at a strictly deeper level
/// whose node set is a subset of this one's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunitySchema {
    /// Hierarchy level (0 = coarsest).
    pub level: u32,
    /// Human-readable title.
    pub title: String,
    /// Member node ids.
    pub nodes: BTreeSet<String>,
    /// Induced edges, in stored orientation, with both endpoints inside
    /// `nodes`.
    pub edges: BTreeSet<(String, String)>,
    /// Ids of strictly deeper communities nested inside this one.
    pub sub_communities: Vec<String>,
    /// Share of this level's chunk coverage, in [0, 1].
    pub occurrence: f64,
    /// Union of the source chunk ids of the member nodes.
    pub chunk_ids: BTreeSet<String>,
}

// =============================================================================
// Structured Report
// =============================================================================

/// One finding inside a structured community report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Finding {
    pub summary: String,
    pub explanation: String,
}

/// Structured summarizer output for one community.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportJson {
    pub title: String,
    pub summary: String,
    pub rating: f64,
    pub rating_explanation: String,
    pub findings: Vec<Finding>,
}

impl ReportJson {
    /// Flatten the structured report into markdown.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n{}", self.title, self.summary);
        for finding in &self.findings {
            out.push_str("\n\n## ");
            out.push_str(&finding.summary);
            out.push_str("\n\n");
            out.push_str(&finding.explanation);
        }
        out
    }
}

/// A persisted community report, keyed by community id.
///
/// Created once per community per clustering run and immutable once
/// persisted; a new clustering run produces new records, never in-place
/// mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    /// Rendered markdown form.
    pub report_string: String,
    /// Structured form.
    pub report_json: ReportJson,
    /// Owning community schema fields.
    #[serde(flatten)]
    pub community: CommunitySchema,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_markdown_flattening() {
        let report = ReportJson {
            title: "Cluster 3".to_string(),
            summary: "A tightly knit group.".to_string(),
            rating: 7.5,
            rating_explanation: String::new(),
            findings: vec![Finding {
                summary: "Shared infrastructure".to_string(),
                explanation: "All members depend on the same registry.".to_string(),
            }],
        };

        let md = report.to_markdown();
        assert!(md.starts_with("# Cluster 3"));
        assert!(md.contains("## Shared infrastructure"));
        assert!(md.contains("same registry"));
    }

    #[test]
    fn test_report_json_defaults_tolerate_missing_fields() {
        let parsed: ReportJson = serde_json::from_str(r#"{"title": "T"}"#).unwrap();
        assert_eq!(parsed.title, "T");
        assert!(parsed.findings.is_empty());
        assert_eq!(parsed.rating, 0.0);
    }
}
