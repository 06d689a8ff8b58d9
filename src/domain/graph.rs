//! Graph Domain Models
//!
//! Canonical node and edge records, the raw observation shapes produced by
//! upstream extraction, and the field-serialization helpers shared by the
//! merge and write paths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reserved separator used when serializing multi-valued fields
/// (descriptions, source chunk ids) into a single string.
pub const FIELD_SEPARATOR: &str = "<SEP>";

/// Entity type assigned to nodes that were never independently extracted.
pub const UNKNOWN_ENTITY_TYPE: &str = "UNKNOWN";

// =============================================================================
// Name / Label Normalization
// =============================================================================

/// Normalize an entity name for use as a graph key.
///
/// Keys are case-normalized so that repeated observations of the same entity
/// under different casings fold into one record.
pub fn normalize_entity_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Sanitize an entity type into a label safe for store-side grouping.
///
/// Non-alphanumeric characters collapse to underscores; an empty or fully
/// degenerate label falls back to [`UNKNOWN_ENTITY_TYPE`].
pub fn sanitize_type_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        UNKNOWN_ENTITY_TYPE.to_string()
    } else {
        cleaned
    }
}

// =============================================================================
// Multi-Valued Field Helpers
// =============================================================================

/// Split a separator-serialized field back into its non-empty parts.
pub fn split_field(value: &str) -> impl Iterator<Item = &str> {
    value.split(FIELD_SEPARATOR).filter(|s| !s.is_empty())
}

/// Join string parts into a deduplicated, alphabetically sorted,
/// separator-serialized field.
pub fn join_sorted_unique<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let unique: BTreeSet<&str> = parts.into_iter().filter(|s| !s.is_empty()).collect();
    unique.into_iter().collect::<Vec<_>>().join(FIELD_SEPARATOR)
}

// =============================================================================
// Canonical Records
// =============================================================================

/// Canonical record for one entity, keyed by its normalized name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Entity type classification (majority vote across observations).
    pub entity_type: String,
    /// Deduplicated join of all contributing descriptions.
    pub description: String,
    /// Set of contributing chunk ids, serialized with [`FIELD_SEPARATOR`].
    pub source_id: String,
    /// True only once a caller has successfully written this node's embedding.
    /// Never set by the write path itself.
    #[serde(default)]
    pub has_vector: bool,
}

impl NodeRecord {
    /// Build a placeholder record for a node that exists only because an edge
    /// references it. Distinguishable from extracted entities by
    /// `entity_type == UNKNOWN` and `has_vector == false`.
    pub fn placeholder(description: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            entity_type: UNKNOWN_ENTITY_TYPE.to_string(),
            description: description.into(),
            source_id: source_id.into(),
            has_vector: false,
        }
    }

    /// Contributing chunk ids as a set.
    pub fn source_chunk_ids(&self) -> BTreeSet<&str> {
        split_field(&self.source_id).collect()
    }
}

/// Canonical record for one relationship.
///
/// The merge key is the unordered endpoint pair, but the stored
/// `(source, target)` direction and `relation_type` are immutable once
/// written and are never inverted by any code path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Relationship strength, accumulated by summation across merges.
    pub weight: f64,
    /// Deduplicated join of all contributing descriptions.
    pub description: String,
    /// Set of contributing chunk ids, serialized with [`FIELD_SEPARATOR`].
    pub source_id: String,
    /// Extraction order, minimum across merges.
    #[serde(default = "default_order")]
    pub order: u32,
    /// Typed label; first non-null value wins and is kept thereafter.
    #[serde(default)]
    pub relation_type: Option<String>,
}

fn default_order() -> u32 {
    1
}

impl EdgeRecord {
    /// Contributing chunk ids as a set.
    pub fn source_chunk_ids(&self) -> BTreeSet<&str> {
        split_field(&self.source_id).collect()
    }
}

// =============================================================================
// Unordered Edge Key
// =============================================================================

/// Unordered endpoint pair used for merge grouping and degree accounting.
///
/// Only the *accounting* is direction-agnostic; stored records keep their
/// original orientation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    a: String,
    b: String,
}

impl EdgeKey {
    /// Build the canonical unordered key for an endpoint pair.
    pub fn new(x: impl Into<String>, y: impl Into<String>) -> Self {
        let (x, y) = (x.into(), y.into());
        if x <= y { Self { a: x, b: y } } else { Self { a: y, b: x } }
    }

    /// The endpoints in canonical (sorted) order.
    pub fn endpoints(&self) -> (&str, &str) {
        (&self.a, &self.b)
    }
}

// =============================================================================
// Raw Observations
// =============================================================================

/// One raw observation of an entity, as produced by upstream extraction.
///
/// Missing fields default rather than fail; malformed observations are the
/// producer's responsibility and are not re-validated here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeObservation {
    pub entity_type: Option<String>,
    pub description: Option<String>,
    pub source_id: Option<String>,
}

/// One raw observation of a relationship.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeObservation {
    pub weight: Option<f64>,
    pub description: Option<String>,
    pub source_id: Option<String>,
    pub order: Option<u32>,
    pub relation_type: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_entity_name() {
        assert_eq!(normalize_entity_name("  ada lovelace "), "ADA LOVELACE");
        assert_eq!(normalize_entity_name("Turing"), "TURING");
    }

    #[test]
    fn test_sanitize_type_label() {
        assert_eq!(sanitize_type_label("person"), "PERSON");
        assert_eq!(sanitize_type_label("geo political"), "GEO_POLITICAL");
        assert_eq!(sanitize_type_label("  "), UNKNOWN_ENTITY_TYPE);
        assert_eq!(sanitize_type_label("---"), UNKNOWN_ENTITY_TYPE);
    }

    #[test]
    fn test_join_sorted_unique_dedups_and_sorts() {
        let joined = join_sorted_unique(["b", "a", "b", ""]);
        assert_eq!(joined, format!("a{FIELD_SEPARATOR}b"));
    }

    #[test]
    fn test_split_field_roundtrip() {
        let joined = join_sorted_unique(["chunk-2", "chunk-1"]);
        let parts: Vec<&str> = split_field(&joined).collect();
        assert_eq!(parts, vec!["chunk-1", "chunk-2"]);
    }

    #[test]
    fn test_edge_key_is_unordered() {
        assert_eq!(EdgeKey::new("B", "A"), EdgeKey::new("A", "B"));
        assert_eq!(EdgeKey::new("A", "B").endpoints(), ("A", "B"));
    }

    #[test]
    fn test_placeholder_is_distinguishable() {
        let node = NodeRecord::placeholder("from edge", "chunk-1");
        assert_eq!(node.entity_type, UNKNOWN_ENTITY_TYPE);
        assert!(!node.has_vector);
    }
}
