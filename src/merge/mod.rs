//! Merge Engine
//!
//! Folds repeated observations of the same entity or relationship, plus any
//! prior stored record, into one canonical record, and assembles the pending
//! upserts for a document into a [`GraphBatch`]. Persistence is the batch
//! writer's job; this module only computes records.

use crate::batch::GraphBatch;
use crate::config::MergeConfig;
use crate::domain::graph::{
    EdgeKey, EdgeObservation, EdgeRecord, NodeObservation, NodeRecord, UNKNOWN_ENTITY_TYPE,
    join_sorted_unique, split_field,
};
use crate::store::{GraphStore, StoreError};
use crate::summarize::Summarizer;
use crate::tokens::TokenService;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Merges raw observations into canonical records.
pub struct MergeEngine {
    summarizer: Arc<dyn Summarizer>,
    config: MergeConfig,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine").field("config", &self.config).finish()
    }
}

impl MergeEngine {
    pub fn new(summarizer: Arc<dyn Summarizer>, config: MergeConfig) -> Self {
        Self { summarizer, config }
    }

    // =========================================================================
    // Node Merge
    // =========================================================================

    /// Fold new observations of one entity, plus its stored record if any,
    /// into a single canonical record.
    ///
    /// The entity type is a majority vote over observations followed by the
    /// existing record, ties broken by first-seen order. Descriptions and
    /// source ids are deduplicated sorted joins.
    pub async fn merge_node(
        &self,
        name: &str,
        observations: &[NodeObservation],
        existing: Option<&NodeRecord>,
    ) -> NodeRecord {
        let type_votes = observations
            .iter()
            .map(|o| o.entity_type.as_deref().unwrap_or(UNKNOWN_ENTITY_TYPE))
            .chain(existing.map(|e| e.entity_type.as_str()));
        let entity_type = majority_vote(type_votes);

        let descriptions = observations
            .iter()
            .filter_map(|o| o.description.as_deref())
            .chain(existing.iter().flat_map(|e| split_field(&e.description)));
        let joined = join_sorted_unique(descriptions);
        let description = self.summarize_if_needed(name, joined).await;

        let source_ids = observations
            .iter()
            .filter_map(|o| o.source_id.as_deref())
            .flat_map(split_field)
            .chain(existing.iter().flat_map(|e| split_field(&e.source_id)));
        let source_id = join_sorted_unique(source_ids);

        NodeRecord {
            entity_type,
            description,
            source_id,
            // Only an explicit field update after an embedding write may set
            // this; the merge path always re-emits the stored value.
            has_vector: existing.is_some_and(|e| e.has_vector),
        }
    }

    // =========================================================================
    // Edge Merge
    // =========================================================================

    /// Fold new observations of one relationship, plus its stored record if
    /// any, into a single canonical record.
    ///
    /// Weight accumulates by summation, order takes the minimum (default 1),
    /// and the relation type keeps the first non-null value among the new
    /// observations, falling back to the existing record, then to the
    /// configured default label.
    pub async fn merge_edge(
        &self,
        src: &str,
        tgt: &str,
        observations: &[EdgeObservation],
        existing: Option<&EdgeRecord>,
    ) -> EdgeRecord {
        let weight = observations
            .iter()
            .map(|o| o.weight.unwrap_or(1.0))
            .sum::<f64>()
            + existing.map_or(0.0, |e| e.weight);

        let order = observations
            .iter()
            .map(|o| o.order.unwrap_or(1))
            .chain(existing.map(|e| e.order))
            .min()
            .unwrap_or(1);

        let relation_type = observations
            .iter()
            .find_map(|o| o.relation_type.clone())
            .or_else(|| existing.and_then(|e| e.relation_type.clone()))
            .or_else(|| Some(self.config.default_relation_type.clone()));

        let descriptions = observations
            .iter()
            .filter_map(|o| o.description.as_deref())
            .chain(existing.iter().flat_map(|e| split_field(&e.description)));
        let joined = join_sorted_unique(descriptions);
        let description = self
            .summarize_if_needed(&format!("({src}, {tgt})"), joined)
            .await;

        let source_ids = observations
            .iter()
            .filter_map(|o| o.source_id.as_deref())
            .flat_map(split_field)
            .chain(existing.iter().flat_map(|e| split_field(&e.source_id)));
        let source_id = join_sorted_unique(source_ids);

        EdgeRecord {
            weight,
            description,
            source_id,
            order,
            relation_type,
        }
    }

    // =========================================================================
    // Batch Assembly
    // =========================================================================

    /// Merge a document's worth of observations against the store and
    /// assemble the resulting upserts into one batch.
    ///
    /// Edge observations are grouped by unordered endpoint pair first, so
    /// `(A, B)` and `(B, A)` entries in the same document fold into one
    /// record; the lexicographically first ordered key present supplies the
    /// stored orientation for a new edge. Edge endpoints that exist neither
    /// in the store nor in this batch get placeholder records so the edge
    /// upsert never dangles. Keys are processed in sorted order so identical
    /// inputs produce identical batches.
    pub async fn merge_observations(
        &self,
        store: &dyn GraphStore,
        node_observations: &HashMap<String, Vec<NodeObservation>>,
        edge_observations: &HashMap<(String, String), Vec<EdgeObservation>>,
    ) -> Result<GraphBatch, StoreError> {
        let mut batch = GraphBatch::new();

        let mut node_names: Vec<&String> = node_observations.keys().collect();
        node_names.sort();
        for name in node_names {
            let existing = store.get_node(name).await?;
            let merged = self
                .merge_node(name, &node_observations[name], existing.as_ref())
                .await;
            batch.push_node(name.clone(), merged);
        }

        let mut grouped: BTreeMap<EdgeKey, ((String, String), Vec<EdgeObservation>)> =
            BTreeMap::new();
        let mut ordered_keys: Vec<&(String, String)> = edge_observations.keys().collect();
        ordered_keys.sort();
        for key @ (src, tgt) in ordered_keys {
            let entry = grouped
                .entry(EdgeKey::new(src.as_str(), tgt.as_str()))
                .or_insert_with(|| ((src.clone(), tgt.clone()), Vec::new()));
            entry.1.extend(edge_observations[key].iter().cloned());
        }

        for ((src, tgt), observations) in grouped.into_values() {
            let (src, tgt) = (&src, &tgt);
            let existing = store.get_edge(src, tgt).await?;
            let merged = self
                .merge_edge(src, tgt, &observations, existing.as_ref())
                .await;

            for endpoint in [src, tgt] {
                if !batch.contains_node(endpoint) && !store.has_node(endpoint).await? {
                    batch.push_node(
                        endpoint.clone(),
                        NodeRecord::placeholder(merged.description.clone(), merged.source_id.clone()),
                    );
                }
            }

            batch.push_edge(src.clone(), tgt.clone(), merged);
        }

        Ok(batch)
    }

    /// Summarize a joined description once it exceeds the trigger budget.
    /// A failed summarizer call falls back to the truncated joined text.
    async fn summarize_if_needed(&self, id: &str, joined: String) -> String {
        if TokenService::count(&joined) <= self.config.summary_trigger_tokens {
            return joined;
        }

        let truncated = TokenService::truncate(&joined, self.config.summary_input_tokens);
        match self
            .summarizer
            .summarize(id, &truncated, self.config.summary_output_tokens)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(id, error = %e, "description summarization failed, keeping truncated join");
                truncated
            }
        }
    }
}

/// Stable count-then-insertion-order selection: the candidate with the most
/// votes wins, ties go to the earliest first appearance.
fn majority_vote<'a>(candidates: impl Iterator<Item = &'a str>) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for candidate in candidates {
        if !counts.contains_key(candidate) {
            order.push(candidate);
        }
        *counts.entry(candidate).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for candidate in order {
        let count = counts[candidate];
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((candidate, count));
        }
    }

    best.map_or_else(|| UNKNOWN_ENTITY_TYPE.to_string(), |(t, _)| t.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::FIELD_SEPARATOR;
    use crate::summarize::SummarizeError;
    use async_trait::async_trait;

    struct EchoSummarizer;

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(
            &self,
            _id: &str,
            _text: &str,
            _max_tokens: usize,
        ) -> Result<String, SummarizeError> {
            Ok("summarized".to_string())
        }

        async fn summarize_report(&self, _prompt: &str) -> Result<String, SummarizeError> {
            Err(SummarizeError::Call("unused".into()))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(
            &self,
            _id: &str,
            _text: &str,
            _max_tokens: usize,
        ) -> Result<String, SummarizeError> {
            Err(SummarizeError::Call("model down".into()))
        }

        async fn summarize_report(&self, _prompt: &str) -> Result<String, SummarizeError> {
            Err(SummarizeError::Call("model down".into()))
        }
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(Arc::new(EchoSummarizer), MergeConfig::default())
    }

    fn node_obs(entity_type: &str, description: &str, source: &str) -> NodeObservation {
        NodeObservation {
            entity_type: Some(entity_type.to_string()),
            description: Some(description.to_string()),
            source_id: Some(source.to_string()),
        }
    }

    #[test]
    fn test_majority_vote_prefers_count_then_insertion_order() {
        assert_eq!(majority_vote(["A", "B", "B"].into_iter()), "B");
        assert_eq!(majority_vote(["A", "B"].into_iter()), "A");
        assert_eq!(majority_vote(std::iter::empty()), UNKNOWN_ENTITY_TYPE);
    }

    #[tokio::test]
    async fn test_merge_node_votes_joins_and_unions() {
        let merged = engine()
            .merge_node(
                "ADA",
                &[
                    node_obs("PERSON", "a mathematician", "chunk-1"),
                    node_obs("PERSON", "wrote the first program", "chunk-2"),
                    node_obs("CONCEPT", "a mathematician", "chunk-1"),
                ],
                None,
            )
            .await;

        assert_eq!(merged.entity_type, "PERSON");
        assert_eq!(
            merged.description,
            format!("a mathematician{FIELD_SEPARATOR}wrote the first program")
        );
        assert_eq!(
            merged.source_id,
            format!("chunk-1{FIELD_SEPARATOR}chunk-2")
        );
        assert!(!merged.has_vector);
    }

    #[tokio::test]
    async fn test_merge_node_is_idempotent_against_itself() {
        let eng = engine();
        let first = eng
            .merge_node("ADA", &[node_obs("PERSON", "a mathematician", "chunk-1")], None)
            .await;
        let again = eng.merge_node("ADA", &[], Some(&first)).await;
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_merge_node_defaults_missing_fields() {
        let merged = engine()
            .merge_node("X", &[NodeObservation::default()], None)
            .await;
        assert_eq!(merged.entity_type, UNKNOWN_ENTITY_TYPE);
        assert!(merged.description.is_empty());
        assert!(merged.source_id.is_empty());
    }

    #[tokio::test]
    async fn test_merge_edge_sums_weight_and_takes_min_order() {
        let merged = engine()
            .merge_edge(
                "A",
                "B",
                &[
                    EdgeObservation {
                        weight: Some(1.0),
                        order: Some(1),
                        ..Default::default()
                    },
                    EdgeObservation {
                        weight: Some(1.0),
                        order: Some(2),
                        ..Default::default()
                    },
                ],
                None,
            )
            .await;

        assert_eq!(merged.weight, 2.0);
        assert_eq!(merged.order, 1);
    }

    #[tokio::test]
    async fn test_merge_edge_relation_type_precedence() {
        let eng = engine();

        let existing = EdgeRecord {
            weight: 1.0,
            description: String::new(),
            source_id: String::new(),
            order: 1,
            relation_type: Some("supports".to_string()),
        };

        let merged = eng
            .merge_edge("A", "B", &[EdgeObservation::default()], Some(&existing))
            .await;
        assert_eq!(merged.relation_type.as_deref(), Some("supports"));

        let merged = eng
            .merge_edge(
                "A",
                "B",
                &[EdgeObservation {
                    relation_type: Some("blocks".to_string()),
                    ..Default::default()
                }],
                None,
            )
            .await;
        assert_eq!(merged.relation_type.as_deref(), Some("blocks"));

        let merged = eng.merge_edge("A", "B", &[EdgeObservation::default()], None).await;
        assert_eq!(merged.relation_type.as_deref(), Some("related"));
    }

    #[tokio::test]
    async fn test_long_description_triggers_summarizer() {
        let eng = MergeEngine::new(
            Arc::new(EchoSummarizer),
            MergeConfig {
                summary_trigger_tokens: 5,
                ..MergeConfig::default()
            },
        );

        let merged = eng
            .merge_node(
                "X",
                &[node_obs(
                    "PERSON",
                    "a very long description with many tokens that overflows the tiny budget",
                    "chunk-1",
                )],
                None,
            )
            .await;
        assert_eq!(merged.description, "summarized");
    }

    #[tokio::test]
    async fn test_failed_summarizer_falls_back_to_truncated_join() {
        let eng = MergeEngine::new(
            Arc::new(FailingSummarizer),
            MergeConfig {
                summary_trigger_tokens: 5,
                summary_input_tokens: 8,
                ..MergeConfig::default()
            },
        );

        let long = "a very long description with many tokens that overflows the tiny budget";
        let merged = eng.merge_node("X", &[node_obs("PERSON", long, "c")], None).await;
        assert!(long.starts_with(&merged.description));
        assert!(TokenService::count(&merged.description) <= 8);
    }

    #[tokio::test]
    async fn test_merge_observations_synthesizes_placeholders() {
        use crate::store::{GraphStore, MemoryGraphStore};

        let store = MemoryGraphStore::new();
        store
            .upsert_node(
                "A",
                NodeRecord {
                    entity_type: "PERSON".to_string(),
                    description: "known".to_string(),
                    source_id: "chunk-0".to_string(),
                    has_vector: false,
                },
            )
            .await
            .unwrap();

        let nodes = HashMap::new();
        let mut edges = HashMap::new();
        edges.insert(
            ("A".to_string(), "B".to_string()),
            vec![EdgeObservation {
                description: Some("a knows b".to_string()),
                source_id: Some("chunk-1".to_string()),
                ..Default::default()
            }],
        );

        let batch = engine()
            .merge_observations(&store, &nodes, &edges)
            .await
            .unwrap();

        // Only the unknown endpoint gets a placeholder.
        assert_eq!(batch.node_count(), 1);
        let (name, placeholder) = &batch.nodes()[0];
        assert_eq!(name, "B");
        assert_eq!(placeholder.entity_type, UNKNOWN_ENTITY_TYPE);
        assert!(!placeholder.has_vector);
        assert_eq!(batch.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_reversed_duplicate_edges_fold_into_one_record() {
        use crate::store::MemoryGraphStore;

        let store = MemoryGraphStore::new();

        let mut edges = HashMap::new();
        edges.insert(
            ("A".to_string(), "B".to_string()),
            vec![EdgeObservation {
                weight: Some(1.0),
                description: Some("a to b".to_string()),
                source_id: Some("chunk-1".to_string()),
                ..Default::default()
            }],
        );
        edges.insert(
            ("B".to_string(), "A".to_string()),
            vec![EdgeObservation {
                weight: Some(1.0),
                description: Some("b to a".to_string()),
                source_id: Some("chunk-2".to_string()),
                ..Default::default()
            }],
        );

        let batch = engine()
            .merge_observations(&store, &HashMap::new(), &edges)
            .await
            .unwrap();

        // Both orientations merge under the unordered key; the first ordered
        // key supplies the stored direction.
        assert_eq!(batch.edge_count(), 1);
        let (src, tgt, record) = &batch.edges()[0];
        assert_eq!((src.as_str(), tgt.as_str()), ("A", "B"));
        assert_eq!(record.weight, 2.0);
        assert_eq!(
            record.description,
            format!("a to b{FIELD_SEPARATOR}b to a")
        );
        assert_eq!(
            record.source_id,
            format!("chunk-1{FIELD_SEPARATOR}chunk-2")
        );
    }
}
