//! Batched Graph Writes
//!
//! [`GraphBatch`] accumulates the pending upserts produced by one merge pass
//! over a document; [`writer::BatchWriter`] drains it into the store in
//! size-bounded transactional chunks.

use crate::domain::graph::{EdgeRecord, NodeRecord};

pub mod writer;

pub use writer::{BatchWriter, RetryPolicy, WriteReport};

/// Ordered accumulator of pending node and edge upserts.
///
/// Created per document/extraction unit, populated by the merge engine,
/// consumed exactly once by the batch writer, then discarded.
#[derive(Debug, Clone, Default)]
pub struct GraphBatch {
    nodes: Vec<(String, NodeRecord)>,
    edges: Vec<(String, String, EdgeRecord)>,
}

impl GraphBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a node upsert. Order is preserved through chunking.
    pub fn push_node(&mut self, name: impl Into<String>, record: NodeRecord) {
        self.nodes.push((name.into(), record));
    }

    /// Queue an edge upsert in its stored orientation.
    pub fn push_edge(
        &mut self,
        src: impl Into<String>,
        tgt: impl Into<String>,
        record: EdgeRecord,
    ) {
        self.edges.push((src.into(), tgt.into(), record));
    }

    pub fn nodes(&self) -> &[(String, NodeRecord)] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(String, String, EdgeRecord)] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Whether a node upsert for `name` is already queued.
    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|(n, _)| n == name)
    }

    /// Partition into sequential chunks of at most `max_size` nodes and
    /// `max_size` edges each, preserving insertion order.
    ///
    /// Nodes and edges are partitioned independently; an empty batch yields
    /// exactly one empty chunk.
    pub fn chunk(&self, max_size: usize) -> Vec<GraphBatch> {
        assert!(max_size > 0, "chunk size must be positive");

        let node_chunks = self.nodes.len().div_ceil(max_size);
        let edge_chunks = self.edges.len().div_ceil(max_size);
        let count = node_chunks.max(edge_chunks).max(1);

        (0..count)
            .map(|i| {
                let lo = i * max_size;
                let node_hi = (lo + max_size).min(self.nodes.len());
                let edge_hi = (lo + max_size).min(self.edges.len());

                GraphBatch {
                    nodes: self.nodes.get(lo..node_hi).unwrap_or_default().to_vec(),
                    edges: self.edges.get(lo..edge_hi).unwrap_or_default().to_vec(),
                }
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::UNKNOWN_ENTITY_TYPE;

    fn node() -> NodeRecord {
        NodeRecord {
            entity_type: UNKNOWN_ENTITY_TYPE.to_string(),
            description: String::new(),
            source_id: String::new(),
            has_vector: false,
        }
    }

    fn edge() -> EdgeRecord {
        EdgeRecord {
            weight: 1.0,
            description: String::new(),
            source_id: String::new(),
            order: 1,
            relation_type: None,
        }
    }

    #[test]
    fn test_chunk_partitions_nodes_and_edges_independently() {
        let mut batch = GraphBatch::new();
        for i in 0..25 {
            batch.push_node(format!("N{i}"), node());
        }
        for i in 0..15 {
            batch.push_edge(format!("N{i}"), format!("N{}", i + 1), edge());
        }

        let chunks = batch.chunk(10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(GraphBatch::node_count).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(
            chunks.iter().map(GraphBatch::edge_count).collect::<Vec<_>>(),
            vec![10, 5, 0]
        );
    }

    #[test]
    fn test_chunk_preserves_insertion_order() {
        let mut batch = GraphBatch::new();
        for i in 0..12 {
            batch.push_node(format!("N{i}"), node());
        }

        let chunks = batch.chunk(5);
        let flattened: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.nodes().iter().map(|(n, _)| n.as_str()))
            .collect();
        let expected: Vec<String> = (0..12).map(|i| format!("N{i}")).collect();
        assert_eq!(flattened, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_batch_yields_one_empty_chunk() {
        let chunks = GraphBatch::new().chunk(10);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }
}
