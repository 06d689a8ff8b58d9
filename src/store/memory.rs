//! In-Memory Reference Backend
//!
//! The bundled [`GraphStore`] implementation. Backs the test suite and small
//! single-process deployments; remote backends implement the same trait.
//!
//! Transactionality: `execute_batch` stages the chunk against a copy of the
//! graph and swaps it in on success, so a failed chunk leaves no partial
//! writes behind.

use crate::batch::GraphBatch;
use crate::domain::graph::{EdgeKey, EdgeRecord, NodeRecord};
use crate::store::{GraphSnapshot, GraphStore, NodeFieldUpdate, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// An edge in its immutable stored orientation.
#[derive(Debug, Clone)]
struct StoredEdge {
    source: String,
    target: String,
    record: EdgeRecord,
}

#[derive(Debug, Clone, Default)]
struct GraphInner {
    nodes: HashMap<String, NodeRecord>,
    edges: HashMap<EdgeKey, StoredEdge>,
    assignments: HashMap<String, Vec<String>>,
}

impl GraphInner {
    fn upsert_node(&mut self, name: &str, record: NodeRecord) {
        self.nodes.insert(name.to_string(), record);
    }

    /// Replace the edge record wholesale. If the unordered pair already
    /// exists, the stored orientation is kept — directions are never
    /// inverted, even when the incoming upsert arrived flipped.
    fn upsert_edge(&mut self, src: &str, tgt: &str, record: EdgeRecord) {
        for endpoint in [src, tgt] {
            if !self.nodes.contains_key(endpoint) {
                self.nodes.insert(
                    endpoint.to_string(),
                    NodeRecord::placeholder(record.description.clone(), record.source_id.clone()),
                );
            }
        }

        let key = EdgeKey::new(src, tgt);
        match self.edges.get_mut(&key) {
            Some(stored) => stored.record = record,
            None => {
                self.edges.insert(
                    key,
                    StoredEdge {
                        source: src.to_string(),
                        target: tgt.to_string(),
                        record,
                    },
                );
            }
        }
    }

    fn degree(&self, name: &str) -> usize {
        self.edges
            .values()
            .filter(|e| e.source == name || e.target == name)
            .count()
    }
}

/// In-memory graph store guarded by a single async RwLock.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    inner: RwLock<GraphInner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, StoreError> {
        Ok(self.inner.read().await.nodes.get(name).cloned())
    }

    async fn get_edge(&self, src: &str, tgt: &str) -> Result<Option<EdgeRecord>, StoreError> {
        let key = EdgeKey::new(src, tgt);
        Ok(self
            .inner
            .read()
            .await
            .edges
            .get(&key)
            .map(|e| e.record.clone()))
    }

    async fn has_node(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.inner.read().await.nodes.contains_key(name))
    }

    async fn has_edge(&self, src: &str, tgt: &str) -> Result<bool, StoreError> {
        let key = EdgeKey::new(src, tgt);
        Ok(self.inner.read().await.edges.contains_key(&key))
    }

    async fn upsert_node(&self, name: &str, record: NodeRecord) -> Result<(), StoreError> {
        self.inner.write().await.upsert_node(name, record);
        Ok(())
    }

    async fn upsert_edge(
        &self,
        src: &str,
        tgt: &str,
        record: EdgeRecord,
    ) -> Result<(), StoreError> {
        self.inner.write().await.upsert_edge(src, tgt, record);
        Ok(())
    }

    async fn execute_batch(&self, chunk: &GraphBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        // Stage against a copy, swap on success. Nodes land before edges so
        // edge upserts see their endpoints.
        let mut staged = inner.clone();
        for (name, record) in chunk.nodes() {
            staged.upsert_node(name, record.clone());
        }
        for (src, tgt, record) in chunk.edges() {
            staged.upsert_edge(src, tgt, record.clone());
        }

        debug!(
            nodes = chunk.node_count(),
            edges = chunk.edge_count(),
            "committed batch chunk"
        );
        *inner = staged;
        Ok(())
    }

    async fn node_degrees_batch(&self, names: &[String]) -> Result<Vec<usize>, StoreError> {
        let inner = self.inner.read().await;
        Ok(names.iter().map(|n| inner.degree(n)).collect())
    }

    async fn edge_degrees_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<usize>, StoreError> {
        let inner = self.inner.read().await;
        Ok(pairs
            .iter()
            .map(|(src, tgt)| inner.degree(src) + inner.degree(tgt))
            .collect())
    }

    async fn update_node_field(
        &self,
        names: &[String],
        update: NodeFieldUpdate,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut matched = 0;
        for name in names {
            if let Some(node) = inner.nodes.get_mut(name) {
                match &update {
                    NodeFieldUpdate::HasVector(value) => node.has_vector = *value,
                }
                matched += 1;
            }
        }
        Ok(matched)
    }

    async fn graph_snapshot(&self) -> Result<GraphSnapshot, StoreError> {
        let inner = self.inner.read().await;

        let mut nodes: Vec<(String, NodeRecord)> = inner
            .nodes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut edges: Vec<(String, String, EdgeRecord)> = inner
            .edges
            .values()
            .map(|e| (e.source.clone(), e.target.clone(), e.record.clone()))
            .collect();
        edges.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        Ok(GraphSnapshot { nodes, edges })
    }

    async fn apply_cluster_assignments(
        &self,
        assignments: &HashMap<String, Vec<String>>,
    ) -> Result<(), StoreError> {
        self.inner.write().await.assignments = assignments.clone();
        Ok(())
    }

    async fn cluster_assignments(&self) -> Result<HashMap<String, Vec<String>>, StoreError> {
        Ok(self.inner.read().await.assignments.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
