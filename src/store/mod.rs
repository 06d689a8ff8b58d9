//! Graph Store Contract
//!
//! Capability trait every graph backend must implement, plus the typed error
//! taxonomy the retrying write path keys off. Concrete remote backends live
//! outside this crate; [`memory::MemoryGraphStore`] is the bundled reference
//! backend.

use crate::batch::GraphBatch;
use crate::domain::graph::{EdgeRecord, NodeRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryGraphStore;

// =============================================================================
// Error Taxonomy
// =============================================================================

/// Errors surfaced by graph store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Worth retrying: network blip, lock contention, leader election.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Not worth retrying: schema violation, auth failure, corrupt input.
    #[error("fatal store error: {0}")]
    Fatal(String),

    /// The caller's cancellation token fired mid-operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Whether the retry policy may re-attempt after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

// =============================================================================
// Field Updates
// =============================================================================

/// A single-field update applied outside the batched write path.
///
/// The only field updatable this way today is `has_vector`: the write path
/// creates nodes with `has_vector = false` and only an explicit update after
/// a successful embedding write may flip it.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeFieldUpdate {
    HasVector(bool),
}

// =============================================================================
// Graph Snapshot
// =============================================================================

/// A point-in-time copy of the stored graph, consumed by the clustering and
/// schema-derivation paths.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    /// All nodes, keyed by normalized name.
    pub nodes: Vec<(String, NodeRecord)>,
    /// All edges in stored orientation.
    pub edges: Vec<(String, String, EdgeRecord)>,
}

// =============================================================================
// Store Contract
// =============================================================================

/// Contract every graph backend must expose.
///
/// Sessions must support concurrent independent transactions;
/// `execute_batch` is all-or-nothing for the chunk it is given, applying
/// node upserts before edge upserts. Upserts replace record properties
/// wholesale — records arriving here are already merged, and in-store
/// accumulation would double-count weights and descriptions.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, StoreError>;

    /// Look up an edge by endpoint pair. Lookup is direction-agnostic; the
    /// returned record belongs to whatever orientation was stored first.
    async fn get_edge(&self, src: &str, tgt: &str) -> Result<Option<EdgeRecord>, StoreError>;

    async fn has_node(&self, name: &str) -> Result<bool, StoreError>;

    async fn has_edge(&self, src: &str, tgt: &str) -> Result<bool, StoreError>;

    async fn upsert_node(&self, name: &str, record: NodeRecord) -> Result<(), StoreError>;

    async fn upsert_edge(
        &self,
        src: &str,
        tgt: &str,
        record: EdgeRecord,
    ) -> Result<(), StoreError>;

    /// Apply one chunk as a single transaction: all node upserts, then all
    /// edge upserts, committed together or not at all.
    async fn execute_batch(&self, chunk: &GraphBatch) -> Result<(), StoreError>;

    /// Degree per node name, direction-agnostic.
    async fn node_degrees_batch(&self, names: &[String]) -> Result<Vec<usize>, StoreError>;

    /// Combined endpoint degree per edge pair, direction-agnostic.
    async fn edge_degrees_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<usize>, StoreError>;

    /// Apply a field update to each named node; returns how many matched.
    async fn update_node_field(
        &self,
        names: &[String],
        update: NodeFieldUpdate,
    ) -> Result<usize, StoreError>;

    /// Point-in-time copy of the whole graph.
    async fn graph_snapshot(&self) -> Result<GraphSnapshot, StoreError>;

    /// Persist per-node community assignments (coarsest level first).
    async fn apply_cluster_assignments(
        &self,
        assignments: &HashMap<String, Vec<String>>,
    ) -> Result<(), StoreError>;

    /// The assignments from the most recent clustering run.
    async fn cluster_assignments(&self) -> Result<HashMap<String, Vec<String>>, StoreError>;
}
