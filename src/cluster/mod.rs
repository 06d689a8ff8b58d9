//! Hierarchical Clustering
//!
//! The pluggable clustering seam and the engine that drives it: snapshot the
//! stored graph, run the selected routine, persist the per-node assignments,
//! and derive the nested community schema the report generator consumes.

use crate::config::ClusterConfig;
use crate::domain::community::CommunitySchema;
use crate::store::{GraphStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod leiden;

pub use leiden::LeidenClusterer;

/// Community id for a cluster at a hierarchy level. Level 0 is coarsest.
pub fn community_id(level: u32, cluster: usize) -> String {
    format!("{level}-{cluster}")
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The requested routine is not registered with the engine.
    #[error("unknown clustering algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The routine itself failed.
    #[error("clustering failed: {0}")]
    Algorithm(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Algorithm Seam
// =============================================================================

/// A clustering routine over a graph snapshot.
///
/// Implementations must be deterministic for a given snapshot and seed, and
/// must return one id path per node, ordered coarsest (level 0) to finest,
/// with every node's path the same length.
#[async_trait]
pub trait ClusterAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    async fn cluster(
        &self,
        snapshot: &crate::store::GraphSnapshot,
        seed: u64,
    ) -> Result<HashMap<String, Vec<String>>, ClusterError>;
}

// =============================================================================
// Cluster Engine
// =============================================================================

/// Runs a registered clustering routine against the store and derives the
/// community schema from the persisted assignments.
pub struct ClusterEngine {
    algorithms: HashMap<&'static str, Arc<dyn ClusterAlgorithm>>,
    config: ClusterConfig,
}

impl std::fmt::Debug for ClusterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEngine")
            .field("algorithms", &self.algorithms.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl ClusterEngine {
    /// Engine with the bundled routines registered.
    pub fn new(config: ClusterConfig) -> Self {
        let mut engine = Self {
            algorithms: HashMap::new(),
            config: config.clone(),
        };
        engine.register(Arc::new(LeidenClusterer::with_config(config)));
        engine
    }

    /// Register an additional routine under its own name.
    pub fn register(&mut self, algorithm: Arc<dyn ClusterAlgorithm>) {
        self.algorithms.insert(algorithm.name(), algorithm);
    }

    /// Snapshot the graph, run the configured routine, and persist the
    /// resulting assignments. Replaces any previous run's assignments.
    pub async fn cluster(
        &self,
        store: &dyn GraphStore,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<String>>, ClusterError> {
        let algorithm = self
            .algorithms
            .get(self.config.algorithm.as_str())
            .ok_or_else(|| ClusterError::UnknownAlgorithm(self.config.algorithm.clone()))?;

        let snapshot = store.graph_snapshot().await?;

        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled.into());
        }
        let assignments = tokio::select! {
            () = cancel.cancelled() => return Err(StoreError::Cancelled.into()),
            result = algorithm.cluster(&snapshot, self.config.seed) => result?,
        };

        store.apply_cluster_assignments(&assignments).await?;
        info!(
            algorithm = %self.config.algorithm,
            nodes = assignments.len(),
            "cluster assignments persisted"
        );
        Ok(assignments)
    }

    /// Derive the nested community schema from the store's current
    /// assignments.
    ///
    /// Each community gets its member nodes, the induced edges in stored
    /// orientation, the union of member chunk ids, its occurrence share
    /// within its level, and the ids of the strictly deeper communities
    /// nested inside it.
    pub async fn derive_schema(
        &self,
        store: &dyn GraphStore,
    ) -> Result<BTreeMap<String, CommunitySchema>, ClusterError> {
        let assignments = store.cluster_assignments().await?;
        let snapshot = store.graph_snapshot().await?;

        let chunk_ids_of: HashMap<&str, BTreeSet<String>> = snapshot
            .nodes
            .iter()
            .map(|(name, record)| {
                (
                    name.as_str(),
                    record
                        .source_chunk_ids()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                )
            })
            .collect();

        let mut schema: BTreeMap<String, CommunitySchema> = BTreeMap::new();
        for (node, path) in &assignments {
            for (depth, id) in path.iter().enumerate() {
                let community = schema.entry(id.clone()).or_insert_with(|| CommunitySchema {
                    level: depth as u32,
                    title: format!("Cluster {id}"),
                    nodes: BTreeSet::new(),
                    edges: BTreeSet::new(),
                    sub_communities: Vec::new(),
                    occurrence: 0.0,
                    chunk_ids: BTreeSet::new(),
                });
                community.nodes.insert(node.clone());
                if let Some(chunks) = chunk_ids_of.get(node.as_str()) {
                    community.chunk_ids.extend(chunks.iter().cloned());
                }
            }
        }

        // Induced edges, stored orientation only.
        for (src, tgt, _) in &snapshot.edges {
            for community in schema.values_mut() {
                if community.nodes.contains(src) && community.nodes.contains(tgt) {
                    community.edges.insert((src.clone(), tgt.clone()));
                }
            }
        }

        // Occurrence: chunk coverage relative to the widest community of the
        // same level.
        let mut level_max: HashMap<u32, usize> = HashMap::new();
        for community in schema.values() {
            let max = level_max.entry(community.level).or_insert(0);
            *max = (*max).max(community.chunk_ids.len());
        }
        for community in schema.values_mut() {
            let max = level_max.get(&community.level).copied().unwrap_or(0);
            community.occurrence = if max == 0 {
                0.0
            } else {
                community.chunk_ids.len() as f64 / max as f64
            };
        }

        // Sub-communities: any strictly deeper community fully contained in
        // this one.
        let members: Vec<(String, u32, BTreeSet<String>)> = schema
            .iter()
            .map(|(id, c)| (id.clone(), c.level, c.nodes.clone()))
            .collect();
        for community in schema.values_mut() {
            community.sub_communities = members
                .iter()
                .filter(|(_, level, nodes)| {
                    *level > community.level && nodes.is_subset(&community.nodes)
                })
                .map(|(id, _, _)| id.clone())
                .collect();
        }

        Ok(schema)
    }
}

// =============================================================================
// Tests
// =============================================================================
