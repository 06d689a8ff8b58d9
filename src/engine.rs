//! Engine Facade
//!
//! Wires the merge engine, batch writer, cluster engine, and report packer
//! behind one entry point. Embedding applications construct this once with
//! their store, report store, and summarizer implementations.

use crate::batch::{BatchWriter, WriteReport};
use crate::cluster::{ClusterEngine, ClusterError};
use crate::config::EngineConfig;
use crate::domain::community::CommunitySchema;
use crate::domain::graph::{EdgeObservation, NodeObservation, normalize_entity_name};
use crate::merge::MergeEngine;
use crate::report::{ReportPacker, ReportRunStats, ReportStore};
use crate::store::{GraphStore, NodeFieldUpdate, StoreError};
use crate::summarize::Summarizer;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// The assembled engine.
pub struct GraphRagEngine {
    store: Arc<dyn GraphStore>,
    merger: MergeEngine,
    writer: BatchWriter,
    clusterer: ClusterEngine,
    packer: ReportPacker,
}

impl std::fmt::Debug for GraphRagEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRagEngine").finish_non_exhaustive()
    }
}

impl GraphRagEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn GraphStore>,
        reports: Arc<dyn ReportStore>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            merger: MergeEngine::new(Arc::clone(&summarizer), config.merge.clone()),
            writer: BatchWriter::new(Arc::clone(&store), &config.batch),
            clusterer: ClusterEngine::new(config.cluster.clone()),
            packer: ReportPacker::new(
                Arc::clone(&store),
                reports,
                summarizer,
                config.report.clone(),
            ),
            store,
        }
    }

    /// Merge one document's observations into the stored graph.
    ///
    /// Entity names are normalized here, so callers may pass raw extraction
    /// output. Merging reads the store, so concurrent ingests of overlapping
    /// entities should go through separate documents only when their key sets
    /// are disjoint.
    pub async fn ingest(
        &self,
        node_observations: HashMap<String, Vec<NodeObservation>>,
        edge_observations: HashMap<(String, String), Vec<EdgeObservation>>,
        cancel: &CancellationToken,
    ) -> Result<WriteReport, EngineError> {
        let mut nodes: HashMap<String, Vec<NodeObservation>> = HashMap::new();
        for (name, observations) in node_observations {
            nodes
                .entry(normalize_entity_name(&name))
                .or_default()
                .extend(observations);
        }

        let mut edges: HashMap<(String, String), Vec<EdgeObservation>> = HashMap::new();
        for ((src, tgt), observations) in edge_observations {
            edges
                .entry((normalize_entity_name(&src), normalize_entity_name(&tgt)))
                .or_default()
                .extend(observations);
        }

        let batch = self
            .merger
            .merge_observations(self.store.as_ref(), &nodes, &edges)
            .await?;
        info!(
            nodes = batch.node_count(),
            edges = batch.edge_count(),
            "merged observations into batch"
        );

        Ok(self.writer.execute(batch, cancel).await?)
    }

    /// Cluster the stored graph and generate a report per community.
    ///
    /// Returns the derived schema alongside the report run outcome.
    pub async fn summarize_communities(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(BTreeMap<String, CommunitySchema>, ReportRunStats), EngineError> {
        self.clusterer.cluster(self.store.as_ref(), cancel).await?;
        let schema = self.clusterer.derive_schema(self.store.as_ref()).await?;
        let stats = self.packer.generate_reports(&schema, cancel).await?;
        Ok((schema, stats))
    }

    /// Record that embeddings were written for the named entities. This is
    /// the only path that sets `has_vector`.
    pub async fn mark_embedded(&self, names: &[String]) -> Result<usize, EngineError> {
        Ok(self
            .store
            .update_node_field(names, NodeFieldUpdate::HasVector(true))
            .await?)
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }
}
