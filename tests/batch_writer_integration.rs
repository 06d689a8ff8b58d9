//! Batch writer integration tests: retry behavior, partial-progress
//! semantics, and concurrent independent batches against a real store.

use async_trait::async_trait;
use graphrag_engine::batch::{BatchWriter, GraphBatch};
use graphrag_engine::config::BatchConfig;
use graphrag_engine::domain::graph::{EdgeRecord, NodeRecord};
use graphrag_engine::store::{
    GraphSnapshot, GraphStore, MemoryGraphStore, NodeFieldUpdate, StoreError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Store wrapper that fails the first `failures` chunk transactions.
struct FlakyStore {
    inner: MemoryGraphStore,
    remaining_failures: AtomicUsize,
    fatal: bool,
}

impl FlakyStore {
    fn transient(failures: usize) -> Self {
        Self {
            inner: MemoryGraphStore::new(),
            remaining_failures: AtomicUsize::new(failures),
            fatal: false,
        }
    }

    fn fatal_after(successes_allowed: usize) -> Self {
        Self {
            inner: MemoryGraphStore::new(),
            remaining_failures: AtomicUsize::new(successes_allowed),
            fatal: true,
        }
    }
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn get_node(&self, name: &str) -> Result<Option<NodeRecord>, StoreError> {
        self.inner.get_node(name).await
    }

    async fn get_edge(&self, src: &str, tgt: &str) -> Result<Option<EdgeRecord>, StoreError> {
        self.inner.get_edge(src, tgt).await
    }

    async fn has_node(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.has_node(name).await
    }

    async fn has_edge(&self, src: &str, tgt: &str) -> Result<bool, StoreError> {
        self.inner.has_edge(src, tgt).await
    }

    async fn upsert_node(&self, name: &str, record: NodeRecord) -> Result<(), StoreError> {
        self.inner.upsert_node(name, record).await
    }

    async fn upsert_edge(&self, src: &str, tgt: &str, record: EdgeRecord) -> Result<(), StoreError> {
        self.inner.upsert_edge(src, tgt, record).await
    }

    async fn execute_batch(&self, chunk: &GraphBatch) -> Result<(), StoreError> {
        if self.fatal {
            // Succeed the first N chunks, then fail hard.
            if self.remaining_failures.fetch_sub(1, Ordering::SeqCst) == 0 {
                self.remaining_failures.store(0, Ordering::SeqCst);
                return Err(StoreError::Fatal("constraint violation".to_string()));
            }
        } else if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Transient("connection reset".to_string()));
        }
        self.inner.execute_batch(chunk).await
    }

    async fn node_degrees_batch(&self, names: &[String]) -> Result<Vec<usize>, StoreError> {
        self.inner.node_degrees_batch(names).await
    }

    async fn edge_degrees_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<usize>, StoreError> {
        self.inner.edge_degrees_batch(pairs).await
    }

    async fn update_node_field(
        &self,
        names: &[String],
        update: NodeFieldUpdate,
    ) -> Result<usize, StoreError> {
        self.inner.update_node_field(names, update).await
    }

    async fn graph_snapshot(&self) -> Result<GraphSnapshot, StoreError> {
        self.inner.graph_snapshot().await
    }

    async fn apply_cluster_assignments(
        &self,
        assignments: &HashMap<String, Vec<String>>,
    ) -> Result<(), StoreError> {
        self.inner.apply_cluster_assignments(assignments).await
    }

    async fn cluster_assignments(&self) -> Result<HashMap<String, Vec<String>>, StoreError> {
        self.inner.cluster_assignments().await
    }
}

fn node(name: &str) -> (String, NodeRecord) {
    (
        name.to_string(),
        NodeRecord {
            entity_type: "PERSON".to_string(),
            description: format!("about {name}"),
            source_id: "chunk-1".to_string(),
            has_vector: false,
        },
    )
}

fn batch_of(names: &[&str]) -> GraphBatch {
    let mut batch = GraphBatch::new();
    for name in names {
        let (n, record) = node(name);
        batch.push_node(n, record);
    }
    batch
}

fn fast_config(max_chunk_size: usize) -> BatchConfig {
    let mut config = BatchConfig {
        max_chunk_size,
        ..BatchConfig::default()
    };
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

#[tokio::test]
async fn test_transient_failures_are_retried_to_success() {
    let store = Arc::new(FlakyStore::transient(2));
    let writer = BatchWriter::new(Arc::clone(&store) as Arc<dyn GraphStore>, &fast_config(10));

    let report = writer
        .execute(batch_of(&["A", "B"]), &CancellationToken::new())
        .await
        .expect("writes should succeed after retries");

    assert_eq!(report.chunks_committed, 1);
    assert_eq!(report.retries, 2);
    assert!(store.has_node("A").await.unwrap());
}

#[tokio::test]
async fn test_exhausted_retries_surface_the_transient_error() {
    let store = Arc::new(FlakyStore::transient(10));
    let writer = BatchWriter::new(store as Arc<dyn GraphStore>, &fast_config(10));

    let err = writer
        .execute(batch_of(&["A"]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Transient(_)));
}

#[tokio::test]
async fn test_fatal_failure_keeps_earlier_chunk_commits() {
    let store = Arc::new(FlakyStore::fatal_after(1));
    let writer = BatchWriter::new(Arc::clone(&store) as Arc<dyn GraphStore>, &fast_config(2));

    // Three chunks of two; the second chunk hits the fatal error.
    let err = writer
        .execute(
            batch_of(&["A", "B", "C", "D", "E", "F"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Fatal(_)));
    assert!(store.has_node("A").await.unwrap());
    assert!(store.has_node("B").await.unwrap());
    assert!(!store.has_node("C").await.unwrap());
    assert!(!store.has_node("F").await.unwrap());
}

#[tokio::test]
async fn test_chunk_replay_is_idempotent() {
    let store = MemoryGraphStore::new();
    let batch = batch_of(&["A", "B"]);
    let chunk = &batch.chunk(10)[0];

    store.execute_batch(chunk).await.unwrap();
    let first = store.graph_snapshot().await.unwrap();

    store.execute_batch(chunk).await.unwrap();
    let second = store.graph_snapshot().await.unwrap();

    assert_eq!(first.nodes, second.nodes);
    assert_eq!(first.edges.len(), second.edges.len());
}

#[tokio::test]
async fn test_execute_many_returns_results_in_input_order() {
    let store = Arc::new(MemoryGraphStore::new());
    let writer = BatchWriter::new(store as Arc<dyn GraphStore>, &fast_config(10));

    let batches = vec![batch_of(&["A"]), batch_of(&["B", "C"]), batch_of(&[])];
    let results = writer
        .execute_many(batches, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().nodes_written, 1);
    assert_eq!(results[1].as_ref().unwrap().nodes_written, 2);
    assert_eq!(results[2].as_ref().unwrap().nodes_written, 0);
}
