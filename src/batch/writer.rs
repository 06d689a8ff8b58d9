//! Retrying Batch Writer
//!
//! Drains a [`GraphBatch`] into the graph store chunk by chunk. Each chunk is
//! one store transaction; transient failures are retried with bounded
//! exponential backoff, fatal failures abort the remaining chunks of the
//! batch while earlier chunk commits stand.

use crate::batch::GraphBatch;
use crate::config::BatchConfig;
use crate::domain::graph::sanitize_type_label;
use crate::store::{GraphStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Retry Policy
// =============================================================================

/// Explicit retry policy for transactional chunk writes: attempt bound,
/// backoff curve, and the retryable-error predicate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Whether a further attempt is allowed after `error` on attempt number
    /// `attempt` (1-based).
    pub fn should_retry(&self, error: &StoreError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Backoff before retry number `attempt` (1-based), doubling per attempt
    /// and capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// =============================================================================
// Write Report
// =============================================================================

/// Aggregated outcome of draining one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub chunks_committed: usize,
    pub nodes_written: usize,
    pub edges_written: usize,
    pub retries: u32,
}

// =============================================================================
// Batch Writer
// =============================================================================

/// Executes batches against the store under the configured retry policy and
/// chunk size. Independent batches may run concurrently via
/// [`BatchWriter::execute_many`]; chunks within one batch always run
/// sequentially.
pub struct BatchWriter {
    store: Arc<dyn GraphStore>,
    policy: RetryPolicy,
    max_chunk_size: usize,
    write_concurrency: usize,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("policy", &self.policy)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("write_concurrency", &self.write_concurrency)
            .finish()
    }
}

impl BatchWriter {
    pub fn new(store: Arc<dyn GraphStore>, config: &BatchConfig) -> Self {
        Self {
            store,
            policy: config.retry_policy(),
            // A zero chunk size from config must not panic the chunker.
            max_chunk_size: config.max_chunk_size.max(1),
            write_concurrency: config.write_concurrency.max(1),
        }
    }

    /// Drain one batch: chunks execute sequentially, each as a single
    /// transaction. The `has_vector` flag is never touched here — records
    /// pass through exactly as merged.
    pub async fn execute(
        &self,
        batch: GraphBatch,
        cancel: &CancellationToken,
    ) -> Result<WriteReport, StoreError> {
        let chunks = batch.chunk(self.max_chunk_size);
        let mut report = WriteReport::default();

        for (index, chunk) in chunks.iter().enumerate() {
            let chunk = Self::group_nodes_by_label(chunk);
            self.execute_chunk(&chunk, index, cancel, &mut report)
                .await?;
            report.chunks_committed += 1;
            report.nodes_written += chunk.node_count();
            report.edges_written += chunk.edge_count();
        }

        info!(
            chunks = report.chunks_committed,
            nodes = report.nodes_written,
            edges = report.edges_written,
            retries = report.retries,
            "batch drained"
        );
        Ok(report)
    }

    /// Drain independent batches concurrently, bounded by the configured
    /// write concurrency. Results come back in input order; one batch
    /// failing does not cancel its siblings.
    pub async fn execute_many(
        &self,
        batches: Vec<GraphBatch>,
        cancel: &CancellationToken,
    ) -> Vec<Result<WriteReport, StoreError>> {
        let semaphore = Arc::new(Semaphore::new(self.write_concurrency));

        let tasks = batches.into_iter().map(|batch| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| StoreError::Cancelled)?;
                self.execute(batch, cancel).await
            }
        });

        futures::future::join_all(tasks).await
    }

    async fn execute_chunk(
        &self,
        chunk: &GraphBatch,
        index: usize,
        cancel: &CancellationToken,
        report: &mut WriteReport,
    ) -> Result<(), StoreError> {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            attempt += 1;

            let result = tokio::select! {
                () = cancel.cancelled() => Err(StoreError::Cancelled),
                result = self.store.execute_batch(chunk) => result,
            };

            match result {
                Ok(()) => {
                    debug!(chunk = index, attempt, "chunk committed");
                    return Ok(());
                }
                Err(e) if self.policy.should_retry(&e, attempt) => {
                    // The store rolled the attempt back; the same chunk is
                    // safe to replay.
                    report.retries += 1;
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        chunk = index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient write failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(chunk = index, attempt, error = %e, "chunk write aborted");
                    return Err(e);
                }
            }
        }
    }

    /// Stable-reorder a chunk's node upserts so upserts sharing a sanitized
    /// type label are issued together. Edge order is untouched.
    fn group_nodes_by_label(chunk: &GraphBatch) -> GraphBatch {
        let mut by_label: HashMap<String, Vec<usize>> = HashMap::new();
        let mut label_order: Vec<String> = Vec::new();

        for (i, (_, record)) in chunk.nodes().iter().enumerate() {
            let label = sanitize_type_label(&record.entity_type);
            if !by_label.contains_key(&label) {
                label_order.push(label.clone());
            }
            by_label.entry(label).or_default().push(i);
        }

        let mut grouped = GraphBatch::new();
        for label in label_order {
            for &i in &by_label[&label] {
                let (name, record) = &chunk.nodes()[i];
                grouped.push_node(name.clone(), record.clone());
            }
        }
        for (src, tgt, record) in chunk.edges() {
            grouped.push_edge(src.clone(), tgt.clone(), record.clone());
        }
        grouped
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::NodeRecord;
    use crate::store::MemoryGraphStore;

    fn node(entity_type: &str) -> NodeRecord {
        NodeRecord {
            entity_type: entity_type.to_string(),
            description: "d".to_string(),
            source_id: "chunk-1".to_string(),
            has_vector: false,
        }
    }

    #[test]
    fn test_retry_policy_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_policy_only_retries_transient() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&StoreError::Transient("blip".into()), 1));
        assert!(!policy.should_retry(&StoreError::Fatal("schema".into()), 1));
        assert!(!policy.should_retry(&StoreError::Transient("blip".into()), 3));
        assert!(!policy.should_retry(&StoreError::Cancelled, 1));
    }

    #[test]
    fn test_group_nodes_by_label_is_stable() {
        let mut chunk = GraphBatch::new();
        chunk.push_node("A", node("person"));
        chunk.push_node("B", node("place"));
        chunk.push_node("C", node("person"));

        let grouped = BatchWriter::group_nodes_by_label(&chunk);
        let names: Vec<&str> = grouped.nodes().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A", "C", "B"]);
    }

    #[tokio::test]
    async fn test_execute_writes_all_chunks() {
        let store = Arc::new(MemoryGraphStore::new());
        let writer = BatchWriter::new(
            Arc::clone(&store) as Arc<dyn GraphStore>,
            &BatchConfig {
                max_chunk_size: 2,
                ..BatchConfig::default()
            },
        );

        let mut batch = GraphBatch::new();
        for i in 0..5 {
            batch.push_node(format!("N{i}"), node("person"));
        }

        let report = writer
            .execute(batch, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.chunks_committed, 3);
        assert_eq!(report.nodes_written, 5);
        assert!(store.has_node("N4").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_from_config_is_clamped() {
        let store = Arc::new(MemoryGraphStore::new());
        let writer = BatchWriter::new(
            Arc::clone(&store) as Arc<dyn GraphStore>,
            &BatchConfig {
                max_chunk_size: 0,
                ..BatchConfig::default()
            },
        );

        let mut batch = GraphBatch::new();
        batch.push_node("N0", node("person"));
        batch.push_node("N1", node("person"));

        let report = writer
            .execute(batch, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.chunks_committed, 2);
        assert!(store.has_node("N1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_write() {
        let store = Arc::new(MemoryGraphStore::new());
        let writer = BatchWriter::new(
            Arc::clone(&store) as Arc<dyn GraphStore>,
            &BatchConfig::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut batch = GraphBatch::new();
        batch.push_node("N0", node("person"));

        let err = writer.execute(batch, &cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}
