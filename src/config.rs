//! Engine Configuration
//!
//! A typed configuration struct threaded explicitly through the engine
//! components — there is no ambient global configuration. Loaded from
//! built-in defaults, an optional YAML file, and `GRAPHRAG_`-prefixed
//! environment variables (`GRAPHRAG_BATCH__MAX_CHUNK_SIZE=200`).

use crate::batch::RetryPolicy;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub merge: MergeConfig,
    pub batch: BatchConfig,
    pub cluster: ClusterConfig,
    pub report: ReportConfig,
}

/// Merge-path knobs: when description summarization triggers and how the
/// text is capped before the summarizer call.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MergeConfig {
    /// Joined descriptions longer than this many tokens get summarized.
    pub summary_trigger_tokens: usize,
    /// Cheap-pass cap applied to the joined text before the summarizer call.
    pub summary_input_tokens: usize,
    /// Token budget handed to the summarizer for its output.
    pub summary_output_tokens: usize,
    /// Label assigned to edges that never carried a typed relation.
    pub default_relation_type: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            summary_trigger_tokens: 500,
            summary_input_tokens: 2000,
            summary_output_tokens: 500,
            default_relation_type: "related".to_string(),
        }
    }
}

/// Write-path knobs: chunk size, concurrency across independent batches, and
/// the retry policy for transactional chunk writes.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum nodes (and, independently, edges) per transactional chunk.
    pub max_chunk_size: usize,
    /// How many independent batches may write concurrently.
    pub write_concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 500,
            write_concurrency: 4,
            retry: RetryConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Materialize the retry policy for the batch writer.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

/// Clustering knobs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    /// Name of the clustering routine to invoke (only "leiden" is bundled).
    pub algorithm: String,
    /// Deterministic seed for the clustering routine.
    pub seed: u64,
    /// Maximum hierarchy depth.
    pub max_levels: usize,
    /// Local-moving iteration cap per level.
    pub max_iterations: usize,
    /// Resolution parameter (higher = smaller communities).
    pub resolution: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            algorithm: "leiden".to_string(),
            seed: 0xF00D,
            max_levels: 3,
            max_iterations: 100,
            resolution: 1.0,
        }
    }
}

/// Report-packing knobs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReportConfig {
    /// Token ceiling for one packed community description.
    pub token_budget: usize,
    /// Concurrent report generations within one level (0 = CPU count).
    pub concurrency: usize,
    /// Node count above which a community consumes child reports.
    pub large_community_nodes: usize,
    /// Edge count above which a community consumes child reports.
    pub large_community_edges: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            token_budget: 12000,
            concurrency: 8,
            large_community_nodes: 100,
            large_community_edges: 100,
        }
    }
}

impl ReportConfig {
    /// Effective within-level concurrency.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            num_cpus::get()
        } else {
            self.concurrency
        }
    }
}

impl EngineConfig {
    /// Load from defaults, an optional file named by `GRAPHRAG_CONFIG`, and
    /// `GRAPHRAG_`-prefixed environment overrides.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        if let Ok(path) = std::env::var("GRAPHRAG_CONFIG") {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml));
        }

        builder = builder.add_source(
            Environment::with_prefix("GRAPHRAG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

// =============================================================================
// Tests
// =============================================================================
