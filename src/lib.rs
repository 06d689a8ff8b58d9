//! Graph Merge and Community Summarization Engine
//!
//! Turns raw entity and relationship observations into a canonical knowledge
//! graph, clusters it hierarchically, and writes a structured report per
//! community.
//!
//! # Architecture
//!
//! - **Merge**: observation folding into canonical node and edge records
//! - **Batch**: chunked, retrying, transactional writes against a pluggable store
//! - **Cluster**: seeded hierarchical Leiden over a graph snapshot
//! - **Report**: token-budgeted community descriptions and structured reports
//!
//! # Modules
//!
//! - [`domain`]: canonical records, observations, community schema
//! - [`merge`]: the merge engine
//! - [`batch`]: batch accumulation and the retrying writer
//! - [`cluster`]: the clustering seam and bundled Leiden routine
//! - [`report`]: description packing and report generation
//! - [`engine`]: the assembled facade

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]

pub mod batch;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod engine;
pub mod merge;
pub mod report;
pub mod store;
pub mod summarize;
pub mod telemetry;
pub mod tokens;

pub use batch::{BatchWriter, GraphBatch, RetryPolicy, WriteReport};
pub use cluster::{ClusterAlgorithm, ClusterEngine, LeidenClusterer};
pub use config::EngineConfig;
pub use domain::community::{CommunityReport, CommunitySchema, ReportJson};
pub use domain::graph::{EdgeObservation, EdgeRecord, NodeObservation, NodeRecord};
pub use engine::{EngineError, GraphRagEngine};
pub use merge::MergeEngine;
pub use report::{MemoryReportStore, ReportPacker, ReportRunStats, ReportStore};
pub use store::{GraphStore, MemoryGraphStore, StoreError};
pub use summarize::{SummarizeError, Summarizer};
pub use tokens::TokenService;
