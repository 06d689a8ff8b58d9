//! Community Report Generation
//!
//! Packs each community's contents into a token-budgeted description, asks
//! the summarizer for a structured report, and persists the result. Levels
//! are processed deepest first so a coarse community can substitute its
//! children's finished reports for raw detail.

use crate::config::ReportConfig;
use crate::domain::community::{CommunityReport, CommunitySchema, ReportJson};
use crate::domain::graph::EdgeKey;
use crate::store::{GraphStore, StoreError};
use crate::summarize::{SummarizeError, Summarizer};
use crate::tokens::TokenService;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod prompt;

use prompt::COMMUNITY_REPORT_PROMPT;

const REPORTS_HEADER: &str = "-----Reports-----";
const ENTITIES_HEADER: &str = "-----Entities-----\nid,entity,type,description,degree";
const RELATIONSHIPS_HEADER: &str = "-----Relationships-----\nid,source,target,description,weight,rank";

// =============================================================================
// Report Store
// =============================================================================

/// Persistence seam for generated community reports.
///
/// Reports are keyed by community id and immutable per clustering run; a new
/// run overwrites by key rather than mutating in place.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn upsert_report(&self, id: &str, report: CommunityReport) -> Result<(), StoreError>;

    async fn get_report(&self, id: &str) -> Result<Option<CommunityReport>, StoreError>;

    async fn list_reports(&self) -> Result<Vec<(String, CommunityReport)>, StoreError>;
}

/// In-memory reference backend for reports.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: RwLock<HashMap<String, CommunityReport>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn upsert_report(&self, id: &str, report: CommunityReport) -> Result<(), StoreError> {
        self.reports.write().await.insert(id.to_string(), report);
        Ok(())
    }

    async fn get_report(&self, id: &str) -> Result<Option<CommunityReport>, StoreError> {
        Ok(self.reports.read().await.get(id).cloned())
    }

    async fn list_reports(&self) -> Result<Vec<(String, CommunityReport)>, StoreError> {
        let mut all: Vec<(String, CommunityReport)> = self
            .reports
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }
}

// =============================================================================
// Run Stats
// =============================================================================

/// Aggregated outcome of one report generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportRunStats {
    /// Communities the run attempted.
    pub communities: usize,
    /// Reports generated from well-formed summarizer output.
    pub generated: usize,
    /// Reports persisted via the minimal fallback after a summarizer or
    /// parse failure.
    pub fallbacks: usize,
    /// Hierarchy levels processed.
    pub levels: usize,
}

// =============================================================================
// Report Packer
// =============================================================================

/// Generates one report per community, deepest level first.
pub struct ReportPacker {
    store: Arc<dyn GraphStore>,
    reports: Arc<dyn ReportStore>,
    summarizer: Arc<dyn Summarizer>,
    config: ReportConfig,
}

impl std::fmt::Debug for ReportPacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportPacker").field("config", &self.config).finish()
    }
}

impl ReportPacker {
    pub fn new(
        store: Arc<dyn GraphStore>,
        reports: Arc<dyn ReportStore>,
        summarizer: Arc<dyn Summarizer>,
        config: ReportConfig,
    ) -> Self {
        Self {
            store,
            reports,
            summarizer,
            config,
        }
    }

    /// Generate and persist a report for every community in the schema.
    ///
    /// Levels run deepest first with a barrier between levels; communities
    /// within a level run concurrently under the configured limit. A
    /// summarizer failure for one community is isolated: the community gets
    /// a minimal fallback report and its siblings proceed.
    pub async fn generate_reports(
        &self,
        schema: &BTreeMap<String, CommunitySchema>,
        cancel: &CancellationToken,
    ) -> Result<ReportRunStats, StoreError> {
        let mut by_level: BTreeMap<u32, Vec<&String>> = BTreeMap::new();
        for (id, community) in schema {
            by_level.entry(community.level).or_default().push(id);
        }

        let mut stats = ReportRunStats::default();
        let mut finished: HashMap<String, CommunityReport> = HashMap::new();

        for (level, ids) in by_level.iter().rev() {
            let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency().max(1)));

            let tasks = ids.iter().map(|id| {
                let semaphore = Arc::clone(&semaphore);
                let finished = &finished;
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| StoreError::Cancelled)?;
                    if cancel.is_cancelled() {
                        return Err(StoreError::Cancelled);
                    }
                    self.generate_one(id, schema, finished).await
                }
            });

            let results = futures::future::join_all(tasks).await;
            for result in results {
                let (id, report, fell_back) = result?;
                stats.communities += 1;
                if fell_back {
                    stats.fallbacks += 1;
                } else {
                    stats.generated += 1;
                }
                finished.insert(id, report);
            }

            stats.levels += 1;
            debug!(level, communities = ids.len(), "report level finished");
        }

        info!(
            communities = stats.communities,
            generated = stats.generated,
            fallbacks = stats.fallbacks,
            levels = stats.levels,
            "report generation complete"
        );
        Ok(stats)
    }

    /// Generate, persist, and return one community's report.
    async fn generate_one(
        &self,
        id: &str,
        schema: &BTreeMap<String, CommunitySchema>,
        finished: &HashMap<String, CommunityReport>,
    ) -> Result<(String, CommunityReport, bool), StoreError> {
        let community = schema
            .get(id)
            .ok_or_else(|| StoreError::Fatal(format!("community {id} missing from schema")))?;

        let input = self.pack_description(id, schema, finished).await?;
        let prompt = COMMUNITY_REPORT_PROMPT.replace("{input_text}", &input);

        let (report_json, fell_back) = match self.summarizer.summarize_report(&prompt).await {
            Ok(raw) => match parse_report_json(&raw) {
                Ok(parsed) => (parsed, false),
                Err(e) => {
                    warn!(community = id, error = %e, "malformed report output, using fallback");
                    (fallback_report(community), true)
                }
            },
            Err(e) => {
                warn!(community = id, error = %e, "report summarization failed, using fallback");
                (fallback_report(community), true)
            }
        };

        let report = CommunityReport {
            report_string: report_json.to_markdown(),
            report_json,
            community: community.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        self.reports.upsert_report(id, report.clone()).await?;
        Ok((id.to_string(), report, fell_back))
    }

    /// Pack one community into a token-budgeted description.
    ///
    /// Large communities substitute their children's finished reports for the
    /// raw detail those children cover; whatever detail remains is ranked by
    /// store degree and packed as CSV until the budget runs out. The output
    /// never exceeds the configured token budget, and a smaller budget always
    /// yields a prefix of a larger budget's packing.
    pub async fn pack_description(
        &self,
        id: &str,
        schema: &BTreeMap<String, CommunitySchema>,
        finished: &HashMap<String, CommunityReport>,
    ) -> Result<String, StoreError> {
        let community = schema
            .get(id)
            .ok_or_else(|| StoreError::Fatal(format!("community {id} missing from schema")))?;

        let overhead = TokenService::count(REPORTS_HEADER)
            + TokenService::count(ENTITIES_HEADER)
            + TokenService::count(RELATIONSHIPS_HEADER)
            + 8;
        let mut remaining = self.config.token_budget.saturating_sub(overhead);

        // Substitute child reports for raw detail when the community is too
        // big to pack directly.
        let mut report_sections: Vec<String> = Vec::new();
        let mut covered_nodes: HashSet<&String> = HashSet::new();
        let mut covered_edges: HashSet<EdgeKey> = HashSet::new();

        let is_large = community.nodes.len() > self.config.large_community_nodes
            || community.edges.len() > self.config.large_community_edges;
        if is_large {
            let mut children: Vec<(&String, &CommunitySchema)> = community
                .sub_communities
                .iter()
                .filter_map(|child| schema.get(child).map(|c| (child, c)))
                .collect();
            children.sort_by(|a, b| {
                b.1.occurrence
                    .partial_cmp(&a.1.occurrence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(b.0))
            });

            for (child_id, child) in children {
                let Some(report) = finished.get(child_id) else {
                    continue;
                };
                let cost = TokenService::count(&report.report_string) + 2;
                if cost > remaining {
                    continue;
                }
                remaining -= cost;
                report_sections.push(report.report_string.clone());
                covered_nodes.extend(&child.nodes);
                covered_edges.extend(
                    child
                        .edges
                        .iter()
                        .map(|(s, t)| EdgeKey::new(s.as_str(), t.as_str())),
                );
            }
        }

        let entity_rows = self
            .entity_rows(community, &covered_nodes)
            .await?;
        let relationship_rows = self
            .relationship_rows(community, &covered_edges)
            .await?;

        // Split what's left proportionally to how much detail each section
        // has to say.
        let total_rows = entity_rows.len() + relationship_rows.len();
        let entity_budget = if total_rows == 0 {
            0
        } else {
            remaining * entity_rows.len() / total_rows
        };
        let relationship_budget = remaining.saturating_sub(entity_budget);

        let kept_entities = TokenService::take_within_budget(&entity_rows, entity_budget);
        let kept_relationships =
            TokenService::take_within_budget(&relationship_rows, relationship_budget);

        let mut sections: Vec<String> = Vec::new();
        if !report_sections.is_empty() {
            sections.push(format!("{REPORTS_HEADER}\n{}", report_sections.join("\n\n")));
        }
        sections.push(format!("{ENTITIES_HEADER}\n{}", kept_entities.join("\n")));
        sections.push(format!(
            "{RELATIONSHIPS_HEADER}\n{}",
            kept_relationships.join("\n")
        ));

        let packed = sections.join("\n\n");
        Ok(TokenService::truncate(&packed, self.config.token_budget))
    }

    /// CSV rows for the community's uncovered entities, ranked by store
    /// degree descending, ties by name.
    async fn entity_rows(
        &self,
        community: &CommunitySchema,
        covered: &HashSet<&String>,
    ) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = community
            .nodes
            .iter()
            .filter(|n| !covered.contains(n))
            .cloned()
            .collect();
        let degrees = self.store.node_degrees_batch(&names).await?;

        let mut ranked: Vec<(String, usize)> = names.into_iter().zip(degrees).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut rows = Vec::with_capacity(ranked.len());
        for (i, (name, degree)) in ranked.iter().enumerate() {
            let record = self.store.get_node(name).await?;
            let (entity_type, description) = record
                .map(|r| (r.entity_type, r.description))
                .unwrap_or_default();
            rows.push(format!(
                "{i},{},{},{},{degree}",
                csv_escape(name),
                csv_escape(&entity_type),
                csv_escape(&description),
            ));
        }
        Ok(rows)
    }

    /// CSV rows for the community's uncovered edges, ranked by combined
    /// endpoint degree descending, ties by endpoint pair.
    async fn relationship_rows(
        &self,
        community: &CommunitySchema,
        covered: &HashSet<EdgeKey>,
    ) -> Result<Vec<String>, StoreError> {
        let pairs: Vec<(String, String)> = community
            .edges
            .iter()
            .filter(|(s, t)| !covered.contains(&EdgeKey::new(s.as_str(), t.as_str())))
            .cloned()
            .collect();
        let ranks = self.store.edge_degrees_batch(&pairs).await?;

        let mut ranked: Vec<((String, String), usize)> = pairs.into_iter().zip(ranks).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut rows = Vec::with_capacity(ranked.len());
        for (i, ((src, tgt), rank)) in ranked.iter().enumerate() {
            let record = self.store.get_edge(src, tgt).await?;
            let (description, weight) = record
                .map(|r| (r.description, r.weight))
                .unwrap_or_default();
            rows.push(format!(
                "{i},{},{},{},{weight},{rank}",
                csv_escape(src),
                csv_escape(tgt),
                csv_escape(&description),
            ));
        }
        Ok(rows)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Extract and parse the JSON object from raw summarizer output, tolerating
/// code fences and prose around it.
fn parse_report_json(raw: &str) -> Result<ReportJson, SummarizeError> {
    let start = raw
        .find('{')
        .ok_or_else(|| SummarizeError::Malformed("no JSON object in output".to_string()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| SummarizeError::Malformed("unterminated JSON object".to_string()))?;
    if end < start {
        return Err(SummarizeError::Malformed("unterminated JSON object".to_string()));
    }

    serde_json::from_str(&raw[start..=end]).map_err(|e| SummarizeError::Malformed(e.to_string()))
}

/// Minimal report used when the summarizer fails or returns garbage.
fn fallback_report(community: &CommunitySchema) -> ReportJson {
    ReportJson {
        title: community.title.clone(),
        summary: String::new(),
        rating: 0.0,
        rating_explanation: String::new(),
        findings: Vec::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================
