//! Hierarchical Leiden Clustering
//!
//! Bundled clustering routine: seeded, weighted local moving over a petgraph
//! representation of the stored graph, with repeated aggregation to build a
//! community hierarchy. Deterministic for a given snapshot and seed.

use crate::cluster::{ClusterAlgorithm, ClusterError, community_id};
use crate::config::ClusterConfig;
use crate::store::GraphSnapshot;
use async_trait::async_trait;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use tracing::{debug, info};

/// Hierarchical Leiden-style clusterer.
#[derive(Debug, Clone)]
pub struct LeidenClusterer {
    config: ClusterConfig,
}

impl Default for LeidenClusterer {
    fn default() -> Self {
        Self::new()
    }
}

impl LeidenClusterer {
    pub fn new() -> Self {
        Self {
            config: ClusterConfig::default(),
        }
    }

    pub fn with_config(config: ClusterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClusterAlgorithm for LeidenClusterer {
    fn name(&self) -> &'static str {
        "leiden"
    }

    /// Cluster the snapshot into a hierarchy of communities.
    ///
    /// Returns, per node, its community ids from coarsest (level 0) to
    /// finest. Edge weights drive the partition; direction is ignored.
    async fn cluster(
        &self,
        snapshot: &GraphSnapshot,
        seed: u64,
    ) -> Result<HashMap<String, Vec<String>>, ClusterError> {
        if snapshot.nodes.is_empty() {
            return Ok(HashMap::new());
        }

        let (graph, names) = build_graph(snapshot);

        // Run local moving, then aggregate and repeat. `memberships[l][i]` is
        // the community of original node `i` after `l + 1` rounds, so later
        // entries are coarser.
        let mut memberships: Vec<Vec<usize>> = Vec::new();
        let mut current = graph;
        // Community of each original node in `current`'s index space.
        let mut node_of: Vec<usize> = (0..snapshot.nodes.len()).collect();
        let mut rng = SplitMix64::new(seed);

        for round in 0..self.config.max_levels.max(1) {
            let partition = local_moving(
                &current,
                self.config.resolution,
                self.config.max_iterations,
                &mut rng,
            );

            let projected: Vec<usize> = node_of.iter().map(|&n| partition[n]).collect();
            let cluster_count = partition.iter().max().map_or(0, |m| m + 1);

            let converged = memberships
                .last()
                .is_some_and(|previous| *previous == projected);
            if converged {
                break;
            }

            debug!(round, clusters = cluster_count, "local moving round done");
            memberships.push(projected);

            if cluster_count == current.node_count() || cluster_count <= 1 {
                break;
            }

            current = aggregate(&current, &partition, cluster_count);
            node_of = node_of.iter().map(|&n| partition[n]).collect();
        }

        // Later rounds are coarser, so reversing puts level 0 first.
        memberships.reverse();

        let assignments: HashMap<String, Vec<String>> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let path = memberships
                    .iter()
                    .enumerate()
                    .map(|(level, membership)| community_id(level as u32, membership[i]))
                    .collect();
                (name.clone(), path)
            })
            .collect();

        info!(
            nodes = names.len(),
            levels = memberships.len(),
            "clustering complete"
        );
        Ok(assignments)
    }
}

/// Build an undirected weighted graph from the snapshot.
fn build_graph(snapshot: &GraphSnapshot) -> (UnGraph<(), f64>, Vec<String>) {
    let mut graph = UnGraph::new_undirected();
    let mut names = Vec::with_capacity(snapshot.nodes.len());
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();

    for (name, _) in &snapshot.nodes {
        let idx = graph.add_node(());
        index_of.insert(name.as_str(), idx);
        names.push(name.clone());
    }

    for (src, tgt, record) in &snapshot.edges {
        if let (Some(&a), Some(&b)) = (index_of.get(src.as_str()), index_of.get(tgt.as_str())) {
            if a != b {
                graph.add_edge(a, b, record.weight.max(f64::MIN_POSITIVE));
            }
        }
    }

    (graph, names)
}

/// One round of weighted modularity local moving.
///
/// Returns a compacted community index per node. Isolated nodes stay in
/// singleton communities.
fn local_moving(
    graph: &UnGraph<(), f64>,
    resolution: f64,
    max_iterations: usize,
    rng: &mut SplitMix64,
) -> Vec<usize> {
    let n = graph.node_count();
    let mut community: Vec<usize> = (0..n).collect();

    let degree: Vec<f64> = (0..n)
        .map(|i| {
            graph
                .edges(NodeIndex::new(i))
                .map(|e| *e.weight())
                .sum::<f64>()
        })
        .collect();
    let total_weight: f64 = degree.iter().sum::<f64>();
    if total_weight <= 0.0 {
        return community;
    }

    let mut community_degree = degree.clone();

    let mut order: Vec<usize> = (0..n).collect();
    let mut improved = true;
    let mut iterations = 0;

    while improved && iterations < max_iterations {
        improved = false;
        iterations += 1;
        rng.shuffle(&mut order);

        for &node in &order {
            let current = community[node];
            community_degree[current] -= degree[node];

            // Edge weight from `node` into each neighboring community.
            let mut weight_to: HashMap<usize, f64> = HashMap::new();
            for edge in graph.edges(NodeIndex::new(node)) {
                let neighbor = edge.target().index();
                if neighbor != node {
                    *weight_to.entry(community[neighbor]).or_insert(0.0) += *edge.weight();
                }
            }

            let gain_of = |comm: usize| {
                let link = weight_to.get(&comm).copied().unwrap_or(0.0);
                link - resolution * degree[node] * community_degree[comm] / total_weight
            };

            let mut best_comm = current;
            let mut best_gain = gain_of(current);
            for &comm in weight_to.keys() {
                let gain = gain_of(comm);
                if gain > best_gain {
                    best_gain = gain;
                    best_comm = comm;
                }
            }

            community_degree[best_comm] += degree[node];
            if best_comm != current {
                community[node] = best_comm;
                improved = true;
            }
        }
    }

    compact(&community)
}

/// Renumber community labels into a dense 0..k range, ordered by first
/// appearance.
fn compact(labels: &[usize]) -> Vec<usize> {
    let mut remap: HashMap<usize, usize> = HashMap::new();
    labels
        .iter()
        .map(|&label| {
            let next = remap.len();
            *remap.entry(label).or_insert(next)
        })
        .collect()
}

/// Collapse each community into one node, summing parallel edge weights.
/// Intra-community weight is dropped; only inter-community structure feeds
/// the next round.
fn aggregate(
    graph: &UnGraph<(), f64>,
    partition: &[usize],
    cluster_count: usize,
) -> UnGraph<(), f64> {
    let mut weights: HashMap<(usize, usize), f64> = HashMap::new();
    for edge in graph.edge_references() {
        let a = partition[edge.source().index()];
        let b = partition[edge.target().index()];
        if a != b {
            let key = if a < b { (a, b) } else { (b, a) };
            *weights.entry(key).or_insert(0.0) += *edge.weight();
        }
    }

    let mut aggregated = UnGraph::new_undirected();
    let indices: Vec<NodeIndex> = (0..cluster_count).map(|_| aggregated.add_node(())).collect();
    for ((a, b), weight) in weights {
        aggregated.add_edge(indices[a], indices[b], weight);
    }
    aggregated
}

// =============================================================================
// Seeded RNG
// =============================================================================

/// splitmix64 generator; enough randomness for a deterministic visit order.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Fisher-Yates shuffle.
    fn shuffle(&mut self, slice: &mut [usize]) {
        for i in (1..slice.len()).rev() {
            let j = (self.next() % (i as u64 + 1)) as usize;
            slice.swap(i, j);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
