// src/lateral/detector.rs
// Lateral movement detection over the access graph. A fixed-weight,
// seeded two-layer GNN summarizes graph structure into node embeddings;
// detection combines embedding drift with two traversal heuristics.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::LateralConfig;
use crate::round4;

use super::graph::{AccessEdge, AccessGraph};

/// Privilege-feature cutoffs for the escalation heuristic.
const HIGH_PRIVILEGE: f64 = 0.7;
const LOW_PRIVILEGE: f64 = 0.3;

/// Maximum node count of a privilege escalation path.
const ESCALATION_MAX_DEPTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    CredentialHopping,
    PrivilegeEscalation,
    EmbeddingAnomaly,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::CredentialHopping => "credential_hopping",
            AlertType::PrivilegeEscalation => "privilege_escalation",
            AlertType::EmbeddingAnomaly => "embedding_anomaly",
        }
    }
}

/// Alert for detected lateral movement.
#[derive(Clone, Debug, Serialize)]
pub struct LateralMovementAlert {
    pub alert_type: AlertType,
    /// 0.0-1.0.
    pub severity: f64,
    pub path: Vec<String>,
    pub details: BTreeMap<String, Value>,
}

/// Risk breakdown of one concrete access path.
#[derive(Clone, Debug, Serialize)]
pub struct PathAnalysis {
    pub path: Vec<String>,
    pub path_length: usize,
    pub total_edges: usize,
    pub credential_changes: usize,
    pub failed_attempts: usize,
    pub risk_score: f64,
}

/// Standard normal draw via the Box-Muller transform.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(1e-10_f64..1.0_f64);
    let u2: f64 = rng.gen_range(0.0_f64..1.0_f64);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// A single GNN message-passing layer with fixed weights.
///
/// h' = ReLU(H W_self + Â H W_neigh + b) where Â is the row-normalized
/// adjacency matrix. The weights are He-scaled Gaussians drawn from a
/// seeded RNG and never updated: the layer is a deterministic structural
/// feature extractor, not a trained model.
pub struct GnnLayer {
    w_self: Array2<f64>,
    w_neigh: Array2<f64>,
    bias: Array1<f64>,
}

impl GnnLayer {
    pub fn new(in_dim: usize, out_dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let scale = (2.0 / in_dim as f64).sqrt();
        let mut init = |_: (usize, usize)| gaussian(&mut rng) * scale;
        let w_self = Array2::from_shape_fn((in_dim, out_dim), &mut init);
        let w_neigh = Array2::from_shape_fn((in_dim, out_dim), &mut init);
        Self {
            w_self,
            w_neigh,
            bias: Array1::zeros(out_dim),
        }
    }

    pub fn forward(&self, features: &Array2<f64>, adjacency: &Array2<f64>) -> Array2<f64> {
        // Row-normalize; all-zero rows stay zero
        let degree = adjacency.sum_axis(Axis(1));
        let mut adj_norm = adjacency.clone();
        for (mut row, d) in adj_norm.rows_mut().into_iter().zip(degree.iter()) {
            if *d != 0.0 {
                row.mapv_inplace(|v| v / d);
            }
        }

        let self_transform = features.dot(&self.w_self);
        let neighbor_agg = adj_norm.dot(features).dot(&self.w_neigh);
        let mut output = self_transform + neighbor_agg;
        output += &self.bias;
        output.mapv_inplace(|v| v.max(0.0));
        output
    }
}

/// Detects lateral movement with GNN-based graph analysis.
pub struct LateralMovementDetector {
    pub graph: AccessGraph,
    hop_threshold: usize,
    anomaly_threshold: f64,
    layer1: GnnLayer,
    layer2: GnnLayer,
    output_dim: usize,
    baseline_embeddings: BTreeMap<String, Array1<f64>>,
}

impl Default for LateralMovementDetector {
    fn default() -> Self {
        Self::with_config(&LateralConfig::default())
    }
}

impl LateralMovementDetector {
    pub fn with_config(cfg: &LateralConfig) -> Self {
        Self {
            graph: AccessGraph::new(cfg.feature_dim),
            hop_threshold: cfg.hop_threshold,
            anomaly_threshold: cfg.anomaly_threshold,
            layer1: GnnLayer::new(cfg.feature_dim, cfg.hidden_dim, cfg.seed),
            layer2: GnnLayer::new(cfg.hidden_dim, cfg.output_dim, cfg.seed + 1),
            output_dim: cfg.output_dim,
            baseline_embeddings: BTreeMap::new(),
        }
    }

    pub fn add_access_event(&mut self, edge: AccessEdge) {
        self.graph.add_edge(edge);
    }

    /// Two-layer GNN forward pass over the current graph.
    pub fn compute_embeddings(&self) -> (Vec<String>, Array2<f64>) {
        let (nodes, features) = self.graph.feature_matrix();
        if nodes.is_empty() {
            return (nodes, Array2::zeros((0, self.output_dim)));
        }
        let (_, adjacency) = self.graph.adjacency_matrix();
        let hidden = self.layer1.forward(&features, &adjacency);
        let output = self.layer2.forward(&hidden, &adjacency);
        (nodes, output)
    }

    /// Snapshot current embeddings as the reference for drift detection.
    /// Returns the number of nodes captured.
    pub fn learn_baseline(&mut self) -> usize {
        let (nodes, embeddings) = self.compute_embeddings();
        for (i, node) in nodes.iter().enumerate() {
            self.baseline_embeddings
                .insert(node.clone(), embeddings.row(i).to_owned());
        }
        info!(nodes = nodes.len(), "lateral baseline embeddings learned");
        nodes.len()
    }

    /// Run every detection method; alerts come back severity-descending.
    pub fn detect(&self) -> Vec<LateralMovementAlert> {
        self.detect_with_cancel(&AtomicBool::new(false))
    }

    /// Cancellable detection: the flag is polled between phases and inside
    /// the expensive loops. A cancelled call returns the alerts gathered
    /// so far.
    pub fn detect_with_cancel(&self, cancel: &AtomicBool) -> Vec<LateralMovementAlert> {
        let mut alerts = Vec::new();
        self.detect_credential_hopping(cancel, &mut alerts);
        if !cancel.load(Ordering::Relaxed) {
            self.detect_privilege_escalation(cancel, &mut alerts);
        }
        if !cancel.load(Ordering::Relaxed) {
            self.detect_embedding_anomalies(cancel, &mut alerts);
        }
        alerts.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        alerts
    }

    /// A source reaching many distinct targets in sequence.
    fn detect_credential_hopping(
        &self,
        cancel: &AtomicBool,
        alerts: &mut Vec<LateralMovementAlert>,
    ) {
        let mut by_source: BTreeMap<&str, Vec<&AccessEdge>> = BTreeMap::new();
        for edge in self.graph.edges() {
            by_source.entry(edge.src.as_str()).or_default().push(edge);
        }

        for (src, mut edges) in by_source {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            edges.sort_by(|a, b| {
                a.timestamp
                    .partial_cmp(&b.timestamp)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut unique_targets: Vec<&str> = Vec::new();
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            for edge in &edges {
                if seen.insert(edge.dst.as_str()) {
                    unique_targets.push(edge.dst.as_str());
                }
            }

            if unique_targets.len() >= self.hop_threshold {
                let severity =
                    (unique_targets.len() as f64 / (self.hop_threshold * 2) as f64).min(1.0);
                let mut path = vec![src.to_string()];
                path.extend(
                    unique_targets
                        .iter()
                        .take(self.hop_threshold + 2)
                        .map(|t| t.to_string()),
                );
                alerts.push(LateralMovementAlert {
                    alert_type: AlertType::CredentialHopping,
                    severity: round4(severity),
                    path,
                    details: BTreeMap::from([
                        ("source".to_string(), json!(src)),
                        ("hop_count".to_string(), json!(unique_targets.len())),
                        ("threshold".to_string(), json!(self.hop_threshold)),
                    ]),
                });
            }
        }
    }

    /// Multi-hop paths from low-privilege nodes into high-privilege ones.
    fn detect_privilege_escalation(
        &self,
        cancel: &AtomicBool,
        alerts: &mut Vec<LateralMovementAlert>,
    ) {
        let (nodes, _) = self.graph.feature_matrix();
        let mut high = Vec::new();
        let mut low = Vec::new();
        for node in &nodes {
            match self.graph.privilege_level(node) {
                Some(p) if p > HIGH_PRIVILEGE => high.push(node.clone()),
                Some(p) if p < LOW_PRIVILEGE => low.push(node.clone()),
                _ => {}
            }
        }

        for low_node in &low {
            for high_node in &high {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                for path in self.graph.all_paths(low_node, high_node, ESCALATION_MAX_DEPTH) {
                    if path.len() >= 3 {
                        alerts.push(LateralMovementAlert {
                            alert_type: AlertType::PrivilegeEscalation,
                            severity: round4(0.6 + 0.1 * path.len() as f64),
                            details: BTreeMap::from([
                                ("source".to_string(), json!(low_node)),
                                ("target".to_string(), json!(high_node)),
                                ("hops".to_string(), json!(path.len() - 1)),
                            ]),
                            path,
                        });
                    }
                }
            }
        }
    }

    /// Nodes whose embeddings drifted from the learned baseline.
    fn detect_embedding_anomalies(
        &self,
        cancel: &AtomicBool,
        alerts: &mut Vec<LateralMovementAlert>,
    ) {
        if self.baseline_embeddings.is_empty() {
            return;
        }

        let (nodes, current) = self.compute_embeddings();
        for (i, node) in nodes.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            let Some(baseline) = self.baseline_embeddings.get(node) else {
                continue;
            };
            let diff = &current.row(i).to_owned() - baseline;
            let distance = diff.dot(&diff).sqrt();

            if distance > self.anomaly_threshold {
                let severity = (distance / (self.anomaly_threshold * 3.0)).min(1.0);
                alerts.push(LateralMovementAlert {
                    alert_type: AlertType::EmbeddingAnomaly,
                    severity: round4(severity),
                    path: vec![node.clone()],
                    details: BTreeMap::from([
                        ("node".to_string(), json!(node)),
                        ("embedding_distance".to_string(), json!(round4(distance))),
                        ("threshold".to_string(), json!(self.anomaly_threshold)),
                    ]),
                });
            }
        }
    }

    /// Score one concrete path. `None` when the path has fewer than two
    /// nodes — there is nothing to traverse.
    pub fn analyze_path(&self, path: &[String]) -> Option<PathAnalysis> {
        if path.len() < 2 {
            return None;
        }

        let mut total_edges = 0;
        let mut failed = 0;
        let mut credential_changes = 0;
        let mut prev_cred: Option<&str> = None;

        for pair in path.windows(2) {
            let edges = self.graph.get_edges_between(&pair[0], &pair[1]);
            total_edges += edges.len();
            for edge in edges {
                if !edge.success {
                    failed += 1;
                }
                if let Some(prev) = prev_cred {
                    if edge.credential_type != prev {
                        credential_changes += 1;
                    }
                }
                prev_cred = Some(edge.credential_type.as_str());
            }
        }

        let risk = (path.len() as f64 * 0.05).min(0.3)
            + (credential_changes as f64 * 0.1).min(0.3)
            + (failed as f64 * 0.05).min(0.3);

        Some(PathAnalysis {
            path: path.to_vec(),
            path_length: path.len(),
            total_edges,
            credential_changes,
            failed_attempts: failed,
            risk_score: round4(risk.min(1.0)),
        })
    }
}
