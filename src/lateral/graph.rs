// src/lateral/graph.rs
// Directed multigraph of access events. Node order is fixed by sorting
// identifiers, so matrices and traversals are deterministic.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// An edge in the access graph representing one access event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessEdge {
    pub src: String,
    pub dst: String,
    pub action: String,
    pub timestamp: f64,
    pub credential_type: String,
    pub success: bool,
    pub risk_score: f64,
}

impl Default for AccessEdge {
    fn default() -> Self {
        Self {
            src: String::new(),
            dst: String::new(),
            action: "access".to_string(),
            timestamp: 0.0,
            credential_type: "password".to_string(),
            success: true,
            risk_score: 0.0,
        }
    }
}

/// In/out/total degree of one node.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct NodeDegree {
    pub in_degree: usize,
    pub out_degree: usize,
    pub total: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct CentralityEntry {
    pub node_id: String,
    pub node_type: String,
    pub degree: usize,
    pub in_degree: usize,
    pub out_degree: usize,
}

/// Graph representation of access patterns.
///
/// Nodes are entities (users, devices, services, resources); edges are
/// access events with metadata. Multiple edges between the same pair are
/// kept in an append-only log, with the adjacency map holding indices
/// into it.
pub struct AccessGraph {
    edges: Vec<AccessEdge>,
    adjacency: HashMap<String, BTreeMap<String, Vec<usize>>>,
    node_types: BTreeMap<String, String>,
    node_features: BTreeMap<String, Array1<f64>>,
    feature_dim: usize,
}

impl Default for AccessGraph {
    fn default() -> Self {
        Self::new(8)
    }
}

impl AccessGraph {
    pub fn new(feature_dim: usize) -> Self {
        Self {
            edges: Vec::new(),
            adjacency: HashMap::new(),
            node_types: BTreeMap::new(),
            node_features: BTreeMap::new(),
            feature_dim,
        }
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Add or replace a node. Missing features become a zero vector.
    pub fn add_node(&mut self, node_id: &str, node_type: &str, features: Option<Array1<f64>>) {
        self.node_types
            .insert(node_id.to_string(), node_type.to_string());
        let features = features.unwrap_or_else(|| Array1::zeros(self.feature_dim));
        self.node_features.insert(node_id.to_string(), features);
    }

    /// Append an access event. Unknown endpoints are auto-registered as
    /// "entity" (source) and "resource" (destination).
    pub fn add_edge(&mut self, edge: AccessEdge) {
        if !self.node_types.contains_key(&edge.src) {
            self.add_node(&edge.src, "entity", None);
        }
        if !self.node_types.contains_key(&edge.dst) {
            self.add_node(&edge.dst, "resource", None);
        }
        let index = self.edges.len();
        self.adjacency
            .entry(edge.src.clone())
            .or_default()
            .entry(edge.dst.clone())
            .or_default()
            .push(index);
        self.edges.push(edge);
    }

    pub fn edges(&self) -> &[AccessEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.node_types.len()
    }

    pub fn node_type(&self, node_id: &str) -> Option<&str> {
        self.node_types.get(node_id).map(String::as_str)
    }

    /// Privilege level of a node, by the feature-index-0 convention.
    pub fn privilege_level(&self, node_id: &str) -> Option<f64> {
        self.node_features
            .get(node_id)
            .and_then(|f| f.first().copied())
    }

    /// Outgoing neighbors, sorted.
    pub fn get_neighbors(&self, node_id: &str) -> Vec<String> {
        self.adjacency
            .get(node_id)
            .map(|dsts| dsts.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_edges_between(&self, src: &str, dst: &str) -> Vec<&AccessEdge> {
        self.adjacency
            .get(src)
            .and_then(|dsts| dsts.get(dst))
            .map(|indices| indices.iter().map(|i| &self.edges[*i]).collect())
            .unwrap_or_default()
    }

    /// Sorted node list plus the edge-count adjacency matrix.
    pub fn adjacency_matrix(&self) -> (Vec<String>, Array2<f64>) {
        let nodes: Vec<String> = self.node_types.keys().cloned().collect();
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let mut matrix = Array2::zeros((nodes.len(), nodes.len()));

        for (src, dsts) in &self.adjacency {
            if let Some(&i) = index.get(src.as_str()) {
                for (dst, edge_indices) in dsts {
                    if let Some(&j) = index.get(dst.as_str()) {
                        matrix[[i, j]] = edge_indices.len() as f64;
                    }
                }
            }
        }
        (nodes, matrix)
    }

    /// Sorted node list plus the node feature matrix.
    pub fn feature_matrix(&self) -> (Vec<String>, Array2<f64>) {
        let nodes: Vec<String> = self.node_types.keys().cloned().collect();
        let mut matrix = Array2::zeros((nodes.len(), self.feature_dim));
        for (i, node) in nodes.iter().enumerate() {
            if let Some(features) = self.node_features.get(node) {
                for (j, value) in features.iter().take(self.feature_dim).enumerate() {
                    matrix[[i, j]] = *value;
                }
            }
        }
        (nodes, matrix)
    }

    /// BFS shortest path. `shortest_path(a, a)` is `[a]`.
    pub fn shortest_path(&self, src: &str, dst: &str) -> Option<Vec<String>> {
        if src == dst {
            return Some(vec![src.to_string()]);
        }

        let mut visited: HashSet<String> = HashSet::from([src.to_string()]);
        let mut queue: VecDeque<(String, Vec<String>)> =
            VecDeque::from([(src.to_string(), vec![src.to_string()])]);

        while let Some((current, path)) = queue.pop_front() {
            for neighbor in self.get_neighbors(&current) {
                if neighbor == dst {
                    let mut found = path.clone();
                    found.push(neighbor);
                    return Some(found);
                }
                if visited.insert(neighbor.clone()) {
                    let mut next = path.clone();
                    next.push(neighbor.clone());
                    queue.push_back((neighbor, next));
                }
            }
        }
        None
    }

    /// All simple paths from `src` to `dst` with at most `max_depth` nodes.
    pub fn all_paths(&self, src: &str, dst: &str, max_depth: usize) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        let mut path = vec![src.to_string()];
        let mut visited: HashSet<String> = HashSet::from([src.to_string()]);
        self.dfs_paths(src, dst, max_depth, &mut path, &mut visited, &mut paths);
        paths
    }

    fn dfs_paths(
        &self,
        current: &str,
        target: &str,
        max_depth: usize,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
        paths: &mut Vec<Vec<String>>,
    ) {
        if path.len() > max_depth {
            return;
        }
        if current == target {
            paths.push(path.clone());
            return;
        }
        for neighbor in self.get_neighbors(current) {
            if visited.insert(neighbor.clone()) {
                path.push(neighbor.clone());
                self.dfs_paths(&neighbor, target, max_depth, path, visited, paths);
                path.pop();
                visited.remove(&neighbor);
            }
        }
    }

    pub fn node_degree(&self, node_id: &str) -> NodeDegree {
        let out_degree = self
            .adjacency
            .get(node_id)
            .map(|dsts| dsts.len())
            .unwrap_or(0);
        let in_degree = self
            .adjacency
            .values()
            .filter(|dsts| dsts.contains_key(node_id))
            .count();
        NodeDegree {
            in_degree,
            out_degree,
            total: in_degree + out_degree,
        }
    }

    /// Nodes with the highest degree centrality, ties in node-id order.
    pub fn high_centrality_nodes(&self, top_n: usize) -> Vec<CentralityEntry> {
        let mut entries: Vec<CentralityEntry> = self
            .node_types
            .iter()
            .map(|(node_id, node_type)| {
                let degree = self.node_degree(node_id);
                CentralityEntry {
                    node_id: node_id.clone(),
                    node_type: node_type.clone(),
                    degree: degree.total,
                    in_degree: degree.in_degree,
                    out_degree: degree.out_degree,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.degree.cmp(&a.degree));
        entries.truncate(top_n);
        entries
    }
}
