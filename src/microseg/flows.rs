// src/microseg/flows.rs
// Network flow aggregation: who talks to whom, over which ports and
// protocols, and which endpoints naturally cluster together.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A single observed network flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Flow {
    pub src: String,
    pub dst: String,
    pub port: u16,
    pub protocol: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub timestamp: f64,
    pub duration: f64,
    pub allowed: bool,
}

impl Default for Flow {
    fn default() -> Self {
        Self {
            src: String::new(),
            dst: String::new(),
            port: 0,
            protocol: "tcp".to_string(),
            bytes_sent: 0,
            bytes_recv: 0,
            timestamp: 0.0,
            duration: 0.0,
            allowed: true,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CrossSegmentFlow {
    pub src: String,
    pub dst: String,
    pub src_segment: String,
    pub dst_segment: String,
    pub port: u16,
    pub protocol: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TalkerStats {
    pub endpoint: String,
    pub outbound: u64,
    pub inbound: u64,
    pub total: u64,
}

/// Aggregates flows to discover communication patterns and candidate
/// microsegments.
#[derive(Default)]
pub struct FlowAnalyzer {
    flows: Vec<Flow>,
    pair_counts: BTreeMap<String, BTreeMap<String, u64>>,
    port_map: BTreeMap<(String, String), BTreeSet<u16>>,
    protocol_map: BTreeMap<(String, String), BTreeSet<String>>,
}

impl FlowAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_flow(&mut self, flow: Flow) {
        *self
            .pair_counts
            .entry(flow.src.clone())
            .or_default()
            .entry(flow.dst.clone())
            .or_insert(0) += 1;
        let key = (flow.src.clone(), flow.dst.clone());
        self.port_map.entry(key.clone()).or_default().insert(flow.port);
        self.protocol_map
            .entry(key)
            .or_default()
            .insert(flow.protocol.clone());
        self.flows.push(flow);
    }

    pub fn add_flows(&mut self, flows: Vec<Flow>) {
        for flow in flows {
            self.add_flow(flow);
        }
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    /// All endpoints seen on either side of a flow, sorted.
    pub fn get_endpoints(&self) -> Vec<String> {
        let mut endpoints = BTreeSet::new();
        for flow in &self.flows {
            endpoints.insert(flow.src.clone());
            endpoints.insert(flow.dst.clone());
        }
        endpoints.into_iter().collect()
    }

    /// Sorted endpoint list plus the pairwise flow-count matrix.
    pub fn communication_matrix(&self) -> (Vec<String>, Array2<f64>) {
        let endpoints = self.get_endpoints();
        let index: BTreeMap<&str, usize> = endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| (e.as_str(), i))
            .collect();
        let mut matrix = Array2::zeros((endpoints.len(), endpoints.len()));
        for (src, dsts) in &self.pair_counts {
            if let Some(&i) = index.get(src.as_str()) {
                for (dst, count) in dsts {
                    if let Some(&j) = index.get(dst.as_str()) {
                        matrix[[i, j]] = *count as f64;
                    }
                }
            }
        }
        (endpoints, matrix)
    }

    /// Greedy affinity clustering: endpoints that talk a lot end up in the
    /// same cluster. Members come back sorted, clusters in the order their
    /// first endpoint appears.
    pub fn discover_clusters(&self, threshold: f64) -> Vec<Vec<String>> {
        let (endpoints, matrix) = self.communication_matrix();
        if endpoints.len() < 2 {
            return if endpoints.is_empty() {
                Vec::new()
            } else {
                vec![endpoints]
            };
        }

        // Symmetrized affinity, scaled by the largest row sum
        let n = endpoints.len();
        let mut max_row_sum = 1.0f64;
        for i in 0..n {
            let row_sum: f64 = (0..n).map(|j| matrix[[i, j]]).sum();
            if row_sum > max_row_sum {
                max_row_sum = row_sum;
            }
        }
        let mut affinity = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                affinity[[i, j]] = (matrix[[i, j]] + matrix[[j, i]]) / (2.0 * max_row_sum);
            }
        }

        let mut assigned = vec![false; n];
        let mut clusters = Vec::new();
        for i in 0..n {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let mut cluster = vec![endpoints[i].clone()];
            for j in 0..n {
                if assigned[j] {
                    continue;
                }
                if affinity[[i, j]] > threshold || affinity[[j, i]] > threshold {
                    assigned[j] = true;
                    cluster.push(endpoints[j].clone());
                }
            }
            cluster.sort();
            clusters.push(cluster);
        }
        clusters
    }

    /// Flows whose endpoints sit in different segments (unknown membership
    /// counts as its own segment).
    pub fn cross_segment_flows(
        &self,
        membership: &BTreeMap<String, String>,
    ) -> Vec<CrossSegmentFlow> {
        self.flows
            .iter()
            .filter_map(|flow| {
                let src_segment = membership
                    .get(&flow.src)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                let dst_segment = membership
                    .get(&flow.dst)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                (src_segment != dst_segment).then(|| CrossSegmentFlow {
                    src: flow.src.clone(),
                    dst: flow.dst.clone(),
                    src_segment,
                    dst_segment,
                    port: flow.port,
                    protocol: flow.protocol.clone(),
                })
            })
            .collect()
    }

    /// Endpoints with the most flow activity, busiest first.
    pub fn top_talkers(&self, n: usize) -> Vec<TalkerStats> {
        let mut outbound: BTreeMap<&str, u64> = BTreeMap::new();
        let mut inbound: BTreeMap<&str, u64> = BTreeMap::new();
        for flow in &self.flows {
            *outbound.entry(flow.src.as_str()).or_insert(0) += 1;
            *inbound.entry(flow.dst.as_str()).or_insert(0) += 1;
        }

        let endpoints: BTreeSet<&str> = outbound.keys().chain(inbound.keys()).copied().collect();
        let mut talkers: Vec<TalkerStats> = endpoints
            .into_iter()
            .map(|ep| {
                let out = outbound.get(ep).copied().unwrap_or(0);
                let inb = inbound.get(ep).copied().unwrap_or(0);
                TalkerStats {
                    endpoint: ep.to_string(),
                    outbound: out,
                    inbound: inb,
                    total: out + inb,
                }
            })
            .collect();
        talkers.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.endpoint.cmp(&b.endpoint)));
        talkers.truncate(n);
        talkers
    }

    /// Flow counts by destination port, most used first.
    pub fn port_summary(&self) -> Vec<(u16, u64)> {
        let mut counts: BTreeMap<u16, u64> = BTreeMap::new();
        for flow in &self.flows {
            *counts.entry(flow.port).or_insert(0) += 1;
        }
        let mut summary: Vec<(u16, u64)> = counts.into_iter().collect();
        summary.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary
    }

    /// Port/protocol sets per directed endpoint pair (used by the
    /// recommender).
    pub fn pair_ports(&self, src: &str, dst: &str) -> Vec<u16> {
        self.port_map
            .get(&(src.to_string(), dst.to_string()))
            .map(|ports| ports.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn pair_protocols(&self, src: &str, dst: &str) -> Vec<String> {
        self.protocol_map
            .get(&(src.to_string(), dst.to_string()))
            .map(|protos| protos.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(src: &str, dst: &str, port: u16) -> Flow {
        Flow {
            src: src.to_string(),
            dst: dst.to_string(),
            port,
            ..Default::default()
        }
    }

    #[test]
    fn test_aggregation() {
        let mut analyzer = FlowAnalyzer::new();
        analyzer.add_flow(flow("web", "db", 5432));
        analyzer.add_flow(flow("web", "db", 5432));
        analyzer.add_flow(flow("web", "cache", 6379));

        assert_eq!(analyzer.get_endpoints(), vec!["cache", "db", "web"]);
        assert_eq!(analyzer.pair_ports("web", "db"), vec![5432]);
        assert_eq!(analyzer.pair_protocols("web", "db"), vec!["tcp"]);

        let (endpoints, matrix) = analyzer.communication_matrix();
        let web = endpoints.iter().position(|e| e == "web").unwrap();
        let db = endpoints.iter().position(|e| e == "db").unwrap();
        assert_eq!(matrix[[web, db]], 2.0);
    }

    #[test]
    fn test_clusters_group_heavy_talkers() {
        let mut analyzer = FlowAnalyzer::new();
        // Tight pair: app <-> db
        for _ in 0..20 {
            analyzer.add_flow(flow("app", "db", 5432));
            analyzer.add_flow(flow("db", "app", 5432));
        }
        // Loner with a single flow to app
        analyzer.add_flow(flow("printer", "app", 9100));

        let clusters = analyzer.discover_clusters(0.1);
        let app_cluster = clusters
            .iter()
            .find(|c| c.contains(&"app".to_string()))
            .unwrap();
        assert!(app_cluster.contains(&"db".to_string()));
        assert!(!app_cluster.contains(&"printer".to_string()));
    }

    #[test]
    fn test_clusters_handle_tiny_inputs() {
        let analyzer = FlowAnalyzer::new();
        assert!(analyzer.discover_clusters(0.1).is_empty());

        let mut single = FlowAnalyzer::new();
        single.add_flow(flow("a", "a", 80));
        assert_eq!(single.discover_clusters(0.1), vec![vec!["a".to_string()]]);
    }

    #[test]
    fn test_cross_segment_flows() {
        let mut analyzer = FlowAnalyzer::new();
        analyzer.add_flow(flow("web", "db", 5432));
        analyzer.add_flow(flow("web", "web2", 80));

        let membership = BTreeMap::from([
            ("web".to_string(), "frontend".to_string()),
            ("web2".to_string(), "frontend".to_string()),
            ("db".to_string(), "data".to_string()),
        ]);
        let cross = analyzer.cross_segment_flows(&membership);
        assert_eq!(cross.len(), 1);
        assert_eq!(cross[0].dst_segment, "data");
    }

    #[test]
    fn test_top_talkers_order() {
        let mut analyzer = FlowAnalyzer::new();
        for _ in 0..5 {
            analyzer.add_flow(flow("chatty", "quiet", 80));
        }
        analyzer.add_flow(flow("quiet", "other", 80));

        let talkers = analyzer.top_talkers(10);
        assert_eq!(talkers[0].endpoint, "quiet"); // 5 in + 1 out
        assert_eq!(talkers[0].total, 6);
        assert_eq!(talkers[1].endpoint, "chatty");

        let top_one = analyzer.top_talkers(1);
        assert_eq!(top_one.len(), 1);
    }

    #[test]
    fn test_port_summary_sorted_by_count() {
        let mut analyzer = FlowAnalyzer::new();
        analyzer.add_flow(flow("a", "b", 443));
        analyzer.add_flow(flow("a", "b", 443));
        analyzer.add_flow(flow("a", "b", 22));
        assert_eq!(analyzer.port_summary(), vec![(443, 2), (22, 1)]);
    }
}
