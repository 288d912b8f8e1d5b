// src/microseg/recommender.rs
// Turns observed flows into least-privilege microsegmentation policy:
// which segment pairs need lanes, which ports, and which endpoint
// clusters deserve segments of their own.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::round4;

use super::flows::FlowAnalyzer;
use super::segments::SegmentManager;

/// A recommended inter-segment allow rule.
#[derive(Clone, Debug, Serialize)]
pub struct PolicyRecommendation {
    pub src_segment: String,
    pub dst_segment: String,
    pub allowed_ports: Vec<u16>,
    pub protocol: String,
    pub confidence: f64,
    pub reason: String,
}

/// A suggested new segment built from a discovered cluster.
#[derive(Clone, Debug, Serialize)]
pub struct SegmentSuggestion {
    pub suggested_segment: String,
    pub members: Vec<String>,
    pub reason: String,
    pub confidence: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CoverageReport {
    pub total_flows: usize,
    pub covered_flows: usize,
    pub coverage_pct: f64,
    pub uncovered_endpoints: Vec<String>,
    pub segments_defined: usize,
}

/// Generates microsegmentation policy recommendations from flow data.
pub struct PolicyRecommender {
    min_flow_count: u64,
    cluster_threshold: f64,
}

impl Default for PolicyRecommender {
    fn default() -> Self {
        Self::new(5, 0.1)
    }
}

impl PolicyRecommender {
    pub fn new(min_flow_count: u64, cluster_threshold: f64) -> Self {
        Self {
            min_flow_count,
            cluster_threshold,
        }
    }

    /// Recommend allow rules for segment pairs with sustained traffic.
    pub fn recommend(
        &self,
        flows: &FlowAnalyzer,
        segments: &SegmentManager,
    ) -> Vec<PolicyRecommendation> {
        let membership = segments.get_membership_map();

        struct PairStats {
            count: u64,
            ports: BTreeSet<u16>,
            protocols: BTreeSet<String>,
        }
        let mut pair_stats: BTreeMap<(String, String), PairStats> = BTreeMap::new();

        for flow in flows.flows() {
            let (Some(src_seg), Some(dst_seg)) =
                (membership.get(&flow.src), membership.get(&flow.dst))
            else {
                continue;
            };
            if src_seg == dst_seg {
                continue;
            }
            let stats = pair_stats
                .entry((src_seg.clone(), dst_seg.clone()))
                .or_insert_with(|| PairStats {
                    count: 0,
                    ports: BTreeSet::new(),
                    protocols: BTreeSet::new(),
                });
            stats.count += 1;
            stats.ports.insert(flow.port);
            stats.protocols.insert(flow.protocol.clone());
        }

        let mut recommendations: Vec<PolicyRecommendation> = pair_stats
            .into_iter()
            .filter(|(_, stats)| stats.count >= self.min_flow_count)
            .map(|((src, dst), stats)| PolicyRecommendation {
                src_segment: src,
                dst_segment: dst,
                allowed_ports: stats.ports.iter().copied().collect(),
                protocol: stats
                    .protocols
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(","),
                confidence: round4((stats.count as f64 / 100.0).min(1.0)),
                reason: format!(
                    "Observed {} flows across {} ports",
                    stats.count,
                    stats.ports.len()
                ),
            })
            .collect();
        recommendations.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        recommendations
    }

    /// Suggest new segments for discovered clusters whose members belong
    /// to no existing segment.
    pub fn recommend_segments(
        &self,
        flows: &FlowAnalyzer,
        segments: &SegmentManager,
    ) -> Vec<SegmentSuggestion> {
        let clusters = flows.discover_clusters(self.cluster_threshold);
        let mut suggestions = Vec::new();

        for (i, cluster) in clusters.iter().enumerate() {
            let has_existing = cluster
                .iter()
                .any(|member| segments.get_member_segment(member).is_some());
            if has_existing {
                continue;
            }
            suggestions.push(SegmentSuggestion {
                suggested_segment: format!("auto-seg-{i}"),
                members: cluster.clone(),
                reason: format!(
                    "Cluster of {} frequently communicating endpoints",
                    cluster.len()
                ),
                confidence: round4((cluster.len() as f64 / 5.0).min(1.0)),
            });
        }
        suggestions
    }

    /// How much of the observed traffic the current segment definitions
    /// actually cover.
    pub fn coverage_report(
        &self,
        flows: &FlowAnalyzer,
        segments: &SegmentManager,
    ) -> CoverageReport {
        let membership = segments.get_membership_map();
        let total = flows.flows().len();
        let mut covered = 0;
        let mut uncovered: BTreeSet<String> = BTreeSet::new();

        for flow in flows.flows() {
            let src_known = membership.contains_key(&flow.src);
            let dst_known = membership.contains_key(&flow.dst);
            if src_known && dst_known {
                covered += 1;
            }
            if !src_known {
                uncovered.insert(flow.src.clone());
            }
            if !dst_known {
                uncovered.insert(flow.dst.clone());
            }
        }

        CoverageReport {
            total_flows: total,
            covered_flows: covered,
            coverage_pct: if total > 0 {
                ((covered as f64 / total as f64) * 1000.0).round() / 10.0
            } else {
                0.0
            },
            uncovered_endpoints: uncovered.into_iter().collect(),
            segments_defined: segments.segment_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::microseg::flows::Flow;

    fn flow(src: &str, dst: &str, port: u16) -> Flow {
        Flow {
            src: src.to_string(),
            dst: dst.to_string(),
            port,
            ..Default::default()
        }
    }

    fn fixture() -> (FlowAnalyzer, SegmentManager) {
        let mut flows = FlowAnalyzer::new();
        let mut segments = SegmentManager::new();
        segments.create_segment("frontend", "Frontend", "", 0.6);
        segments.create_segment("data", "Data", "", 0.9);
        segments.add_member("frontend", "web-1");
        segments.add_member("data", "db-1");

        for _ in 0..10 {
            flows.add_flow(flow("web-1", "db-1", 5432));
        }
        (flows, segments)
    }

    #[test]
    fn test_recommend_sustained_pair() {
        let (flows, segments) = fixture();
        let recommender = PolicyRecommender::default();
        let recs = recommender.recommend(&flows, &segments);

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].src_segment, "frontend");
        assert_eq!(recs[0].dst_segment, "data");
        assert_eq!(recs[0].allowed_ports, vec![5432]);
        assert_eq!(recs[0].protocol, "tcp");
        assert!((recs[0].confidence - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_pairs_below_threshold_skipped() {
        let (mut flows, segments) = fixture();
        // Reverse direction only twice: below min_flow_count
        flows.add_flow(flow("db-1", "web-1", 8080));
        flows.add_flow(flow("db-1", "web-1", 8080));

        let recs = PolicyRecommender::default().recommend(&flows, &segments);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].src_segment, "frontend");
    }

    #[test]
    fn test_same_segment_and_unsegmented_flows_ignored() {
        let (mut flows, mut segments) = fixture();
        segments.add_member("frontend", "web-2");
        for _ in 0..10 {
            flows.add_flow(flow("web-1", "web-2", 80)); // same segment
            flows.add_flow(flow("web-1", "rogue", 80)); // unsegmented dst
        }
        let recs = PolicyRecommender::default().recommend(&flows, &segments);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].dst_segment, "data");
    }

    #[test]
    fn test_recommend_segments_for_orphan_cluster() {
        let (mut flows, segments) = fixture();
        for _ in 0..20 {
            flows.add_flow(flow("worker-a", "worker-b", 7000));
            flows.add_flow(flow("worker-b", "worker-a", 7000));
        }
        let suggestions = PolicyRecommender::default().recommend_segments(&flows, &segments);
        let orphan = suggestions
            .iter()
            .find(|s| s.members.contains(&"worker-a".to_string()))
            .expect("orphan cluster suggestion expected");
        assert!(orphan.members.contains(&"worker-b".to_string()));
        assert!(orphan.suggested_segment.starts_with("auto-seg-"));
    }

    #[test]
    fn test_coverage_report() {
        let (mut flows, segments) = fixture();
        flows.add_flow(flow("web-1", "rogue", 80));

        let report = PolicyRecommender::default().coverage_report(&flows, &segments);
        assert_eq!(report.total_flows, 11);
        assert_eq!(report.covered_flows, 10);
        assert_eq!(report.uncovered_endpoints, vec!["rogue"]);
        assert_eq!(report.segments_defined, 2);
        assert!((report.coverage_pct - 90.9).abs() < 0.1);
    }
}
