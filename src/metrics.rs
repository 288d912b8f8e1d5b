// src/metrics.rs
// Process-local counters surfaced by /health and the dashboard.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

/// Engine metrics snapshot.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineMetrics {
    pub uptime_secs: u64,
    pub events_observed: u64,
    pub anomalies_scored: u64,
    pub decisions_evaluated: u64,
    pub risk_scores_computed: u64,
    pub lateral_scans: u64,
}

/// Metrics registry
#[derive(Clone)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn record_observation(&self) {
        self.metrics.write().events_observed += 1;
    }

    pub fn record_anomaly_scored(&self) {
        self.metrics.write().anomalies_scored += 1;
    }

    pub fn record_decision(&self) {
        self.metrics.write().decisions_evaluated += 1;
    }

    pub fn record_risk_score(&self) {
        self.metrics.write().risk_scores_computed += 1;
    }

    pub fn record_lateral_scan(&self) {
        self.metrics.write().lateral_scans += 1;
    }

    pub fn snapshot(&self) -> EngineMetrics {
        let mut metrics = self.metrics.read().clone();
        metrics.uptime_secs = self.start_time.elapsed().as_secs();
        metrics
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
