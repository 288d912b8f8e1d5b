// src/risk/mod.rs
// Composite risk scoring: behavioral, device, network, threat-intel and
// authentication signals combined into one weighted score with a graded
// level and human-readable contributing factors.

use std::collections::{BTreeMap, HashSet};

use dashmap::DashMap;
use ndarray::Array1;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RiskConfig;
use crate::{now_ts, round4};

/// Graded risk level, derived from the composite score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite risk score with component breakdown.
#[derive(Clone, Debug, Serialize)]
pub struct RiskScore {
    pub entity_id: String,
    /// 0.0 (safe) to 1.0 (critical).
    pub composite_score: f64,
    pub risk_level: RiskLevel,
    pub components: BTreeMap<String, f64>,
    pub factors: Vec<String>,
    pub timestamp: f64,
}

/// Input signals for one risk calculation.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RiskSignals {
    pub entity_id: String,
    pub behavior_score: f64,
    pub device_health: f64,
    pub network_trust: f64,
    pub source_ip: String,
    pub auth_strength: f64,
}

impl Default for RiskSignals {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            behavior_score: 0.0,
            device_health: 1.0,
            network_trust: 0.5,
            source_ip: String::new(),
            auth_strength: 0.5,
        }
    }
}

/// In-memory threat intelligence store, populated by external feeds.
#[derive(Default)]
pub struct ThreatIntel {
    malicious_ips: RwLock<HashSet<String>>,
    compromised_entities: RwLock<HashSet<String>>,
    tor_exit_nodes: RwLock<HashSet<String>>,
}

impl ThreatIntel {
    pub fn add_malicious_ip(&self, ip: &str) {
        self.malicious_ips.write().insert(ip.to_string());
    }

    pub fn add_compromised_entity(&self, entity_id: &str) {
        self.compromised_entities.write().insert(entity_id.to_string());
    }

    pub fn add_tor_exit_node(&self, ip: &str) {
        self.tor_exit_nodes.write().insert(ip.to_string());
    }

    /// Threat weight of a source IP: confirmed malicious outranks Tor.
    pub fn check_ip(&self, ip: &str) -> f64 {
        if self.malicious_ips.read().contains(ip) {
            return 1.0;
        }
        if self.tor_exit_nodes.read().contains(ip) {
            return 0.7;
        }
        0.0
    }

    pub fn check_entity(&self, entity_id: &str) -> f64 {
        if self.compromised_entities.read().contains(entity_id) {
            0.9
        } else {
            0.0
        }
    }
}

/// Population-wide risk posture.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RiskSummary {
    pub total_entities: usize,
    pub mean_risk: f64,
    pub max_risk: f64,
    pub std_risk: f64,
    pub level_distribution: BTreeMap<String, u64>,
}

/// Calculates composite risk scores from multiple signal sources.
pub struct RiskEngine {
    config: RiskConfig,
    pub threat_intel: ThreatIntel,
    history: DashMap<String, Vec<RiskScore>>,
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::with_config(RiskConfig::default())
    }
}

impl RiskEngine {
    pub fn with_config(config: RiskConfig) -> Self {
        Self {
            config,
            threat_intel: ThreatIntel::default(),
            history: DashMap::new(),
        }
    }

    /// Calculate the composite risk score for one entity.
    pub fn calculate(&self, signals: &RiskSignals) -> RiskScore {
        let cfg = &self.config;
        let mut components = BTreeMap::new();
        let mut factors = Vec::new();

        // Behavioral risk: the anomaly score already runs 0..1, higher = riskier
        components.insert("behavior".to_string(), signals.behavior_score);
        if signals.behavior_score > 0.7 {
            factors.push("High behavioral anomaly".to_string());
        }

        // Device risk: invert health
        components.insert(
            "device".to_string(),
            (1.0 - signals.device_health).max(0.0),
        );
        if signals.device_health < 0.5 {
            factors.push("Poor device health".to_string());
        }

        // Network risk: invert trust
        components.insert(
            "network".to_string(),
            (1.0 - signals.network_trust).max(0.0),
        );
        if signals.network_trust < 0.3 {
            factors.push("Untrusted network".to_string());
        }

        // Threat intelligence: worst matching indicator wins
        let mut threat = 0.0f64;
        if !signals.source_ip.is_empty() {
            let ip_score = self.threat_intel.check_ip(&signals.source_ip);
            if ip_score > 0.0 {
                threat = threat.max(ip_score);
                factors.push("Threat intel match on IP".to_string());
            }
        }
        let cred_score = self.threat_intel.check_entity(&signals.entity_id);
        if cred_score > 0.0 {
            threat = threat.max(cred_score);
            factors.push("Compromised credential".to_string());
        }
        components.insert("threat".to_string(), threat);

        // Authentication risk: invert strength
        components.insert("auth".to_string(), (1.0 - signals.auth_strength).max(0.0));
        if signals.auth_strength < 0.4 {
            factors.push("Weak authentication".to_string());
        }

        let composite = components["behavior"] * cfg.behavior_weight
            + components["device"] * cfg.device_weight
            + components["network"] * cfg.network_weight
            + components["threat"] * cfg.threat_weight
            + components["auth"] * cfg.auth_weight;
        let composite = round4(composite.clamp(0.0, 1.0));

        let risk_level = self.level_for(composite);
        debug!(
            entity = %signals.entity_id,
            score = composite,
            level = %risk_level,
            "risk score computed"
        );

        let result = RiskScore {
            entity_id: signals.entity_id.clone(),
            composite_score: composite,
            risk_level,
            components,
            factors,
            timestamp: now_ts(),
        };

        self.history
            .entry(signals.entity_id.clone())
            .or_default()
            .push(result.clone());

        result
    }

    /// Highest level whose threshold the score reaches.
    fn level_for(&self, composite: f64) -> RiskLevel {
        let cfg = &self.config;
        let ladder = [
            (RiskLevel::Critical, cfg.critical_threshold),
            (RiskLevel::High, cfg.high_threshold),
            (RiskLevel::Medium, cfg.medium_threshold),
            (RiskLevel::Low, cfg.low_threshold),
        ];
        for (level, threshold) in ladder {
            if composite >= threshold {
                return level;
            }
        }
        RiskLevel::Low
    }

    /// Most recent composite scores for an entity, oldest first.
    pub fn get_risk_trend(&self, entity_id: &str, n: usize) -> Vec<f64> {
        self.history
            .get(entity_id)
            .map(|scores| {
                let start = scores.len().saturating_sub(n);
                scores[start..].iter().map(|s| s.composite_score).collect()
            })
            .unwrap_or_default()
    }

    pub fn batch_calculate(&self, batch: &[RiskSignals]) -> Vec<RiskScore> {
        batch.iter().map(|s| self.calculate(s)).collect()
    }

    /// Summarize the latest score of every scored entity.
    pub fn population_risk_summary(&self) -> RiskSummary {
        // Copy-on-read for a consistent snapshot, sorted for determinism
        let mut latest: BTreeMap<String, (f64, RiskLevel)> = BTreeMap::new();
        for entry in self.history.iter() {
            if let Some(last) = entry.value().last() {
                latest.insert(
                    entry.key().clone(),
                    (last.composite_score, last.risk_level),
                );
            }
        }

        let mut summary = RiskSummary::default();
        for level in ["low", "medium", "high", "critical"] {
            summary.level_distribution.insert(level.to_string(), 0);
        }
        if latest.is_empty() {
            return summary;
        }

        let scores = Array1::from_iter(latest.values().map(|(s, _)| *s));
        summary.total_entities = latest.len();
        summary.mean_risk = round4(scores.mean().unwrap_or(0.0));
        summary.max_risk = round4(scores.iter().cloned().fold(f64::MIN, f64::max));
        summary.std_risk = round4(scores.std(0.0));
        for (_, level) in latest.values() {
            *summary
                .level_distribution
                .entry(level.as_str().to_string())
                .or_insert(0) += 1;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(
        entity: &str,
        behavior: f64,
        device: f64,
        network: f64,
        auth: f64,
    ) -> RiskSignals {
        RiskSignals {
            entity_id: entity.to_string(),
            behavior_score: behavior,
            device_health: device,
            network_trust: network,
            auth_strength: auth,
            ..Default::default()
        }
    }

    #[test]
    fn test_low_risk_composition() {
        let engine = RiskEngine::default();
        let score = engine.calculate(&signals("alice", 0.1, 0.95, 0.8, 0.9));
        // 0.1*0.3 + 0.05*0.2 + 0.2*0.15 + 0 + 0.1*0.15 = 0.085
        assert!((score.composite_score - 0.085).abs() < 1e-9);
        assert_eq!(score.risk_level, RiskLevel::Low);
        assert!(score.factors.is_empty());
    }

    #[test]
    fn test_elevated_risk_composition() {
        let engine = RiskEngine::default();
        let score = engine.calculate(&signals("bob", 0.9, 0.2, 0.1, 0.3));
        assert!(score.composite_score >= 0.5);
        assert!(matches!(
            score.risk_level,
            RiskLevel::Medium | RiskLevel::High
        ));
        assert!(score.factors.contains(&"High behavioral anomaly".to_string()));
        assert!(score.factors.contains(&"Poor device health".to_string()));
        assert!(score.factors.contains(&"Untrusted network".to_string()));
        assert!(score.factors.contains(&"Weak authentication".to_string()));
    }

    #[test]
    fn test_malicious_ip_dominates_threat_component() {
        let engine = RiskEngine::default();
        engine.threat_intel.add_malicious_ip("203.0.113.66");
        let mut sig = signals("carol", 0.0, 1.0, 1.0, 1.0);
        sig.source_ip = "203.0.113.66".to_string();

        let score = engine.calculate(&sig);
        assert_eq!(score.components["threat"], 1.0);
        assert!((score.composite_score - 0.2).abs() < 1e-9);
        assert!(score.factors.contains(&"Threat intel match on IP".to_string()));
    }

    #[test]
    fn test_tor_and_compromised_entity_take_max() {
        let engine = RiskEngine::default();
        engine.threat_intel.add_tor_exit_node("198.51.100.1");
        engine.threat_intel.add_compromised_entity("dave");
        let mut sig = signals("dave", 0.0, 1.0, 1.0, 1.0);
        sig.source_ip = "198.51.100.1".to_string();

        let score = engine.calculate(&sig);
        // Compromised credential (0.9) outranks Tor (0.7)
        assert_eq!(score.components["threat"], 0.9);
        assert!(score.factors.contains(&"Compromised credential".to_string()));
    }

    #[test]
    fn test_level_ladder() {
        let engine = RiskEngine::default();
        assert_eq!(engine.level_for(0.1), RiskLevel::Low);
        assert_eq!(engine.level_for(0.3), RiskLevel::Low);
        assert_eq!(engine.level_for(0.5), RiskLevel::Medium);
        assert_eq!(engine.level_for(0.7), RiskLevel::High);
        assert_eq!(engine.level_for(0.95), RiskLevel::Critical);
    }

    #[test]
    fn test_score_bounds_and_history() {
        let engine = RiskEngine::default();
        for i in 0..5 {
            let score = engine.calculate(&signals("erin", i as f64 / 4.0, 0.5, 0.5, 0.5));
            assert!(score.composite_score >= 0.0 && score.composite_score <= 1.0);
        }
        let trend = engine.get_risk_trend("erin", 3);
        assert_eq!(trend.len(), 3);
        assert!(trend[0] < trend[2]);
        assert!(engine.get_risk_trend("nobody", 5).is_empty());
    }

    #[test]
    fn test_population_summary() {
        let engine = RiskEngine::default();
        engine.calculate(&signals("a", 0.1, 1.0, 1.0, 1.0));
        engine.calculate(&signals("b", 0.9, 0.1, 0.1, 0.1));

        let summary = engine.population_risk_summary();
        assert_eq!(summary.total_entities, 2);
        assert!(summary.max_risk > summary.mean_risk);
        let total: u64 = summary.level_distribution.values().sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_empty_population_summary() {
        let engine = RiskEngine::default();
        let summary = engine.population_risk_summary();
        assert_eq!(summary.total_entities, 0);
        assert_eq!(summary.mean_risk, 0.0);
    }
}
