// src/behavioral/anomaly.rs
// Scores events against learned baselines. Several independent component
// detectors are combined into one weighted composite score.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::BehavioralConfig;
use crate::round4;

use super::baseline::{BaselineProfile, BehaviorEvent, BehavioralBaseline};

/// Profiles with fewer observations than this are not judged at all.
const MIN_OBSERVATIONS: u64 = 10;

/// Sessions-duration scoring needs at least this many recorded durations.
const MIN_SESSION_SAMPLES: u64 = 5;

/// Result of anomaly detection on a single event.
#[derive(Clone, Debug, Serialize)]
pub struct AnomalyResult {
    pub entity_id: String,
    /// 0.0 (normal) to 1.0 (highly anomalous).
    pub anomaly_score: f64,
    pub is_anomalous: bool,
    pub component_scores: BTreeMap<String, f64>,
    pub details: BTreeMap<String, Value>,
}

/// Per-component weights for the composite score.
#[derive(Clone, Copy, Debug)]
pub struct AnomalyWeights {
    pub time: f64,
    pub resource: f64,
    pub location: f64,
    pub ip: f64,
    pub duration: f64,
}

impl Default for AnomalyWeights {
    fn default() -> Self {
        Self {
            time: 0.20,
            resource: 0.25,
            location: 0.25,
            ip: 0.15,
            duration: 0.15,
        }
    }
}

impl AnomalyWeights {
    fn get(&self, component: &str) -> f64 {
        match component {
            "time" => self.time,
            "resource" => self.resource,
            "location" => self.location,
            "ip" => self.ip,
            "duration" => self.duration,
            _ => 0.1,
        }
    }
}

/// Detects anomalous behavior by comparing events against baselines.
pub struct AnomalyDetector {
    baseline: Arc<BehavioralBaseline>,
    threshold: f64,
    weights: AnomalyWeights,
}

impl AnomalyDetector {
    pub fn new(baseline: Arc<BehavioralBaseline>) -> Self {
        Self {
            baseline,
            threshold: 0.7,
            weights: AnomalyWeights::default(),
        }
    }

    pub fn with_config(baseline: Arc<BehavioralBaseline>, cfg: &BehavioralConfig) -> Self {
        Self {
            baseline,
            threshold: cfg.anomaly_threshold,
            weights: AnomalyWeights {
                time: cfg.time_weight,
                resource: cfg.resource_weight,
                location: cfg.location_weight,
                ip: cfg.ip_weight,
                duration: cfg.duration_weight,
            },
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Analyze a single event against the entity's baseline.
    ///
    /// Entities without an established baseline get a deliberately neutral
    /// result: score 0.5, never flagged. Flagging an entity the system has
    /// barely seen would punish onboarding, not attackers.
    pub fn analyze(&self, entity_id: &str, event: &BehaviorEvent) -> AnomalyResult {
        let profile = match self.baseline.get_profile(entity_id) {
            Some(p) if p.observation_count >= MIN_OBSERVATIONS => p,
            _ => {
                let mut details = BTreeMap::new();
                details.insert("reason".to_string(), json!("insufficient_baseline"));
                return AnomalyResult {
                    entity_id: entity_id.to_string(),
                    anomaly_score: 0.5,
                    is_anomalous: false,
                    component_scores: BTreeMap::new(),
                    details,
                };
            }
        };

        let mut scores = BTreeMap::new();
        let mut details = BTreeMap::new();

        if let Some(hour) = event.hour {
            if (0..24).contains(&hour) {
                let (score, detail) = time_anomaly(&profile, hour as usize);
                scores.insert("time".to_string(), score);
                details.insert("time".to_string(), detail);
            }
        }
        if let Some(resource) = event.resource.as_deref().filter(|s| !s.is_empty()) {
            let (score, detail) = resource_anomaly(&profile, resource);
            scores.insert("resource".to_string(), score);
            details.insert("resource".to_string(), detail);
        }
        if let Some(location) = event.location.as_deref().filter(|s| !s.is_empty()) {
            let (score, detail) = location_anomaly(&profile, location);
            scores.insert("location".to_string(), score);
            details.insert("location".to_string(), detail);
        }
        if let Some(ip) = event.source_ip.as_deref().filter(|s| !s.is_empty()) {
            let (score, detail) = ip_anomaly(&profile, ip);
            scores.insert("ip".to_string(), score);
            details.insert("ip".to_string(), detail);
        }
        if let Some(duration) = event.session_duration {
            if let Some((score, detail)) = duration_anomaly(&profile, duration) {
                scores.insert("duration".to_string(), score);
                details.insert("duration".to_string(), detail);
            }
        }

        let composite = if scores.is_empty() {
            0.0
        } else {
            let mut weighted_sum = 0.0;
            let mut weight_sum = 0.0;
            for (component, score) in &scores {
                let w = self.weights.get(component);
                weighted_sum += score * w;
                weight_sum += w;
            }
            if weight_sum > 0.0 {
                weighted_sum / weight_sum
            } else {
                0.0
            }
        };
        let composite = round4(composite);

        AnomalyResult {
            entity_id: entity_id.to_string(),
            anomaly_score: composite,
            is_anomalous: composite >= self.threshold,
            component_scores: scores,
            details,
        }
    }

    pub fn analyze_batch(&self, entity_id: &str, events: &[BehaviorEvent]) -> Vec<AnomalyResult> {
        events.iter().map(|e| self.analyze(entity_id, e)).collect()
    }
}

/// Low probability relative to the peak hour is anomalous; an hour bucket
/// with zero raw observations carries an extra penalty.
fn time_anomaly(profile: &BaselineProfile, hour: usize) -> (f64, Value) {
    let probs = profile.hour_probabilities();
    let prob = probs[hour];
    let max_prob = probs.iter().cloned().fold(f64::MIN, f64::max);

    if max_prob == 0.0 {
        return (0.0, json!({"hour": hour, "probability": 0.0}));
    }

    let mut relative = 1.0 - prob / max_prob;
    if profile.hour_distribution[hour] == 0.0 {
        relative = (relative + 0.3).min(1.0);
    }

    (
        round4(relative),
        json!({
            "hour": hour,
            "probability": round4(prob),
            "peak_hour": profile.peak_hour(),
        }),
    )
}

fn resource_anomaly(profile: &BaselineProfile, resource: &str) -> (f64, Value) {
    let count = profile.resource_frequencies.get(resource).copied().unwrap_or(0);
    let total: u64 = profile.resource_frequencies.values().sum();

    if total == 0 {
        return (0.5, json!({"resource": resource, "seen_count": 0}));
    }

    if count == 0 {
        // The more distinct resources an entity touches, the less surprising
        // one more is.
        let unique = profile.resource_frequencies.len() as f64;
        let novelty = (1.0 - unique / 100.0).max(0.6);
        return (
            round4(novelty),
            json!({"resource": resource, "seen_count": 0, "novel": true}),
        );
    }

    let freq = count as f64 / total as f64;
    let max_count = profile.resource_frequencies.values().max().copied().unwrap_or(0);
    let max_freq = max_count as f64 / total as f64;
    let score = if max_freq > 0.0 { 1.0 - freq / max_freq } else { 0.0 };
    // Halved: rare-but-seen resources are much weaker evidence than novel ones
    (
        round4(score * 0.5),
        json!({
            "resource": resource,
            "seen_count": count,
            "frequency": round4(freq),
        }),
    )
}

fn location_anomaly(profile: &BaselineProfile, location: &str) -> (f64, Value) {
    let count = profile.locations_seen.get(location).copied().unwrap_or(0);
    if count == 0 {
        return (
            0.9,
            json!({"location": location, "novel": true, "seen_count": 0}),
        );
    }

    let total: u64 = profile.locations_seen.values().sum();
    let freq = if total > 0 {
        count as f64 / total as f64
    } else {
        0.0
    };
    // Frequency >= 0.2 is fully normal
    let score = (1.0 - freq * 5.0).max(0.0);
    (
        round4(score),
        json!({
            "location": location,
            "seen_count": count,
            "frequency": round4(freq),
        }),
    )
}

fn ip_anomaly(profile: &BaselineProfile, ip: &str) -> (f64, Value) {
    let count = profile.source_ips.get(ip).copied().unwrap_or(0);
    if count == 0 {
        return (0.8, json!({"source_ip": ip, "novel": true, "seen_count": 0}));
    }

    let total: u64 = profile.source_ips.values().sum();
    let freq = if total > 0 {
        count as f64 / total as f64
    } else {
        0.0
    };
    let score = (1.0 - freq * 3.0).max(0.0);
    (
        round4(score),
        json!({
            "source_ip": ip,
            "seen_count": count,
            "frequency": round4(freq),
        }),
    )
}

/// Sigmoid-mapped z-score; skipped entirely below the sample minimum.
fn duration_anomaly(profile: &BaselineProfile, duration: f64) -> Option<(f64, Value)> {
    if profile.session_duration.count < MIN_SESSION_SAMPLES {
        return None;
    }

    let std = profile.session_duration.std_dev().max(1.0);
    let z = (duration - profile.session_duration.mean).abs() / std;
    let score = 1.0 / (1.0 + (-1.5 * (z - 2.0)).exp());

    Some((
        round4(score),
        json!({
            "duration": duration,
            "z_score": round4(z),
            "baseline_mean": (profile.session_duration.mean * 100.0).round() / 100.0,
            "baseline_std": (std * 100.0).round() / 100.0,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_baseline() -> Arc<BehavioralBaseline> {
        let baseline = Arc::new(BehavioralBaseline::default());
        for _ in 0..100 {
            baseline.observe(
                "alice",
                &BehaviorEvent {
                    hour: Some(10),
                    resource: Some("db-prod".to_string()),
                    location: Some("us-east".to_string()),
                    source_ip: Some("10.0.1.50".to_string()),
                    session_duration: Some(3600.0),
                    ..Default::default()
                },
            );
        }
        baseline
    }

    #[test]
    fn test_insufficient_baseline_is_neutral() {
        let baseline = Arc::new(BehavioralBaseline::default());
        let detector = AnomalyDetector::new(baseline);

        let result = detector.analyze(
            "x",
            &BehaviorEvent {
                hour: Some(3),
                location: Some("moon".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(result.anomaly_score, 0.5);
        assert!(!result.is_anomalous);
        assert_eq!(result.details["reason"], json!("insufficient_baseline"));
    }

    #[test]
    fn test_novel_location_raises_alarm() {
        let baseline = seeded_baseline();
        let detector = AnomalyDetector::new(baseline);

        let result = detector.analyze(
            "alice",
            &BehaviorEvent {
                location: Some("moon-base".to_string()),
                ..Default::default()
            },
        );
        assert!(result.component_scores["location"] > 0.8);
        assert!(result.anomaly_score >= detector.threshold());
        assert!(result.is_anomalous);
    }

    #[test]
    fn test_familiar_event_scores_low() {
        let baseline = seeded_baseline();
        let detector = AnomalyDetector::new(baseline);

        let result = detector.analyze(
            "alice",
            &BehaviorEvent {
                hour: Some(10),
                resource: Some("db-prod".to_string()),
                location: Some("us-east".to_string()),
                source_ip: Some("10.0.1.50".to_string()),
                ..Default::default()
            },
        );
        assert!(result.anomaly_score < 0.2);
        assert!(!result.is_anomalous);
    }

    #[test]
    fn test_unobserved_hour_gets_zero_bucket_penalty() {
        let baseline = seeded_baseline();
        let detector = AnomalyDetector::new(baseline);

        let result = detector.analyze(
            "alice",
            &BehaviorEvent {
                hour: Some(3),
                ..Default::default()
            },
        );
        // 1 - 0/max = 1.0, then clamped at 1.0 after the +0.3 penalty
        assert_eq!(result.component_scores["time"], 1.0);
    }

    #[test]
    fn test_duration_component_skipped_without_samples() {
        let baseline = Arc::new(BehavioralBaseline::default());
        for _ in 0..20 {
            baseline.observe(
                "bob",
                &BehaviorEvent {
                    hour: Some(9),
                    ..Default::default()
                },
            );
        }
        let detector = AnomalyDetector::new(baseline);
        let result = detector.analyze(
            "bob",
            &BehaviorEvent {
                session_duration: Some(90_000.0),
                ..Default::default()
            },
        );
        assert!(!result.component_scores.contains_key("duration"));
        assert_eq!(result.anomaly_score, 0.0);
    }

    #[test]
    fn test_score_stays_in_unit_interval() {
        let baseline = seeded_baseline();
        let detector = AnomalyDetector::new(baseline);

        let result = detector.analyze(
            "alice",
            &BehaviorEvent {
                hour: Some(3),
                resource: Some("never-seen".to_string()),
                location: Some("mars".to_string()),
                source_ip: Some("203.0.113.7".to_string()),
                session_duration: Some(500_000.0),
                ..Default::default()
            },
        );
        assert!(result.anomaly_score >= 0.0 && result.anomaly_score <= 1.0);
        assert!(result.is_anomalous);
        for score in result.component_scores.values() {
            assert!(*score >= 0.0 && *score <= 1.0);
        }
    }

    #[test]
    fn test_rare_but_seen_resource_is_dampened() {
        let baseline = Arc::new(BehavioralBaseline::default());
        for _ in 0..99 {
            baseline.observe(
                "carol",
                &BehaviorEvent {
                    resource: Some("main".to_string()),
                    ..Default::default()
                },
            );
        }
        baseline.observe(
            "carol",
            &BehaviorEvent {
                resource: Some("rare".to_string()),
                ..Default::default()
            },
        );
        let detector = AnomalyDetector::new(baseline);
        let result = detector.analyze(
            "carol",
            &BehaviorEvent {
                resource: Some("rare".to_string()),
                ..Default::default()
            },
        );
        // Dampening halves the raw rarity score, so it can never exceed 0.5
        let score = result.component_scores["resource"];
        assert!(score > 0.0 && score <= 0.5);
    }
}
