// src/behavioral/patterns.rs
// Population-level pattern queries over the baseline store: temporal and
// geographic anomaly checks, statistical outliers, entropy profiles.

use std::sync::Arc;

use ndarray::Array1;
use serde::Serialize;

use crate::round4;

use super::baseline::BehavioralBaseline;

const MIN_PROFILE_OBSERVATIONS: u64 = 10;

#[derive(Clone, Debug, Serialize)]
pub struct TimeAnomalyReport {
    pub anomalous: bool,
    pub score: f64,
    pub hour_score: f64,
    pub dow_score: f64,
    pub expected_peak_hour: usize,
    pub expected_peak_day: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct GeoAnomalyReport {
    pub anomalous: bool,
    pub score: f64,
    pub novel: bool,
    pub visit_count: u64,
    pub frequency: f64,
}

/// Which population feature to test for outliers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutlierFeature {
    ObservationCount,
    UniqueResources,
    UniqueLocations,
    UniqueIps,
}

impl OutlierFeature {
    fn name(&self) -> &'static str {
        match self {
            OutlierFeature::ObservationCount => "observation_count",
            OutlierFeature::UniqueResources => "unique_resources",
            OutlierFeature::UniqueLocations => "unique_locations",
            OutlierFeature::UniqueIps => "unique_ips",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PopulationOutlier {
    pub entity_id: String,
    pub feature: String,
    pub value: f64,
    pub z_score: f64,
    pub population_mean: f64,
    pub population_std: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct EntropyReport {
    pub hour_entropy: f64,
    pub resource_entropy: Option<f64>,
}

/// Analyzes behavioral patterns across entity populations.
pub struct PatternAnalyzer {
    baseline: Arc<BehavioralBaseline>,
}

impl PatternAnalyzer {
    pub fn new(baseline: Arc<BehavioralBaseline>) -> Self {
        Self { baseline }
    }

    /// Is access at this time anomalous for the entity? `None` when the
    /// entity has no established baseline.
    pub fn detect_time_anomaly(
        &self,
        entity_id: &str,
        hour: usize,
        day_of_week: usize,
    ) -> Option<TimeAnomalyReport> {
        let profile = self.baseline.get_profile(entity_id)?;
        if profile.observation_count < MIN_PROFILE_OBSERVATIONS || hour >= 24 || day_of_week >= 7
        {
            return None;
        }

        let hour_probs = profile.hour_probabilities();
        let dow_probs = profile.dow_probabilities();
        let hour_max = hour_probs.iter().cloned().fold(1e-10, f64::max);
        let dow_max = dow_probs.iter().cloned().fold(1e-10, f64::max);

        let hour_score = 1.0 - hour_probs[hour] / hour_max;
        let dow_score = 1.0 - dow_probs[day_of_week] / dow_max;
        let combined = 0.6 * hour_score + 0.4 * dow_score;

        Some(TimeAnomalyReport {
            anomalous: combined > 0.7,
            score: round4(combined),
            hour_score: round4(hour_score),
            dow_score: round4(dow_score),
            expected_peak_hour: profile.peak_hour(),
            expected_peak_day: profile.peak_day(),
        })
    }

    /// Is a location anomalous for an entity? `None` without a profile.
    pub fn detect_geographic_anomaly(
        &self,
        entity_id: &str,
        location: &str,
    ) -> Option<GeoAnomalyReport> {
        let profile = self.baseline.get_profile(entity_id)?;

        let count = profile.locations_seen.get(location).copied().unwrap_or(0);
        if count == 0 {
            return Some(GeoAnomalyReport {
                anomalous: true,
                score: 0.9,
                novel: true,
                visit_count: 0,
                frequency: 0.0,
            });
        }

        let total: u64 = profile.locations_seen.values().sum();
        let freq = if total > 0 {
            count as f64 / total as f64
        } else {
            0.0
        };
        let score = (1.0 - freq * 5.0).max(0.0);
        Some(GeoAnomalyReport {
            anomalous: score > 0.7,
            score: round4(score),
            novel: false,
            visit_count: count,
            frequency: round4(freq),
        })
    }

    /// Entities that are statistical outliers within the population,
    /// strongest first. Needs at least three profiles and nonzero spread.
    pub fn population_outliers(
        &self,
        feature: OutlierFeature,
        z_threshold: f64,
    ) -> Vec<PopulationOutlier> {
        let ids = self.baseline.all_entity_ids();
        let mut values = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some(profile) = self.baseline.get_profile(id) else {
                continue;
            };
            let value = match feature {
                OutlierFeature::ObservationCount => profile.observation_count as f64,
                OutlierFeature::UniqueResources => profile.resource_frequencies.len() as f64,
                OutlierFeature::UniqueLocations => profile.locations_seen.len() as f64,
                OutlierFeature::UniqueIps => profile.source_ips.len() as f64,
            };
            values.push((id.clone(), value));
        }

        if values.len() < 3 {
            return Vec::new();
        }

        let arr = Array1::from_iter(values.iter().map(|(_, v)| *v));
        let mean = arr.mean().unwrap_or(0.0);
        let std = arr.std(0.0);
        if std == 0.0 {
            return Vec::new();
        }

        let mut outliers: Vec<PopulationOutlier> = values
            .into_iter()
            .filter_map(|(entity_id, value)| {
                let z = (value - mean).abs() / std;
                (z > z_threshold).then(|| PopulationOutlier {
                    entity_id,
                    feature: feature.name().to_string(),
                    value,
                    z_score: round4(z),
                    population_mean: (mean * 100.0).round() / 100.0,
                    population_std: (std * 100.0).round() / 100.0,
                })
            })
            .collect();
        outliers.sort_by(|a, b| {
            b.z_score
                .partial_cmp(&a.z_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        outliers
    }

    /// Shannon entropy (bits) of the hour and resource distributions.
    /// Low entropy means predictable behavior; a sudden rise is a signal
    /// worth investigating.
    pub fn entropy_score(&self, entity_id: &str) -> Option<EntropyReport> {
        let profile = self.baseline.get_profile(entity_id)?;

        let hour_entropy = shannon_entropy(profile.hour_probabilities().iter().copied());

        let total_res: u64 = profile.resource_frequencies.values().sum();
        let resource_entropy = (total_res > 0).then(|| {
            shannon_entropy(
                profile
                    .resource_frequencies
                    .values()
                    .map(|c| *c as f64 / total_res as f64),
            )
        });

        Some(EntropyReport {
            hour_entropy,
            resource_entropy,
        })
    }
}

fn shannon_entropy(probs: impl Iterator<Item = f64>) -> f64 {
    let entropy: f64 = probs
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.log2())
        .sum();
    round4(entropy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavioral::baseline::BehaviorEvent;

    fn store() -> Arc<BehavioralBaseline> {
        Arc::new(BehavioralBaseline::default())
    }

    fn observe_n(baseline: &BehavioralBaseline, entity: &str, n: usize, event: BehaviorEvent) {
        for _ in 0..n {
            baseline.observe(entity, &event);
        }
    }

    #[test]
    fn test_time_anomaly_flags_off_hours() {
        let baseline = store();
        observe_n(
            &baseline,
            "alice",
            50,
            BehaviorEvent {
                hour: Some(10),
                day_of_week: Some(2),
                ..Default::default()
            },
        );
        let analyzer = PatternAnalyzer::new(baseline);

        let report = analyzer.detect_time_anomaly("alice", 3, 6).unwrap();
        assert!(report.anomalous);
        assert_eq!(report.expected_peak_hour, 10);
        assert_eq!(report.expected_peak_day, 2);

        let normal = analyzer.detect_time_anomaly("alice", 10, 2).unwrap();
        assert!(!normal.anomalous);
        assert!(normal.score < 0.1);
    }

    #[test]
    fn test_time_anomaly_requires_baseline() {
        let analyzer = PatternAnalyzer::new(store());
        assert!(analyzer.detect_time_anomaly("ghost", 3, 1).is_none());
    }

    #[test]
    fn test_geographic_anomaly_novel_location() {
        let baseline = store();
        observe_n(
            &baseline,
            "bob",
            20,
            BehaviorEvent {
                location: Some("us-east".to_string()),
                ..Default::default()
            },
        );
        let analyzer = PatternAnalyzer::new(baseline);

        let report = analyzer.detect_geographic_anomaly("bob", "antarctica").unwrap();
        assert!(report.anomalous);
        assert!(report.novel);
        assert_eq!(report.score, 0.9);

        let home = analyzer.detect_geographic_anomaly("bob", "us-east").unwrap();
        assert!(!home.anomalous);
        assert_eq!(home.visit_count, 20);
    }

    #[test]
    fn test_population_outliers() {
        let baseline = store();
        for i in 0..6 {
            observe_n(
                &baseline,
                &format!("user-{i}"),
                10,
                BehaviorEvent {
                    resource: Some("shared".to_string()),
                    ..Default::default()
                },
            );
        }
        // One entity with wildly more observations
        observe_n(
            &baseline,
            "scanner",
            500,
            BehaviorEvent {
                resource: Some("shared".to_string()),
                ..Default::default()
            },
        );
        let analyzer = PatternAnalyzer::new(baseline);

        let outliers = analyzer.population_outliers(OutlierFeature::ObservationCount, 2.0);
        assert_eq!(outliers.len(), 1);
        assert_eq!(outliers[0].entity_id, "scanner");
        assert!(outliers[0].z_score > 2.0);
    }

    #[test]
    fn test_outliers_need_population_and_spread() {
        let baseline = store();
        observe_n(&baseline, "only", 10, BehaviorEvent::default());
        let analyzer = PatternAnalyzer::new(Arc::clone(&baseline));
        assert!(analyzer
            .population_outliers(OutlierFeature::ObservationCount, 2.0)
            .is_empty());

        // Identical profiles: zero std, no outliers
        observe_n(&baseline, "two", 10, BehaviorEvent::default());
        observe_n(&baseline, "three", 10, BehaviorEvent::default());
        assert!(analyzer
            .population_outliers(OutlierFeature::ObservationCount, 2.0)
            .is_empty());
    }

    #[test]
    fn test_entropy_concentrated_vs_spread() {
        let baseline = store();
        observe_n(
            &baseline,
            "focused",
            40,
            BehaviorEvent {
                hour: Some(9),
                resource: Some("one".to_string()),
                ..Default::default()
            },
        );
        for hour in 0..24 {
            baseline.observe(
                "roamer",
                &BehaviorEvent {
                    hour: Some(hour),
                    ..Default::default()
                },
            );
        }
        let analyzer = PatternAnalyzer::new(baseline);

        let focused = analyzer.entropy_score("focused").unwrap();
        let roamer = analyzer.entropy_score("roamer").unwrap();
        assert_eq!(focused.hour_entropy, 0.0);
        assert_eq!(focused.resource_entropy, Some(0.0));
        // Uniform over 24 hours: log2(24) ≈ 4.585 bits
        assert!((roamer.hour_entropy - 24f64.log2()).abs() < 1e-3);
        assert!(roamer.resource_entropy.is_none());
    }
}
