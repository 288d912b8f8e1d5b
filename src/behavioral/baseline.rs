// src/behavioral/baseline.rs
// Streaming behavioral baselines: per-entity statistical profiles updated
// online, without retaining raw event data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::now_ts;

/// Welford's online mean/variance accumulator.
///
/// Invariant: for `count >= 2`, `variance() == m2 / (count - 1)` matches the
/// sample variance of the observed sequence.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RunningStats {
    pub mean: f64,
    pub m2: f64,
    pub count: u64,
}

impl RunningStats {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.m2 / (self.count - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// A single observed event. Every field is optional; absent fields simply
/// leave their aggregate untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorEvent {
    pub entity_type: Option<String>,
    pub hour: Option<i64>,
    pub day_of_week: Option<i64>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub session_duration: Option<f64>,
    pub location: Option<String>,
    pub source_ip: Option<String>,
    pub features: HashMap<String, f64>,
}

impl BehaviorEvent {
    /// Tolerant extraction from arbitrary JSON: fields of the wrong type
    /// are ignored rather than rejected, so `observe` stays total.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let string_field = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let mut features = HashMap::new();
        if let Some(map) = value.get("features").and_then(|v| v.as_object()) {
            for (name, raw) in map {
                if let Some(num) = raw.as_f64() {
                    features.insert(name.clone(), num);
                }
            }
        }
        Self {
            entity_type: string_field("entity_type"),
            hour: value.get("hour").and_then(|v| v.as_i64()),
            day_of_week: value.get("day_of_week").and_then(|v| v.as_i64()),
            resource: string_field("resource"),
            action: string_field("action"),
            session_duration: value.get("session_duration").and_then(|v| v.as_f64()),
            location: string_field("location"),
            source_ip: string_field("source_ip"),
            features,
        }
    }
}

/// Statistical profile representing normal behavior for one entity.
#[derive(Clone, Debug, Serialize)]
pub struct BaselineProfile {
    pub entity_id: String,
    /// "user", "service" or "system".
    pub entity_type: String,
    pub created_at: f64,
    pub updated_at: f64,
    pub observation_count: u64,
    /// Time-of-day histogram (24 bins). Decay may leave fractional counts.
    pub hour_distribution: [f64; 24],
    /// Day-of-week histogram (7 bins).
    pub dow_distribution: [f64; 7],
    pub resource_frequencies: HashMap<String, u64>,
    pub action_frequencies: HashMap<String, u64>,
    pub locations_seen: HashMap<String, u64>,
    pub source_ips: HashMap<String, u64>,
    pub session_duration: RunningStats,
    pub feature_stats: HashMap<String, RunningStats>,
}

impl BaselineProfile {
    fn new(entity_id: &str, entity_type: &str) -> Self {
        let now = now_ts();
        Self {
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            created_at: now,
            updated_at: now,
            observation_count: 0,
            hour_distribution: [0.0; 24],
            dow_distribution: [0.0; 7],
            resource_frequencies: HashMap::new(),
            action_frequencies: HashMap::new(),
            locations_seen: HashMap::new(),
            source_ips: HashMap::new(),
            session_duration: RunningStats::default(),
            feature_stats: HashMap::new(),
        }
    }

    /// Hour histogram normalized to sum 1, uniform when empty.
    pub fn hour_probabilities(&self) -> [f64; 24] {
        let total: f64 = self.hour_distribution.iter().sum();
        if total == 0.0 {
            return [1.0 / 24.0; 24];
        }
        let mut probs = self.hour_distribution;
        for p in probs.iter_mut() {
            *p /= total;
        }
        probs
    }

    /// Day-of-week histogram normalized to sum 1, uniform when empty.
    pub fn dow_probabilities(&self) -> [f64; 7] {
        let total: f64 = self.dow_distribution.iter().sum();
        if total == 0.0 {
            return [1.0 / 7.0; 7];
        }
        let mut probs = self.dow_distribution;
        for p in probs.iter_mut() {
            *p /= total;
        }
        probs
    }

    /// Most frequently accessed resources, ties broken by name.
    pub fn top_resources(&self, n: usize) -> Vec<(String, u64)> {
        let mut items: Vec<(String, u64)> = self
            .resource_frequencies
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items.truncate(n);
        items
    }

    pub fn peak_hour(&self) -> usize {
        argmax(&self.hour_distribution)
    }

    pub fn peak_day(&self) -> usize {
        argmax(&self.dow_distribution)
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Compact, serializable view of a profile for API and CLI output.
#[derive(Clone, Debug, Serialize)]
pub struct ProfileSummary {
    pub entity_id: String,
    pub entity_type: String,
    pub observation_count: u64,
    pub peak_hour: usize,
    pub peak_day: usize,
    pub top_resources: Vec<(String, u64)>,
    pub unique_locations: usize,
    pub unique_ips: usize,
    pub avg_session_duration: f64,
    pub session_duration_std: f64,
}

/// Learns and maintains behavioral baselines for entities.
///
/// Online statistical updates only; the store never holds raw events.
/// Writers serialize per entity through the map's entry lock, so
/// observations for one entity take effect in arrival order.
pub struct BehavioralBaseline {
    profiles: DashMap<String, BaselineProfile>,
    decay_factor: f64,
}

impl Default for BehavioralBaseline {
    fn default() -> Self {
        Self::new(0.995)
    }
}

impl BehavioralBaseline {
    pub fn new(decay_factor: f64) -> Self {
        Self {
            profiles: DashMap::new(),
            decay_factor,
        }
    }

    pub fn with_config(cfg: &crate::config::BehavioralConfig) -> Self {
        Self::new(cfg.decay_factor)
    }

    /// Update (or create) the profile for `entity_id` from one event.
    ///
    /// Total over well-typed inputs: out-of-range hours/days and empty
    /// strings are dropped silently.
    pub fn observe(&self, entity_id: &str, event: &BehaviorEvent) {
        let entity_type = event.entity_type.as_deref().unwrap_or("user");
        let mut profile = self
            .profiles
            .entry(entity_id.to_string())
            .or_insert_with(|| BaselineProfile::new(entity_id, entity_type));

        profile.observation_count += 1;
        profile.updated_at = now_ts();

        if let Some(hour) = event.hour {
            if (0..24).contains(&hour) {
                profile.hour_distribution[hour as usize] += 1.0;
            }
        }
        if let Some(dow) = event.day_of_week {
            if (0..7).contains(&dow) {
                profile.dow_distribution[dow as usize] += 1.0;
            }
        }
        if let Some(resource) = event.resource.as_deref().filter(|s| !s.is_empty()) {
            *profile
                .resource_frequencies
                .entry(resource.to_string())
                .or_insert(0) += 1;
        }
        if let Some(action) = event.action.as_deref().filter(|s| !s.is_empty()) {
            *profile
                .action_frequencies
                .entry(action.to_string())
                .or_insert(0) += 1;
        }
        if let Some(duration) = event.session_duration {
            profile.session_duration.update(duration);
        }
        if let Some(location) = event.location.as_deref().filter(|s| !s.is_empty()) {
            *profile
                .locations_seen
                .entry(location.to_string())
                .or_insert(0) += 1;
        }
        if let Some(ip) = event.source_ip.as_deref().filter(|s| !s.is_empty()) {
            *profile.source_ips.entry(ip.to_string()).or_insert(0) += 1;
        }
        for (name, value) in &event.features {
            profile
                .feature_stats
                .entry(name.clone())
                .or_default()
                .update(*value);
        }
    }

    pub fn observe_batch(&self, entity_id: &str, events: &[BehaviorEvent]) {
        for event in events {
            self.observe(entity_id, event);
        }
    }

    /// Age the periodic (hour / day-of-week) histograms of every profile.
    ///
    /// Counts and Welford statistics are deliberately untouched: decay
    /// models drift on periodic signals only. Callers invoke this
    /// explicitly; see [`BehavioralBaseline::spawn_decay_task`].
    pub fn decay_profiles(&self) {
        for mut entry in self.profiles.iter_mut() {
            for bucket in entry.hour_distribution.iter_mut() {
                *bucket *= self.decay_factor;
            }
            for bucket in entry.dow_distribution.iter_mut() {
                *bucket *= self.decay_factor;
            }
        }
    }

    /// Optional periodic decay driver. The store is fully correct if this
    /// is never started.
    pub fn spawn_decay_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                store.decay_profiles();
                debug!(profiles = store.profiles.len(), "baseline decay applied");
            }
        })
    }

    /// Copy-on-read snapshot of one profile.
    pub fn get_profile(&self, entity_id: &str) -> Option<BaselineProfile> {
        self.profiles.get(entity_id).map(|p| p.clone())
    }

    pub fn profile_summary(&self, entity_id: &str) -> Option<ProfileSummary> {
        let profile = self.profiles.get(entity_id)?;
        Some(ProfileSummary {
            entity_id: profile.entity_id.clone(),
            entity_type: profile.entity_type.clone(),
            observation_count: profile.observation_count,
            peak_hour: profile.peak_hour(),
            peak_day: profile.peak_day(),
            top_resources: profile.top_resources(5),
            unique_locations: profile.locations_seen.len(),
            unique_ips: profile.source_ips.len(),
            avg_session_duration: round2(profile.session_duration.mean),
            session_duration_std: round2(profile.session_duration.std_dev()),
        })
    }

    pub fn all_entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.profiles.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
