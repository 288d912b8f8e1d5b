// src/config.rs
// Engine configuration loaded from TOML with full defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AegisError, Result};

/// Top-level configuration for every AEGIS engine.
///
/// Each section maps to one engine's tunables. A missing file or a file
/// with only a subset of the sections yields defaults for the rest, so the
/// platform always starts with a complete, sane configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AegisConfig {
    pub behavioral: BehavioralConfig,
    pub risk: RiskConfig,
    pub access: AccessConfig,
    pub verifier: VerifierConfig,
    pub lateral: LateralConfig,
    pub microseg: MicrosegConfig,
    pub api: ApiConfig,
}

impl AegisConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AegisError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw)
            .map_err(|e| AegisError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Load from a file when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

/// Baseline learning and anomaly scoring tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BehavioralConfig {
    /// Multiplier applied to hour/day-of-week histograms by `decay_profiles`.
    pub decay_factor: f64,
    /// Composite anomaly score at or above which an event is flagged.
    pub anomaly_threshold: f64,
    pub time_weight: f64,
    pub resource_weight: f64,
    pub location_weight: f64,
    pub ip_weight: f64,
    pub duration_weight: f64,
}

impl Default for BehavioralConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.995,
            anomaly_threshold: 0.7,
            time_weight: 0.20,
            resource_weight: 0.25,
            location_weight: 0.25,
            ip_weight: 0.15,
            duration_weight: 0.15,
        }
    }
}

/// Composite risk weighting and level thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub behavior_weight: f64,
    pub device_weight: f64,
    pub network_weight: f64,
    pub threat_weight: f64,
    pub auth_weight: f64,
    pub low_threshold: f64,
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            behavior_weight: 0.30,
            device_weight: 0.20,
            network_weight: 0.15,
            threat_weight: 0.20,
            auth_weight: 0.15,
            low_threshold: 0.3,
            medium_threshold: 0.5,
            high_threshold: 0.7,
            critical_threshold: 0.9,
        }
    }
}

/// Trust-score weighting and base decision thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub deny_threshold: f64,
    pub challenge_threshold: f64,
    pub restrict_threshold: f64,
    pub auth_weight: f64,
    pub device_weight: f64,
    pub behavior_weight: f64,
    pub network_weight: f64,
    pub risk_weight: f64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            deny_threshold: 0.3,
            challenge_threshold: 0.5,
            restrict_threshold: 0.7,
            auth_weight: 0.20,
            device_weight: 0.20,
            behavior_weight: 0.25,
            network_weight: 0.15,
            risk_weight: 0.20,
        }
    }
}

/// Continuous verification cadence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Seconds between mandatory re-evaluations of an active session.
    pub reverify_interval_secs: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            reverify_interval_secs: 300.0,
        }
    }
}

/// Access graph and GNN detector tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LateralConfig {
    pub feature_dim: usize,
    pub hidden_dim: usize,
    pub output_dim: usize,
    /// Base RNG seed; layer two uses `seed + 1`.
    pub seed: u64,
    /// Distinct targets before a source counts as credential hopping.
    pub hop_threshold: usize,
    /// L2 embedding drift above which a node is anomalous.
    pub anomaly_threshold: f64,
}

impl Default for LateralConfig {
    fn default() -> Self {
        Self {
            feature_dim: 8,
            hidden_dim: 16,
            output_dim: 8,
            seed: 42,
            hop_threshold: 3,
            anomaly_threshold: 2.0,
        }
    }
}

/// Microsegmentation tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MicrosegConfig {
    /// Flows observed across a segment pair before recommending a policy.
    pub min_flow_count: u64,
    /// Affinity cutoff used by flow cluster discovery.
    pub cluster_threshold: f64,
}

impl Default for MicrosegConfig {
    fn default() -> Self {
        Self {
            min_flow_count: 5,
            cluster_threshold: 0.1,
        }
    }
}

/// HTTP facade bind address.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}
