// src/access/context.rs
// Contextual signals behind an access decision: device posture, location,
// time, behavior score, network zone, authentication method.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{now_ts, round4};

/// Base strength per authentication method, before the MFA bonus.
static AUTH_METHOD_SCORES: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("certificate", 0.9),
        ("hardware_token", 0.85),
        ("biometric", 0.8),
        ("totp", 0.7),
        ("password", 0.4),
        ("api_key", 0.5),
        ("session_cookie", 0.3),
    ])
});

/// Trust per network zone. Unknown zones rate below external.
static NETWORK_ZONE_TRUST: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("internal", 0.7),
        ("vpn", 0.6),
        ("dmz", 0.4),
        ("external", 0.2),
    ])
});

/// Device security posture assessment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceHealth {
    pub device_id: String,
    pub os_patched: bool,
    pub antivirus_active: bool,
    pub disk_encrypted: bool,
    pub firewall_enabled: bool,
    /// 0.0-1.0, from the device management plane.
    pub compliance_score: f64,
    pub last_check: f64,
}

impl Default for DeviceHealth {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            os_patched: true,
            antivirus_active: true,
            disk_encrypted: true,
            firewall_enabled: true,
            compliance_score: 1.0,
            last_check: now_ts(),
        }
    }
}

impl DeviceHealth {
    /// Blend of the four binary checks (60%) and the compliance score (40%).
    pub fn health_score(&self) -> f64 {
        let checks = [
            self.os_patched,
            self.antivirus_active,
            self.disk_encrypted,
            self.firewall_enabled,
        ];
        let binary = checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64;
        round4(binary * 0.6 + self.compliance_score * 0.4)
    }
}

/// Complete context for one access decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessContext {
    pub entity_id: String,
    pub resource: String,
    pub action: String,
    pub source_ip: String,
    pub location: String,
    pub hour: i64,
    pub day_of_week: i64,
    pub device: DeviceHealth,
    /// From the anomaly detector; 0 = normal, 1 = anomalous.
    pub behavior_score: f64,
    /// From the risk engine.
    pub risk_score: f64,
    pub session_id: String,
    pub authentication_method: String,
    pub mfa_verified: bool,
    /// internal, vpn, dmz, external.
    pub network_zone: String,
    pub timestamp: f64,
}

impl Default for AccessContext {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            resource: String::new(),
            action: "read".to_string(),
            source_ip: String::new(),
            location: String::new(),
            hour: -1,
            day_of_week: -1,
            device: DeviceHealth::default(),
            behavior_score: 0.0,
            risk_score: 0.0,
            session_id: String::new(),
            authentication_method: "password".to_string(),
            mfa_verified: false,
            network_zone: "external".to_string(),
            timestamp: now_ts(),
        }
    }
}

impl AccessContext {
    /// Authentication strength 0.0-1.0: method table plus an MFA bonus.
    pub fn auth_strength(&self) -> f64 {
        let base = AUTH_METHOD_SCORES
            .get(self.authentication_method.as_str())
            .copied()
            .unwrap_or(0.3);
        if self.mfa_verified {
            (base + 0.2).min(1.0)
        } else {
            base
        }
    }

    /// Network zone trust level 0.0-1.0.
    pub fn network_trust(&self) -> f64 {
        NETWORK_ZONE_TRUST
            .get(self.network_zone.as_str())
            .copied()
            .unwrap_or(0.1)
    }

    /// Flattened view carried inside the emitted decision.
    pub fn summary(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("entity_id".to_string(), json!(self.entity_id)),
            ("resource".to_string(), json!(self.resource)),
            ("action".to_string(), json!(self.action)),
            ("source_ip".to_string(), json!(self.source_ip)),
            ("location".to_string(), json!(self.location)),
            ("device_health".to_string(), json!(self.device.health_score())),
            ("behavior_score".to_string(), json!(self.behavior_score)),
            ("risk_score".to_string(), json!(self.risk_score)),
            ("auth_strength".to_string(), json!(self.auth_strength())),
            ("network_trust".to_string(), json!(self.network_trust())),
            ("mfa_verified".to_string(), json!(self.mfa_verified)),
        ])
    }
}
