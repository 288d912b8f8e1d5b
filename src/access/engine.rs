// src/access/engine.rs
// Risk-based adaptive access control: context signals combine into a trust
// score, compared against resource-sensitivity-adjusted thresholds.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::AccessConfig;
use crate::{now_ts, round4};

use super::context::AccessContext;

/// Graded access decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
    /// Step-up authentication required.
    Challenge,
    /// Allow with reduced privileges.
    Restrict,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::Challenge => "challenge",
            Decision::Restrict => "restrict",
        }
    }

    /// Explicit strictness order: ALLOW < RESTRICT < CHALLENGE < DENY.
    ///
    /// Escalation detection MUST compare through this order; the decision
    /// names themselves carry no meaningful ordering.
    pub fn strictness(&self) -> u8 {
        match self {
            Decision::Allow => 0,
            Decision::Restrict => 1,
            Decision::Challenge => 2,
            Decision::Deny => 3,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emitted access decision with its full justification.
#[derive(Clone, Debug, Serialize)]
pub struct AccessDecision {
    pub decision: Decision,
    pub confidence: f64,
    /// `round4(1 - trust_score)`.
    pub risk_level: f64,
    pub reasons: Vec<String>,
    pub required_actions: Vec<String>,
    pub context_summary: BTreeMap<String, Value>,
    pub timestamp: f64,
}

/// Compact decision record for API listings.
#[derive(Clone, Debug, Serialize)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub confidence: f64,
    pub risk_level: f64,
    pub reasons: Vec<String>,
    pub entity_id: String,
    pub resource: String,
}

/// Risk-based adaptive access control engine.
///
/// Combines authentication, device, behavior, network and risk signals
/// into a trust score and grades it against per-resource thresholds.
pub struct AccessDecisionEngine {
    config: AccessConfig,
    resource_sensitivity: RwLock<HashMap<String, f64>>,
    decision_log: RwLock<Vec<AccessDecision>>,
}

impl Default for AccessDecisionEngine {
    fn default() -> Self {
        Self::with_config(AccessConfig::default())
    }
}

impl AccessDecisionEngine {
    pub fn with_config(config: AccessConfig) -> Self {
        Self {
            config,
            resource_sensitivity: RwLock::new(HashMap::new()),
            decision_log: RwLock::new(Vec::new()),
        }
    }

    /// Set sensitivity for a resource (0.0 = public, 1.0 = critical).
    pub fn set_resource_sensitivity(&self, resource: &str, level: f64) {
        self.resource_sensitivity
            .write()
            .insert(resource.to_string(), level.clamp(0.0, 1.0));
    }

    /// Evaluate an access request and return a decision.
    pub fn evaluate(&self, context: &AccessContext) -> AccessDecision {
        let trust_score = self.trust_score(context);
        let sensitivity = self
            .resource_sensitivity
            .read()
            .get(&context.resource)
            .copied()
            .unwrap_or(0.5);

        // Sensitive resources push every threshold upward
        let effective_deny = self.config.deny_threshold * (1.0 + sensitivity * 0.5);
        let effective_challenge = self.config.challenge_threshold * (1.0 + sensitivity * 0.3);
        let effective_restrict = self.config.restrict_threshold * (1.0 + sensitivity * 0.2);

        let mut reasons = Vec::new();
        let mut required_actions = Vec::new();

        let decision = if trust_score < effective_deny {
            reasons.push(format!(
                "Trust score {trust_score:.2} below deny threshold {effective_deny:.2}"
            ));
            if context.behavior_score > 0.7 {
                reasons.push("High behavioral anomaly score".to_string());
            }
            if context.device.health_score() < 0.5 {
                reasons.push("Device health below minimum".to_string());
            }
            Decision::Deny
        } else if trust_score < effective_challenge {
            reasons.push(format!(
                "Trust score {trust_score:.2} requires step-up auth"
            ));
            if !context.mfa_verified {
                required_actions.push("mfa_verification".to_string());
            }
            if context.device.health_score() < 0.7 {
                required_actions.push("device_compliance_check".to_string());
            }
            Decision::Challenge
        } else if trust_score < effective_restrict {
            reasons.push(format!(
                "Trust score {trust_score:.2} allows restricted access"
            ));
            if matches!(context.action.as_str(), "write" | "delete" | "admin") {
                required_actions.push("reduce_to_read_only".to_string());
            }
            Decision::Restrict
        } else {
            reasons.push(format!("Trust score {trust_score:.2} meets threshold"));
            Decision::Allow
        };

        debug!(
            entity = %context.entity_id,
            resource = %context.resource,
            trust = trust_score,
            decision = %decision,
            "access evaluated"
        );

        let result = AccessDecision {
            decision,
            confidence: ((trust_score - 0.5).abs() * 2.0).min(1.0),
            risk_level: round4(1.0 - trust_score),
            reasons,
            required_actions,
            context_summary: context.summary(),
            timestamp: now_ts(),
        };

        self.decision_log.write().push(result.clone());
        result
    }

    /// Weighted composite trust score, clamped to [0, 1].
    fn trust_score(&self, ctx: &AccessContext) -> f64 {
        let cfg = &self.config;
        let trust = ctx.auth_strength() * cfg.auth_weight
            + ctx.device.health_score() * cfg.device_weight
            + (1.0 - ctx.behavior_score).max(0.0) * cfg.behavior_weight
            + ctx.network_trust() * cfg.network_weight
            + (1.0 - ctx.risk_score).max(0.0) * cfg.risk_weight;
        round4(trust.clamp(0.0, 1.0))
    }

    /// The most recent `n` decisions, oldest first.
    pub fn recent_decisions(&self, n: usize) -> Vec<DecisionRecord> {
        let log = self.decision_log.read();
        let start = log.len().saturating_sub(n);
        log[start..]
            .iter()
            .map(|d| DecisionRecord {
                decision: d.decision,
                confidence: d.confidence,
                risk_level: d.risk_level,
                reasons: d.reasons.clone(),
                entity_id: d
                    .context_summary
                    .get("entity_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                resource: d
                    .context_summary
                    .get("resource")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect()
    }

    /// Decision counts per kind over the whole log.
    pub fn decision_stats(&self) -> BTreeMap<String, u64> {
        let mut stats: BTreeMap<String, u64> = BTreeMap::from([
            ("allow".to_string(), 0),
            ("deny".to_string(), 0),
            ("challenge".to_string(), 0),
            ("restrict".to_string(), 0),
        ]);
        for decision in self.decision_log.read().iter() {
            *stats
                .entry(decision.decision.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::context::DeviceHealth;

    fn trusted_context() -> AccessContext {
        AccessContext {
            entity_id: "alice".to_string(),
            resource: "docs".to_string(),
            authentication_method: "certificate".to_string(),
            mfa_verified: true,
            network_zone: "internal".to_string(),
            behavior_score: 0.05,
            risk_score: 0.1,
            ..Default::default()
        }
    }

    fn hostile_context() -> AccessContext {
        AccessContext {
            entity_id: "mallory".to_string(),
            resource: "db-prod".to_string(),
            action: "write".to_string(),
            authentication_method: "session_cookie".to_string(),
            network_zone: "external".to_string(),
            behavior_score: 0.95,
            risk_score: 0.9,
            device: DeviceHealth {
                os_patched: false,
                antivirus_active: false,
                disk_encrypted: false,
                firewall_enabled: false,
                compliance_score: 0.1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_trusted_context_allows() {
        let engine = AccessDecisionEngine::default();
        let decision = engine.evaluate(&trusted_context());
        assert_eq!(decision.decision, Decision::Allow);
        assert!(decision.required_actions.is_empty());
        assert!(decision.risk_level < 0.3);
    }

    #[test]
    fn test_hostile_context_denied_with_reasons() {
        let engine = AccessDecisionEngine::default();
        let decision = engine.evaluate(&hostile_context());
        assert_eq!(decision.decision, Decision::Deny);
        assert!(decision
            .reasons
            .contains(&"High behavioral anomaly score".to_string()));
        assert!(decision
            .reasons
            .contains(&"Device health below minimum".to_string()));
    }

    #[test]
    fn test_challenge_requests_mfa_and_compliance() {
        let engine = AccessDecisionEngine::default();
        let ctx = AccessContext {
            entity_id: "bob".to_string(),
            resource: "api".to_string(),
            authentication_method: "password".to_string(),
            network_zone: "external".to_string(),
            behavior_score: 0.4,
            risk_score: 0.4,
            device: DeviceHealth {
                os_patched: false,
                compliance_score: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        let decision = engine.evaluate(&ctx);
        assert_eq!(decision.decision, Decision::Challenge);
        assert!(decision
            .required_actions
            .contains(&"mfa_verification".to_string()));
        assert!(decision
            .required_actions
            .contains(&"device_compliance_check".to_string()));
    }

    #[test]
    fn test_restrict_downgrades_writes() {
        let engine = AccessDecisionEngine::default();
        // Low sensitivity so the thresholds sit at their base values
        engine.set_resource_sensitivity("repo", 0.0);
        let ctx = AccessContext {
            entity_id: "carol".to_string(),
            resource: "repo".to_string(),
            action: "write".to_string(),
            authentication_method: "totp".to_string(),
            network_zone: "vpn".to_string(),
            behavior_score: 0.3,
            risk_score: 0.35,
            device: DeviceHealth {
                compliance_score: 0.6,
                ..Default::default()
            },
            ..Default::default()
        };
        let decision = engine.evaluate(&ctx);
        assert_eq!(decision.decision, Decision::Restrict);
        assert!(decision
            .required_actions
            .contains(&"reduce_to_read_only".to_string()));
    }

    #[test]
    fn test_sensitivity_never_loosens_decisions() {
        let strictness_at = |sensitivity: f64| {
            let engine = AccessDecisionEngine::default();
            engine.set_resource_sensitivity("vault", sensitivity);
            let mut ctx = trusted_context();
            ctx.resource = "vault".to_string();
            ctx.behavior_score = 0.5;
            ctx.risk_score = 0.5;
            engine.evaluate(&ctx).decision.strictness()
        };
        assert!(strictness_at(1.0) >= strictness_at(0.0));
    }

    #[test]
    fn test_confidence_reflects_distance_from_midpoint() {
        let engine = AccessDecisionEngine::default();
        let decision = engine.evaluate(&trusted_context());
        assert!(decision.confidence > 0.5);
        assert!(decision.confidence <= 1.0);
    }

    #[test]
    fn test_log_and_stats() {
        let engine = AccessDecisionEngine::default();
        engine.evaluate(&trusted_context());
        engine.evaluate(&hostile_context());
        engine.evaluate(&trusted_context());

        let stats = engine.decision_stats();
        assert_eq!(stats["allow"], 2);
        assert_eq!(stats["deny"], 1);

        let recent = engine.recent_decisions(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].entity_id, "mallory");
        assert_eq!(recent[1].entity_id, "alice");
    }

    #[test]
    fn test_strictness_total_order() {
        assert!(Decision::Allow.strictness() < Decision::Restrict.strictness());
        assert!(Decision::Restrict.strictness() < Decision::Challenge.strictness());
        assert!(Decision::Challenge.strictness() < Decision::Deny.strictness());
    }
}
