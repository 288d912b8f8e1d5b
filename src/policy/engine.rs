// src/policy/engine.rs
// Policy evaluation and management: priority-resolved decisions with
// default deny, pairwise conflict detection, YAML import/export, and
// least-privilege recommendations from access logs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AegisError, Result};

use super::models::{
    Policy, PolicyCondition, PolicyContext, PolicyEffect, PolicyFile, PolicyRule,
};

/// Outcome of evaluating a context against the policy store.
#[derive(Clone, Debug, Serialize)]
pub struct PolicyDecision {
    pub decision: PolicyEffect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub total_matches: usize,
    /// True when no rule matched and the built-in deny applied.
    pub default_deny: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConflictParty {
    pub policy_id: String,
    pub rule_id: String,
    pub effect: PolicyEffect,
}

#[derive(Clone, Debug, Serialize)]
pub struct PolicyConflict {
    pub rule_1: ConflictParty,
    pub rule_2: ConflictParty,
    pub conflict_type: String,
    pub resolved_by: String,
    pub winner: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PolicyInfo {
    pub policy_id: String,
    pub name: String,
    pub enabled: bool,
    pub rule_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PolicySummary {
    pub total_policies: usize,
    pub enabled_policies: usize,
    pub total_rules: usize,
    pub policies: Vec<PolicyInfo>,
}

/// One entry of an access log fed into least-privilege analysis.
#[derive(Clone, Debug, Deserialize)]
pub struct AccessLogEntry {
    pub entity_id: String,
    pub resource: String,
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    "read".to_string()
}

#[derive(Clone, Debug, Serialize)]
pub struct LeastPrivilegeRecommendation {
    pub entity_id: String,
    pub recommended_resources: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub principle: String,
    pub note: String,
}

/// Evaluates policies and manages the policy store.
///
/// Policies keep their insertion order, which doubles as the deterministic
/// tie-break when two matching rules share a priority.
#[derive(Default)]
pub struct PolicyEngine {
    policies: Vec<Policy>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace (by id) a policy.
    pub fn add_policy(&mut self, policy: Policy) {
        match self.policies.iter_mut().find(|p| p.policy_id == policy.policy_id) {
            Some(existing) => *existing = policy,
            None => self.policies.push(policy),
        }
    }

    pub fn remove_policy(&mut self, policy_id: &str) -> bool {
        let before = self.policies.len();
        self.policies.retain(|p| p.policy_id != policy_id);
        self.policies.len() != before
    }

    pub fn get_policy(&self, policy_id: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.policy_id == policy_id)
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Evaluate all enabled policies against a context and return the
    /// strongest (lowest-priority-number) matching rule's effect. With no
    /// match the engine denies by default.
    pub fn evaluate(&self, context: &PolicyContext) -> PolicyDecision {
        let mut matches: Vec<(i64, &PolicyRule, &str)> = Vec::new();
        for policy in &self.policies {
            if !policy.enabled {
                continue;
            }
            for rule in &policy.rules {
                if rule.evaluate(context) {
                    matches.push((rule.priority, rule, policy.policy_id.as_str()));
                }
            }
        }

        if matches.is_empty() {
            return PolicyDecision {
                decision: PolicyEffect::Deny,
                rule_id: None,
                policy_id: None,
                priority: None,
                description: None,
                total_matches: 0,
                default_deny: true,
                reason: Some("no_matching_policy".to_string()),
            };
        }

        // Stable sort: insertion order breaks priority ties deterministically
        matches.sort_by_key(|(priority, _, _)| *priority);
        let (priority, rule, policy_id) = matches[0];
        debug!(
            rule = %rule.rule_id,
            policy = %policy_id,
            effect = rule.effect.as_str(),
            "policy matched"
        );

        PolicyDecision {
            decision: rule.effect,
            rule_id: Some(rule.rule_id.clone()),
            policy_id: Some(policy_id.to_string()),
            priority: Some(priority),
            description: Some(rule.description.clone()),
            total_matches: matches.len(),
            default_deny: false,
            reason: None,
        }
    }

    /// What-if evaluation across several contexts.
    pub fn simulate(&self, contexts: &[PolicyContext]) -> Vec<PolicyDecision> {
        contexts.iter().map(|c| self.evaluate(c)).collect()
    }

    /// Find pairs of enabled rules with different effects whose condition
    /// sets could match the same context. Conflicts are reported, never
    /// fatal; priority picks the winner.
    pub fn detect_conflicts(&self) -> Vec<PolicyConflict> {
        let mut all_rules: Vec<(&str, &PolicyRule)> = Vec::new();
        for policy in &self.policies {
            if !policy.enabled {
                continue;
            }
            for rule in &policy.rules {
                if rule.enabled {
                    all_rules.push((policy.policy_id.as_str(), rule));
                }
            }
        }

        let mut conflicts = Vec::new();
        for i in 0..all_rules.len() {
            for j in (i + 1)..all_rules.len() {
                let (pid1, r1) = all_rules[i];
                let (pid2, r2) = all_rules[j];
                if r1.effect == r2.effect {
                    continue;
                }
                if conditions_overlap(&r1.conditions, &r2.conditions) {
                    conflicts.push(PolicyConflict {
                        rule_1: ConflictParty {
                            policy_id: pid1.to_string(),
                            rule_id: r1.rule_id.clone(),
                            effect: r1.effect,
                        },
                        rule_2: ConflictParty {
                            policy_id: pid2.to_string(),
                            rule_id: r2.rule_id.clone(),
                            effect: r2.effect,
                        },
                        conflict_type: "overlapping_conditions_different_effects".to_string(),
                        resolved_by: "priority".to_string(),
                        winner: if r1.priority <= r2.priority {
                            r1.rule_id.clone()
                        } else {
                            r2.rule_id.clone()
                        },
                    });
                }
            }
        }
        conflicts
    }

    /// Load policies from a YAML document, adding them to the store.
    pub fn load_yaml(&mut self, yaml: &str) -> Result<Vec<Policy>> {
        let file: PolicyFile = serde_yaml::from_str(yaml)
            .map_err(|e| AegisError::InvalidInput(format!("bad policy yaml: {e}")))?;
        for policy in &file.policies {
            self.add_policy(policy.clone());
        }
        Ok(file.policies)
    }

    /// Export the full store as a YAML document. Re-importing the output
    /// reproduces the store.
    pub fn export_yaml(&self) -> Result<String> {
        let file = PolicyFile {
            policies: self.policies.clone(),
        };
        serde_yaml::to_string(&file)
            .map_err(|e| AegisError::Internal(format!("yaml export failed: {e}")))
    }

    /// Derive per-entity least-privilege scopes from observed accesses.
    pub fn least_privilege_recommendations(
        &self,
        access_log: &[AccessLogEntry],
    ) -> Vec<LeastPrivilegeRecommendation> {
        let mut resources: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut actions: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for entry in access_log {
            if entry.entity_id.is_empty() || entry.resource.is_empty() {
                continue;
            }
            resources
                .entry(entry.entity_id.as_str())
                .or_default()
                .insert(entry.resource.as_str());
            actions
                .entry(entry.entity_id.as_str())
                .or_default()
                .insert(entry.action.as_str());
        }

        resources
            .iter()
            .map(|(entity, res)| {
                let acts = actions.get(entity).cloned().unwrap_or_default();
                LeastPrivilegeRecommendation {
                    entity_id: entity.to_string(),
                    recommended_resources: res.iter().map(|r| r.to_string()).collect(),
                    recommended_actions: acts.iter().map(|a| a.to_string()).collect(),
                    principle: "least_privilege".to_string(),
                    note: format!(
                        "Entity accessed {} resources with {} action types",
                        res.len(),
                        acts.len()
                    ),
                }
            })
            .collect()
    }

    pub fn policy_summary(&self) -> PolicySummary {
        PolicySummary {
            total_policies: self.policies.len(),
            enabled_policies: self.policies.iter().filter(|p| p.enabled).count(),
            total_rules: self.policies.iter().map(|p| p.rules.len()).sum(),
            policies: self
                .policies
                .iter()
                .map(|p| PolicyInfo {
                    policy_id: p.policy_id.clone(),
                    name: p.name.clone(),
                    enabled: p.enabled,
                    rule_count: p.rules.len(),
                })
                .collect(),
        }
    }
}

/// Two condition sets overlap unless some shared field carries `eq`
/// constraints to different values.
fn conditions_overlap(conds1: &[PolicyCondition], conds2: &[PolicyCondition]) -> bool {
    use super::models::ConditionOperator::Eq;

    let fields1: BTreeSet<&str> = conds1.iter().map(|c| c.field.as_str()).collect();
    let fields2: BTreeSet<&str> = conds2.iter().map(|c| c.field.as_str()).collect();
    let shared: Vec<&&str> = fields1.intersection(&fields2).collect();

    if shared.is_empty() {
        // Disjoint fields: some context could satisfy both
        return true;
    }

    for field in shared {
        for a in conds1.iter().filter(|c| c.field == **field && c.operator == Eq) {
            for b in conds2.iter().filter(|c| c.field == **field && c.operator == Eq) {
                if a.value != b.value {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::models::{context_from_json, ConditionOperator, ConditionValue};

    fn rule(id: &str, effect: PolicyEffect, priority: i64, conds: Vec<PolicyCondition>) -> PolicyRule {
        PolicyRule {
            rule_id: id.to_string(),
            description: String::new(),
            effect,
            conditions: conds,
            priority,
            enabled: true,
        }
    }

    fn policy(id: &str, rules: Vec<PolicyRule>) -> Policy {
        Policy {
            policy_id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            enabled: true,
            tags: vec![],
            rules,
        }
    }

    fn x_eq_1(effect: PolicyEffect, id: &str, priority: i64) -> PolicyRule {
        rule(
            id,
            effect,
            priority,
            vec![PolicyCondition::new(
                "x",
                ConditionOperator::Eq,
                ConditionValue::Num(1.0),
            )],
        )
    }

    #[test]
    fn test_default_deny_with_no_rules() {
        let engine = PolicyEngine::new();
        let decision = engine.evaluate(&PolicyContext::new());
        assert_eq!(decision.decision, PolicyEffect::Deny);
        assert!(decision.default_deny);
        assert_eq!(decision.reason.as_deref(), Some("no_matching_policy"));
        assert_eq!(decision.total_matches, 0);
    }

    #[test]
    fn test_lowest_priority_number_wins() {
        let mut engine = PolicyEngine::new();
        engine.add_policy(policy(
            "p1",
            vec![
                x_eq_1(PolicyEffect::Allow, "r1", 100),
                x_eq_1(PolicyEffect::Deny, "r2", 10),
            ],
        ));
        let context = context_from_json(&serde_json::json!({"x": 1}));
        let decision = engine.evaluate(&context);
        assert_eq!(decision.decision, PolicyEffect::Deny);
        assert_eq!(decision.rule_id.as_deref(), Some("r2"));
        assert_eq!(decision.total_matches, 2);
    }

    #[test]
    fn test_priority_tie_resolved_by_insertion_order() {
        let mut engine = PolicyEngine::new();
        engine.add_policy(policy("p1", vec![x_eq_1(PolicyEffect::Allow, "first", 50)]));
        engine.add_policy(policy("p2", vec![x_eq_1(PolicyEffect::Deny, "second", 50)]));
        let context = context_from_json(&serde_json::json!({"x": 1}));
        let decision = engine.evaluate(&context);
        assert_eq!(decision.rule_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_disabled_policy_ignored() {
        let mut engine = PolicyEngine::new();
        let mut p = policy("p1", vec![x_eq_1(PolicyEffect::Allow, "r1", 1)]);
        p.enabled = false;
        engine.add_policy(p);
        let context = context_from_json(&serde_json::json!({"x": 1}));
        assert!(engine.evaluate(&context).default_deny);
    }

    #[test]
    fn test_conflict_detection_and_winner() {
        let mut engine = PolicyEngine::new();
        engine.add_policy(policy("p1", vec![x_eq_1(PolicyEffect::Allow, "allow-x", 100)]));
        engine.add_policy(policy("p2", vec![x_eq_1(PolicyEffect::Deny, "deny-x", 10)]));

        let conflicts = engine.detect_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].winner, "deny-x");
        assert_eq!(
            conflicts[0].conflict_type,
            "overlapping_conditions_different_effects"
        );
    }

    #[test]
    fn test_distinct_eq_values_do_not_conflict() {
        let mut engine = PolicyEngine::new();
        engine.add_policy(policy(
            "p1",
            vec![rule(
                "internal-allow",
                PolicyEffect::Allow,
                10,
                vec![PolicyCondition::new(
                    "zone",
                    ConditionOperator::Eq,
                    ConditionValue::Str("internal".to_string()),
                )],
            )],
        ));
        engine.add_policy(policy(
            "p2",
            vec![rule(
                "external-deny",
                PolicyEffect::Deny,
                10,
                vec![PolicyCondition::new(
                    "zone",
                    ConditionOperator::Eq,
                    ConditionValue::Str("external".to_string()),
                )],
            )],
        ));
        assert!(engine.detect_conflicts().is_empty());
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut engine = PolicyEngine::new();
        engine.add_policy(policy(
            "deny-high-risk",
            vec![rule(
                "r1",
                PolicyEffect::Deny,
                10,
                vec![PolicyCondition::new(
                    "risk_score",
                    ConditionOperator::Gt,
                    ConditionValue::Num(0.8),
                )],
            )],
        ));

        let yaml = engine.export_yaml().unwrap();
        let mut fresh = PolicyEngine::new();
        fresh.load_yaml(&yaml).unwrap();

        let original = engine.get_policy("deny-high-risk").unwrap();
        let restored = fresh.get_policy("deny-high-risk").unwrap();
        assert_eq!(restored.rules.len(), original.rules.len());
        assert_eq!(restored.rules[0].rule_id, "r1");
        assert_eq!(restored.rules[0].priority, 10);

        // Both engines must produce identical decisions
        let context = context_from_json(&serde_json::json!({"risk_score": 0.95}));
        assert_eq!(
            engine.evaluate(&context).decision,
            fresh.evaluate(&context).decision
        );
    }

    #[test]
    fn test_load_yaml_spec_format() {
        let yaml = r#"
policies:
  - policy_id: require-mfa-external
    name: Require MFA for External Access
    rules:
      - rule_id: r2
        description: Challenge external access without MFA
        effect: challenge
        priority: 20
        conditions:
          - field: network_zone
            operator: eq
            value: external
          - field: mfa_verified
            operator: eq
            value: false
"#;
        let mut engine = PolicyEngine::new();
        let loaded = engine.load_yaml(yaml).unwrap();
        assert_eq!(loaded.len(), 1);

        let context = context_from_json(
            &serde_json::json!({"network_zone": "external", "mfa_verified": false}),
        );
        let decision = engine.evaluate(&context);
        assert_eq!(decision.decision, PolicyEffect::Challenge);
        assert_eq!(decision.rule_id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_bad_yaml_is_invalid_input() {
        let mut engine = PolicyEngine::new();
        assert!(matches!(
            engine.load_yaml(": not yaml: ["),
            Err(AegisError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_add_policy_replaces_by_id() {
        let mut engine = PolicyEngine::new();
        engine.add_policy(policy("p1", vec![]));
        engine.add_policy(policy("p1", vec![x_eq_1(PolicyEffect::Allow, "r", 1)]));
        assert_eq!(engine.policy_count(), 1);
        assert_eq!(engine.get_policy("p1").unwrap().rules.len(), 1);
        assert!(engine.remove_policy("p1"));
        assert!(!engine.remove_policy("p1"));
    }

    #[test]
    fn test_least_privilege_recommendations() {
        let engine = PolicyEngine::new();
        let log = vec![
            AccessLogEntry {
                entity_id: "alice".to_string(),
                resource: "db".to_string(),
                action: "read".to_string(),
            },
            AccessLogEntry {
                entity_id: "alice".to_string(),
                resource: "repo".to_string(),
                action: "write".to_string(),
            },
            AccessLogEntry {
                entity_id: "".to_string(),
                resource: "ignored".to_string(),
                action: "read".to_string(),
            },
        ];
        let recs = engine.least_privilege_recommendations(&log);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].entity_id, "alice");
        assert_eq!(recs[0].recommended_resources, vec!["db", "repo"]);
        assert_eq!(recs[0].recommended_actions, vec!["read", "write"]);
    }

    #[test]
    fn test_policy_summary() {
        let mut engine = PolicyEngine::new();
        engine.add_policy(policy("p1", vec![x_eq_1(PolicyEffect::Allow, "r1", 1)]));
        let mut p2 = policy("p2", vec![]);
        p2.enabled = false;
        engine.add_policy(p2);

        let summary = engine.policy_summary();
        assert_eq!(summary.total_policies, 2);
        assert_eq!(summary.enabled_policies, 1);
        assert_eq!(summary.total_rules, 1);
        assert_eq!(summary.policies.len(), 2);
    }
}
