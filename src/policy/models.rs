// src/policy/models.rs
// YAML-compatible policy definitions. Condition values are heterogeneous
// (strings, numbers, booleans, lists), so they are modeled as a tagged sum
// with explicit coercion: ordering operators compare numerically and treat
// any type mismatch as a non-match, never an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Decision a matching rule produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
    Challenge,
}

impl PolicyEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEffect::Allow => "allow",
            PolicyEffect::Deny => "deny",
            PolicyEffect::Challenge => "challenge",
        }
    }
}

/// A heterogeneous condition (or context) value.
///
/// Untagged so YAML/JSON literals map naturally: `true`, `3.5`, `"dmz"`,
/// `[1, 2, 3]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<ConditionValue>),
}

impl ConditionValue {
    /// Numeric view; only numbers coerce.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConditionValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert from arbitrary JSON. Null and nested objects have no
    /// condition-value representation and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(ConditionValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(ConditionValue::Num),
            serde_json::Value::String(s) => Some(ConditionValue::Str(s.clone())),
            serde_json::Value::Array(items) => Some(ConditionValue::List(
                items.iter().filter_map(Self::from_json).collect(),
            )),
            _ => None,
        }
    }
}

/// Evaluation context: a flat field → value map.
pub type PolicyContext = BTreeMap<String, ConditionValue>;

/// Build a context map from a JSON object, skipping unrepresentable values.
pub fn context_from_json(value: &serde_json::Value) -> PolicyContext {
    let mut context = PolicyContext::new();
    if let Some(map) = value.as_object() {
        for (field, raw) in map {
            if let Some(converted) = ConditionValue::from_json(raw) {
                context.insert(field.clone(), converted);
            }
        }
    }
    context
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
}

/// A condition that must hold for a rule to apply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
}

impl PolicyCondition {
    pub fn new(field: &str, operator: ConditionOperator, value: ConditionValue) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    /// Evaluate against a context. Missing fields and type mismatches are
    /// non-matches, never errors.
    pub fn evaluate(&self, context: &PolicyContext) -> bool {
        let Some(actual) = context.get(&self.field) else {
            return false;
        };

        match self.operator {
            ConditionOperator::Eq => actual == &self.value,
            ConditionOperator::Ne => actual != &self.value,
            ConditionOperator::Gt => numeric_cmp(actual, &self.value, |o| o.is_gt()),
            ConditionOperator::Lt => numeric_cmp(actual, &self.value, |o| o.is_lt()),
            ConditionOperator::Gte => numeric_cmp(actual, &self.value, |o| o.is_ge()),
            ConditionOperator::Lte => numeric_cmp(actual, &self.value, |o| o.is_le()),
            ConditionOperator::In => contains(&self.value, actual),
            ConditionOperator::NotIn => !contains(&self.value, actual),
        }
    }
}

fn numeric_cmp(
    actual: &ConditionValue,
    expected: &ConditionValue,
    check: fn(std::cmp::Ordering) -> bool,
) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b).map(check).unwrap_or(false),
        _ => false,
    }
}

/// Membership: lists contain elements, strings contain substrings.
fn contains(haystack: &ConditionValue, needle: &ConditionValue) -> bool {
    match (haystack, needle) {
        (ConditionValue::List(items), _) => items.contains(needle),
        (ConditionValue::Str(s), ConditionValue::Str(sub)) => s.contains(sub.as_str()),
        _ => false,
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i64 {
    100
}

/// A single rule within a policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyRule {
    pub rule_id: String,
    #[serde(default)]
    pub description: String,
    pub effect: PolicyEffect,
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
    /// Lower number = stronger rule.
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PolicyRule {
    /// True when the rule is enabled and every condition holds.
    pub fn evaluate(&self, context: &PolicyContext) -> bool {
        self.enabled && self.conditions.iter().all(|c| c.evaluate(context))
    }
}

/// A named policy containing an ordered list of rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// Top-level document shape of a policy YAML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    pub policies: Vec<Policy>,
}
