// src/policy/mod.rs
// Declarative access policies: YAML-compatible models, rule evaluation
// with priority resolution, and conflict detection.

pub mod engine;
pub mod models;

pub use engine::{PolicyDecision, PolicyEngine};
pub use models::{ConditionValue, Policy, PolicyCondition, PolicyEffect, PolicyRule};
