// src/access/verification.rs
// Continuous verification: trust is not a one-time gate. Every active
// session is periodically re-evaluated and decisions may escalate.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::now_ts;

use super::context::AccessContext;
use super::engine::{AccessDecisionEngine, Decision};

/// Direction of recent trust movement within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTrend {
    Improving,
    Stable,
    Degrading,
}

/// Verification state for one `(entity, session)` pair.
#[derive(Clone, Debug, Serialize)]
pub struct VerificationState {
    pub entity_id: String,
    pub session_id: String,
    pub initial_decision: Decision,
    pub current_decision: Decision,
    pub last_verified: f64,
    pub verification_count: u64,
    pub escalation_count: u64,
    /// Trust values (`1 - risk_level`) in verification order.
    pub trust_history: Vec<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionInit {
    pub session_id: String,
    pub initial_decision: Decision,
    pub risk_level: f64,
    pub next_verification: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReverifyReport {
    pub session_id: String,
    pub previous_decision: Decision,
    pub current_decision: Decision,
    pub risk_level: f64,
    pub trust_trend: TrustTrend,
    pub escalated: bool,
    pub verification_count: u64,
}

/// Outcome of a `reverify` call; unknown sessions are initialized instead.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum VerificationOutcome {
    Initialized(SessionInit),
    Reverified(ReverifyReport),
}

/// Summary view for status queries.
#[derive(Clone, Debug, Serialize)]
pub struct VerificationSummary {
    pub entity_id: String,
    pub session_id: String,
    pub current_decision: Decision,
    pub verification_count: u64,
    pub escalation_count: u64,
    pub trust_trend: TrustTrend,
}

/// Continuously re-evaluates access decisions during active sessions.
pub struct ContinuousVerifier {
    engine: Arc<AccessDecisionEngine>,
    reverify_interval: f64,
    states: DashMap<(String, String), VerificationState>,
}

impl ContinuousVerifier {
    pub fn new(engine: Arc<AccessDecisionEngine>, reverify_interval: f64) -> Self {
        Self {
            engine,
            reverify_interval,
            states: DashMap::new(),
        }
    }

    /// Evaluate once and begin tracking the session.
    pub fn initialize_session(&self, context: &AccessContext) -> SessionInit {
        let decision = self.engine.evaluate(context);

        let state = VerificationState {
            entity_id: context.entity_id.clone(),
            session_id: context.session_id.clone(),
            initial_decision: decision.decision,
            current_decision: decision.decision,
            last_verified: now_ts(),
            verification_count: 0,
            escalation_count: 0,
            trust_history: vec![1.0 - decision.risk_level],
        };
        self.states.insert(
            (context.entity_id.clone(), context.session_id.clone()),
            state,
        );

        SessionInit {
            session_id: context.session_id.clone(),
            initial_decision: decision.decision,
            risk_level: decision.risk_level,
            next_verification: now_ts() + self.reverify_interval,
        }
    }

    /// Re-evaluate trust for an active session. Sessions the verifier has
    /// never seen are initialized instead.
    pub fn reverify(&self, context: &AccessContext) -> VerificationOutcome {
        let key = (context.entity_id.clone(), context.session_id.clone());
        let Some(mut state) = self.states.get_mut(&key) else {
            return VerificationOutcome::Initialized(self.initialize_session(context));
        };

        let decision = self.engine.evaluate(context);
        let new_trust = 1.0 - decision.risk_level;

        state.verification_count += 1;
        state.last_verified = now_ts();
        state.trust_history.push(new_trust);

        let previous = state.current_decision;
        let escalated = decision.decision.strictness() > previous.strictness();
        if escalated {
            state.escalation_count += 1;
            warn!(
                entity = %context.entity_id,
                session = %context.session_id,
                from = %previous,
                to = %decision.decision,
                "session decision escalated"
            );
        }
        state.current_decision = decision.decision;
        let trend = trust_trend(&state.trust_history);
        let verification_count = state.verification_count;
        drop(state);

        debug!(
            entity = %context.entity_id,
            session = %context.session_id,
            trust = new_trust,
            "session reverified"
        );

        VerificationOutcome::Reverified(ReverifyReport {
            session_id: context.session_id.clone(),
            previous_decision: previous,
            current_decision: decision.decision,
            risk_level: decision.risk_level,
            trust_trend: trend,
            escalated,
            verification_count,
        })
    }

    /// True when the session is unknown or its verification is stale.
    pub fn needs_reverification(&self, entity_id: &str, session_id: &str) -> bool {
        let key = (entity_id.to_string(), session_id.to_string());
        match self.states.get(&key) {
            Some(state) => now_ts() - state.last_verified > self.reverify_interval,
            None => true,
        }
    }

    pub fn get_state(&self, entity_id: &str, session_id: &str) -> Option<VerificationSummary> {
        let key = (entity_id.to_string(), session_id.to_string());
        let state = self.states.get(&key)?;
        Some(VerificationSummary {
            entity_id: state.entity_id.clone(),
            session_id: state.session_id.clone(),
            current_decision: state.current_decision,
            verification_count: state.verification_count,
            escalation_count: state.escalation_count,
            trust_trend: trust_trend(&state.trust_history),
        })
    }
}

/// Mean of the last (up to) three trust points against the earliest of
/// them; movement beyond ±0.1 counts as a trend.
fn trust_trend(history: &[f64]) -> TrustTrend {
    if history.len() < 2 {
        return TrustTrend::Stable;
    }
    let window = &history[history.len().saturating_sub(3)..];
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let delta = mean - window[0];
    if delta < -0.1 {
        TrustTrend::Degrading
    } else if delta > 0.1 {
        TrustTrend::Improving
    } else {
        TrustTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::context::DeviceHealth;

    fn verifier() -> ContinuousVerifier {
        ContinuousVerifier::new(Arc::new(AccessDecisionEngine::default()), 300.0)
    }

    fn session_context(trust: &str) -> AccessContext {
        // Two canned contexts: one trusted, one hostile
        match trust {
            "good" => AccessContext {
                entity_id: "alice".to_string(),
                session_id: "sess-1".to_string(),
                resource: "docs".to_string(),
                authentication_method: "certificate".to_string(),
                mfa_verified: true,
                network_zone: "internal".to_string(),
                ..Default::default()
            },
            _ => AccessContext {
                entity_id: "alice".to_string(),
                session_id: "sess-1".to_string(),
                resource: "docs".to_string(),
                authentication_method: "session_cookie".to_string(),
                network_zone: "external".to_string(),
                behavior_score: 0.95,
                risk_score: 0.9,
                device: DeviceHealth {
                    os_patched: false,
                    antivirus_active: false,
                    disk_encrypted: false,
                    firewall_enabled: false,
                    compliance_score: 0.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_initialize_session() {
        let verifier = verifier();
        let init = verifier.initialize_session(&session_context("good"));
        assert_eq!(init.initial_decision, Decision::Allow);
        assert!(init.next_verification > now_ts());
        assert!(!verifier.needs_reverification("alice", "sess-1"));
    }

    #[test]
    fn test_reverify_unknown_session_initializes() {
        let verifier = verifier();
        match verifier.reverify(&session_context("good")) {
            VerificationOutcome::Initialized(init) => {
                assert_eq!(init.initial_decision, Decision::Allow);
            }
            VerificationOutcome::Reverified(_) => panic!("expected initialization"),
        }
    }

    #[test]
    fn test_escalation_on_stricter_decision() {
        let verifier = verifier();
        verifier.initialize_session(&session_context("good"));

        match verifier.reverify(&session_context("bad")) {
            VerificationOutcome::Reverified(report) => {
                assert!(report.escalated);
                assert_eq!(report.previous_decision, Decision::Allow);
                assert_eq!(report.current_decision, Decision::Deny);
            }
            VerificationOutcome::Initialized(_) => panic!("state should exist"),
        }

        let summary = verifier.get_state("alice", "sess-1").unwrap();
        assert_eq!(summary.escalation_count, 1);
        assert_eq!(summary.current_decision, Decision::Deny);
    }

    #[test]
    fn test_recovery_is_not_escalation() {
        let verifier = verifier();
        verifier.initialize_session(&session_context("bad"));
        match verifier.reverify(&session_context("good")) {
            VerificationOutcome::Reverified(report) => {
                assert!(!report.escalated);
                assert_eq!(report.current_decision, Decision::Allow);
            }
            _ => panic!("state should exist"),
        }
    }

    #[test]
    fn test_trust_trend_bands() {
        assert_eq!(trust_trend(&[]), TrustTrend::Stable);
        assert_eq!(trust_trend(&[0.8]), TrustTrend::Stable);
        assert_eq!(trust_trend(&[0.8, 0.79]), TrustTrend::Stable);
        assert_eq!(trust_trend(&[0.9, 0.6, 0.3]), TrustTrend::Degrading);
        assert_eq!(trust_trend(&[0.2, 0.6, 0.9]), TrustTrend::Improving);
        // Only the last three points matter
        assert_eq!(trust_trend(&[0.1, 0.1, 0.9, 0.6, 0.3]), TrustTrend::Degrading);
    }

    #[test]
    fn test_needs_reverification_for_unknown() {
        let verifier = verifier();
        assert!(verifier.needs_reverification("ghost", "none"));
    }

    #[test]
    fn test_colons_in_identifiers_do_not_collide() {
        let verifier = verifier();
        let mut a = session_context("good");
        a.entity_id = "a:b".to_string();
        a.session_id = "c".to_string();
        let mut b = session_context("bad");
        b.entity_id = "a".to_string();
        b.session_id = "b:c".to_string();

        verifier.initialize_session(&a);
        verifier.initialize_session(&b);
        assert_eq!(
            verifier.get_state("a:b", "c").unwrap().current_decision,
            Decision::Allow
        );
        assert_eq!(
            verifier.get_state("a", "b:c").unwrap().current_decision,
            Decision::Deny
        );
    }
}
