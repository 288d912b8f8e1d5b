// src/behavioral/session.rs
// Active session tracking with per-session risk flags: concurrent session
// pressure, mid-session IP changes, long-idle resumes.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{AegisError, Result};
use crate::now_ts;

#[derive(Clone, Debug, Serialize)]
pub struct TrackedSession {
    pub session_id: String,
    pub entity_id: String,
    pub start_time: f64,
    pub last_activity: f64,
    pub source_ip: String,
    pub location: String,
    pub user_agent: String,
    pub actions: Vec<String>,
    pub risk_flags: Vec<String>,
    pub is_active: bool,
}

impl TrackedSession {
    pub fn duration(&self) -> f64 {
        let end = if self.last_activity > 0.0 {
            self.last_activity
        } else {
            now_ts()
        };
        end - self.start_time
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionStart {
    pub session_id: String,
    pub entity_id: String,
    pub concurrent_count: usize,
    pub risks: Vec<String>,
    pub risk_score: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionActivity {
    pub session_id: String,
    pub idle_seconds: f64,
    pub action_count: usize,
    pub risks: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionEnd {
    pub session_id: String,
    pub duration: f64,
    pub action_count: usize,
    pub risk_flags: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActiveSessionInfo {
    pub session_id: String,
    pub duration: f64,
    pub source_ip: String,
    pub location: String,
    pub action_count: usize,
    pub risk_flags: Vec<String>,
}

#[derive(Default)]
struct SessionStore {
    sessions: HashMap<String, TrackedSession>,
    entity_sessions: HashMap<String, Vec<String>>,
}

/// Analyzes user sessions for suspicious patterns.
pub struct SessionAnalyzer {
    max_concurrent: usize,
    idle_timeout: f64,
    store: RwLock<SessionStore>,
}

impl Default for SessionAnalyzer {
    fn default() -> Self {
        Self::new(3, 3600.0)
    }
}

impl SessionAnalyzer {
    pub fn new(max_concurrent: usize, idle_timeout: f64) -> Self {
        Self {
            max_concurrent,
            idle_timeout,
            store: RwLock::new(SessionStore::default()),
        }
    }

    /// Begin tracking a session and assess its starting risk.
    pub fn start_session(
        &self,
        session_id: &str,
        entity_id: &str,
        source_ip: &str,
        location: &str,
        user_agent: &str,
    ) -> SessionStart {
        let now = now_ts();
        let mut store = self.store.write();

        let active: Vec<String> = store
            .entity_sessions
            .get(entity_id)
            .map(|sids| {
                sids.iter()
                    .filter(|sid| {
                        store
                            .sessions
                            .get(*sid)
                            .map(|s| s.is_active)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut risks = Vec::new();
        let mut flags = Vec::new();

        if active.len() >= self.max_concurrent {
            risks.push("excessive_concurrent_sessions".to_string());
            flags.push("concurrent_limit_exceeded".to_string());
        }

        let active_ips: Vec<&str> = active
            .iter()
            .filter_map(|sid| store.sessions.get(sid))
            .map(|s| s.source_ip.as_str())
            .collect();
        if !source_ip.is_empty()
            && !active_ips.is_empty()
            && !active_ips.contains(&source_ip)
        {
            risks.push("multiple_source_ips".to_string());
            flags.push("ip_mismatch".to_string());
        }

        let session = TrackedSession {
            session_id: session_id.to_string(),
            entity_id: entity_id.to_string(),
            start_time: now,
            last_activity: now,
            source_ip: source_ip.to_string(),
            location: location.to_string(),
            user_agent: user_agent.to_string(),
            actions: Vec::new(),
            risk_flags: flags,
            is_active: true,
        };
        store.sessions.insert(session_id.to_string(), session);
        store
            .entity_sessions
            .entry(entity_id.to_string())
            .or_default()
            .push(session_id.to_string());

        SessionStart {
            session_id: session_id.to_string(),
            entity_id: entity_id.to_string(),
            concurrent_count: active.len() + 1,
            risk_score: (risks.len() as f64 * 0.4).min(1.0),
            risks,
        }
    }

    /// Record activity on a session.
    pub fn update_session(
        &self,
        session_id: &str,
        action: &str,
        source_ip: &str,
    ) -> Result<SessionActivity> {
        let now = now_ts();
        let mut store = self.store.write();
        let session = store
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AegisError::NotFound(format!("session {session_id}")))?;

        let mut risks = Vec::new();
        let idle = now - session.last_activity;
        if idle > self.idle_timeout {
            risks.push("resumed_after_long_idle".to_string());
            session.risk_flags.push("long_idle_resume".to_string());
        }
        if !source_ip.is_empty()
            && !session.source_ip.is_empty()
            && source_ip != session.source_ip
        {
            risks.push("ip_changed_mid_session".to_string());
            session.risk_flags.push("ip_change".to_string());
        }

        session.last_activity = now;
        if !action.is_empty() {
            session.actions.push(action.to_string());
        }
        if !source_ip.is_empty() {
            session.source_ip = source_ip.to_string();
        }

        Ok(SessionActivity {
            session_id: session_id.to_string(),
            idle_seconds: (idle * 10.0).round() / 10.0,
            action_count: session.actions.len(),
            risks,
        })
    }

    pub fn end_session(&self, session_id: &str) -> Result<SessionEnd> {
        let mut store = self.store.write();
        let session = store
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AegisError::NotFound(format!("session {session_id}")))?;

        session.is_active = false;
        session.last_activity = now_ts();

        Ok(SessionEnd {
            session_id: session_id.to_string(),
            duration: (session.duration() * 10.0).round() / 10.0,
            action_count: session.actions.len(),
            risk_flags: session.risk_flags.clone(),
        })
    }

    pub fn get_active_sessions(&self, entity_id: &str) -> Vec<ActiveSessionInfo> {
        let store = self.store.read();
        let Some(sids) = store.entity_sessions.get(entity_id) else {
            return Vec::new();
        };
        sids.iter()
            .filter_map(|sid| store.sessions.get(sid))
            .filter(|s| s.is_active)
            .map(|s| ActiveSessionInfo {
                session_id: s.session_id.clone(),
                duration: (s.duration() * 10.0).round() / 10.0,
                source_ip: s.source_ip.clone(),
                location: s.location.clone(),
                action_count: s.actions.len(),
                risk_flags: s.risk_flags.clone(),
            })
            .collect()
    }

    /// Drop sessions idle longer than `max_age` seconds. Returns how many
    /// were removed.
    pub fn cleanup_expired(&self, max_age: f64) -> usize {
        let now = now_ts();
        let mut store = self.store.write();
        let expired: Vec<String> = store
            .sessions
            .iter()
            .filter(|(_, s)| now - s.last_activity > max_age)
            .map(|(sid, _)| sid.clone())
            .collect();
        for sid in &expired {
            store.sessions.remove(sid);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_session_is_clean() {
        let analyzer = SessionAnalyzer::default();
        let start = analyzer.start_session("s1", "alice", "10.0.0.1", "us-east", "cli");
        assert_eq!(start.concurrent_count, 1);
        assert!(start.risks.is_empty());
        assert_eq!(start.risk_score, 0.0);
    }

    #[test]
    fn test_concurrent_limit_flagged() {
        let analyzer = SessionAnalyzer::new(2, 3600.0);
        analyzer.start_session("s1", "bob", "10.0.0.1", "", "");
        analyzer.start_session("s2", "bob", "10.0.0.1", "", "");
        let third = analyzer.start_session("s3", "bob", "10.0.0.1", "", "");
        assert!(third
            .risks
            .contains(&"excessive_concurrent_sessions".to_string()));
        assert_eq!(third.concurrent_count, 3);
    }

    #[test]
    fn test_new_ip_across_sessions_flagged() {
        let analyzer = SessionAnalyzer::default();
        analyzer.start_session("s1", "carol", "10.0.0.1", "", "");
        let second = analyzer.start_session("s2", "carol", "198.51.100.9", "", "");
        assert!(second.risks.contains(&"multiple_source_ips".to_string()));
        assert!((second.risk_score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_ip_change_mid_session() {
        let analyzer = SessionAnalyzer::default();
        analyzer.start_session("s1", "dave", "10.0.0.1", "", "");
        let update = analyzer
            .update_session("s1", "read", "203.0.113.50")
            .unwrap();
        assert!(update.risks.contains(&"ip_changed_mid_session".to_string()));
        assert_eq!(update.action_count, 1);
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let analyzer = SessionAnalyzer::default();
        assert!(matches!(
            analyzer.update_session("ghost", "read", ""),
            Err(AegisError::NotFound(_))
        ));
        assert!(analyzer.end_session("ghost").is_err());
    }

    #[test]
    fn test_end_session_reports_flags() {
        let analyzer = SessionAnalyzer::default();
        analyzer.start_session("s1", "erin", "10.0.0.1", "", "");
        analyzer.update_session("s1", "read", "203.0.113.1").unwrap();
        let end = analyzer.end_session("s1").unwrap();
        assert!(end.risk_flags.contains(&"ip_change".to_string()));
        assert_eq!(end.action_count, 1);
        assert!(analyzer.get_active_sessions("erin").is_empty());
    }

    #[test]
    fn test_active_sessions_listing() {
        let analyzer = SessionAnalyzer::default();
        analyzer.start_session("s1", "frank", "10.0.0.1", "hq", "");
        analyzer.start_session("s2", "frank", "10.0.0.1", "hq", "");
        analyzer.end_session("s1").unwrap();
        let active = analyzer.get_active_sessions("frank");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "s2");
    }

    #[test]
    fn test_cleanup_expired_removes_stale() {
        let analyzer = SessionAnalyzer::default();
        analyzer.start_session("s1", "gina", "", "", "");
        // Nothing is older than a day yet
        assert_eq!(analyzer.cleanup_expired(86_400.0), 0);
        // Everything is older than "zero seconds ago"
        assert_eq!(analyzer.cleanup_expired(-1.0), 1);
        assert!(analyzer.get_active_sessions("gina").is_empty());
    }
}
