// src/identity/mod.rs
// Identity and device registry: a keyed store with alias correlation and
// session bookkeeping. External systems own the source of truth; this is
// the process-local integration point the engines consult.

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::now_ts;

/// A user or service identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub identity_id: String,
    pub name: String,
    /// user, service, system.
    pub identity_type: String,
    pub email: String,
    pub department: String,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    pub created_at: f64,
    pub last_active: f64,
    pub enabled: bool,
    pub risk_level: String,
}

impl Default for Identity {
    fn default() -> Self {
        let now = now_ts();
        Self {
            identity_id: String::new(),
            name: String::new(),
            identity_type: "user".to_string(),
            email: String::new(),
            department: String::new(),
            roles: Vec::new(),
            groups: Vec::new(),
            created_at: now,
            last_active: now,
            enabled: true,
            risk_level: "low".to_string(),
        }
    }
}

impl Identity {
    pub fn new(identity_id: &str, name: &str, identity_type: &str) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            name: name.to_string(),
            identity_type: identity_type.to_string(),
            ..Default::default()
        }
    }
}

/// A managed device.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    /// workstation, server, mobile, iot.
    pub device_type: String,
    pub os: String,
    pub os_version: String,
    pub owner_id: String,
    pub managed: bool,
    pub compliant: bool,
    pub encrypted: bool,
    pub last_seen: f64,
    pub trust_score: f64,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            name: String::new(),
            device_type: "workstation".to_string(),
            os: String::new(),
            os_version: String::new(),
            owner_id: String::new(),
            managed: true,
            compliant: true,
            encrypted: true,
            last_seen: now_ts(),
            trust_score: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub identity_id: String,
    pub device_id: String,
    pub source_ip: String,
    pub started: f64,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct RegistrySummary {
    pub total_identities: usize,
    pub enabled_identities: usize,
    pub total_devices: usize,
    pub compliant_devices: usize,
    pub active_sessions: usize,
    pub identity_types: BTreeMap<String, usize>,
}

/// Central identity and device registry.
#[derive(Default)]
pub struct IdentityRegistry {
    identities: DashMap<String, Identity>,
    devices: DashMap<String, Device>,
    correlations: DashMap<String, BTreeSet<String>>,
    sessions: DashMap<String, SessionRecord>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Identity management ---

    pub fn register_identity(&self, identity: Identity) {
        self.identities
            .insert(identity.identity_id.clone(), identity);
    }

    pub fn get_identity(&self, identity_id: &str) -> Option<Identity> {
        self.identities.get(identity_id).map(|i| i.clone())
    }

    pub fn find_by_email(&self, email: &str) -> Option<Identity> {
        self.identities
            .iter()
            .find(|entry| entry.email == email)
            .map(|entry| entry.clone())
    }

    pub fn find_by_role(&self, role: &str) -> Vec<Identity> {
        let mut found: Vec<Identity> = self
            .identities
            .iter()
            .filter(|entry| entry.roles.iter().any(|r| r == role))
            .map(|entry| entry.clone())
            .collect();
        found.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        found
    }

    pub fn find_by_group(&self, group: &str) -> Vec<Identity> {
        let mut found: Vec<Identity> = self
            .identities
            .iter()
            .filter(|entry| entry.groups.iter().any(|g| g == group))
            .map(|entry| entry.clone())
            .collect();
        found.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        found
    }

    pub fn disable_identity(&self, identity_id: &str) -> bool {
        match self.identities.get_mut(identity_id) {
            Some(mut identity) => {
                identity.enabled = false;
                true
            }
            None => false,
        }
    }

    // --- Device management ---

    pub fn register_device(&self, device: Device) {
        self.devices.insert(device.device_id.clone(), device);
    }

    pub fn get_device(&self, device_id: &str) -> Option<Device> {
        self.devices.get(device_id).map(|d| d.clone())
    }

    pub fn get_user_devices(&self, owner_id: &str) -> Vec<Device> {
        let mut found: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| entry.owner_id == owner_id)
            .map(|entry| entry.clone())
            .collect();
        found.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        found
    }

    pub fn non_compliant_devices(&self) -> Vec<Device> {
        let mut found: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| !entry.compliant)
            .map(|entry| entry.clone())
            .collect();
        found.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        found
    }

    // --- Identity correlation ---

    /// Link an alias (email, username, legacy id) to an identity.
    pub fn add_correlation(&self, alias: &str, identity_id: &str) {
        self.correlations
            .entry(alias.to_string())
            .or_default()
            .insert(identity_id.to_string());
    }

    pub fn resolve_alias(&self, alias: &str) -> Vec<String> {
        self.correlations
            .get(alias)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    // --- Session tracking ---

    pub fn track_session(
        &self,
        session_id: &str,
        identity_id: &str,
        device_id: &str,
        source_ip: &str,
    ) {
        self.sessions.insert(
            session_id.to_string(),
            SessionRecord {
                session_id: session_id.to_string(),
                identity_id: identity_id.to_string(),
                device_id: device_id.to_string(),
                source_ip: source_ip.to_string(),
                started: now_ts(),
                active: true,
            },
        );
        if let Some(mut identity) = self.identities.get_mut(identity_id) {
            identity.last_active = now_ts();
        }
    }

    pub fn end_session(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.active = false;
        }
    }

    /// Active sessions, optionally filtered by identity, sorted by id.
    pub fn active_sessions(&self, identity_id: Option<&str>) -> Vec<SessionRecord> {
        let mut found: Vec<SessionRecord> = self
            .sessions
            .iter()
            .filter(|entry| entry.active)
            .filter(|entry| identity_id.map_or(true, |id| entry.identity_id == id))
            .map(|entry| entry.clone())
            .collect();
        found.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        found
    }

    // --- Summary ---

    pub fn summary(&self) -> RegistrySummary {
        let mut identity_types: BTreeMap<String, usize> = BTreeMap::from([
            ("user".to_string(), 0),
            ("service".to_string(), 0),
            ("system".to_string(), 0),
        ]);
        let mut enabled = 0;
        for entry in self.identities.iter() {
            if entry.enabled {
                enabled += 1;
            }
            *identity_types.entry(entry.identity_type.clone()).or_insert(0) += 1;
        }

        RegistrySummary {
            total_identities: self.identities.len(),
            enabled_identities: enabled,
            total_devices: self.devices.len(),
            compliant_devices: self.devices.iter().filter(|d| d.compliant).count(),
            active_sessions: self.sessions.iter().filter(|s| s.active).count(),
            identity_types,
        }
    }
}
