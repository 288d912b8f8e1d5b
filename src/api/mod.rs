// src/api/mod.rs
// JSON-over-HTTP facade. The composition root (`AppState::new`) constructs
// every stateful service exactly once and hands out shared references; no
// service is a global singleton.

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::access::context::DeviceHealth;
use crate::access::{AccessContext, AccessDecisionEngine};
use crate::behavioral::{AnomalyDetector, BehaviorEvent, BehavioralBaseline};
use crate::config::AegisConfig;
use crate::error::AegisError;
use crate::identity::IdentityRegistry;
use crate::lateral::LateralMovementDetector;
use crate::metrics::MetricsCollector;
use crate::policy::models::context_from_json;
use crate::policy::PolicyEngine;
use crate::risk::{RiskEngine, RiskSignals};
use crate::now_ts;

/// Shared application state: one instance of every engine.
pub struct AppState {
    pub baseline: Arc<BehavioralBaseline>,
    pub anomaly: AnomalyDetector,
    pub access: Arc<AccessDecisionEngine>,
    pub risk: Arc<RiskEngine>,
    pub policy: Arc<RwLock<PolicyEngine>>,
    pub identity: Arc<IdentityRegistry>,
    pub lateral: Arc<RwLock<LateralMovementDetector>>,
    pub metrics: MetricsCollector,
}

impl AppState {
    /// Composition root: build every engine from one configuration.
    pub fn new(config: &AegisConfig) -> Self {
        let baseline = Arc::new(BehavioralBaseline::with_config(&config.behavioral));
        let anomaly = AnomalyDetector::with_config(Arc::clone(&baseline), &config.behavioral);
        Self {
            baseline,
            anomaly,
            access: Arc::new(AccessDecisionEngine::with_config(config.access.clone())),
            risk: Arc::new(RiskEngine::with_config(config.risk.clone())),
            policy: Arc::new(RwLock::new(PolicyEngine::new())),
            identity: Arc::new(IdentityRegistry::new()),
            lateral: Arc::new(RwLock::new(LateralMovementDetector::with_config(
                &config.lateral,
            ))),
            metrics: MetricsCollector::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DecideRequest {
    entity_id: String,
    resource: String,
    action: String,
    source_ip: String,
    location: String,
    network_zone: String,
    mfa_verified: bool,
    auth_method: String,
    behavior_score: f64,
    risk_score: f64,
    device_compliance: f64,
}

impl Default for DecideRequest {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            resource: String::new(),
            action: "read".to_string(),
            source_ip: String::new(),
            location: String::new(),
            network_zone: "external".to_string(),
            mfa_verified: false,
            auth_method: "password".to_string(),
            behavior_score: 0.0,
            risk_score: 0.0,
            device_compliance: 1.0,
        }
    }
}

/// Health check endpoint
async fn health(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": now_ts(),
        "service": "aegis-core",
        "metrics": data.metrics.snapshot(),
    }))
}

/// Evaluate an access request
async fn access_decide(
    body: web::Json<DecideRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    let req = body.into_inner();
    let context = AccessContext {
        entity_id: req.entity_id,
        resource: req.resource,
        action: req.action,
        source_ip: req.source_ip,
        location: req.location,
        network_zone: req.network_zone,
        mfa_verified: req.mfa_verified,
        authentication_method: req.auth_method,
        behavior_score: req.behavior_score,
        risk_score: req.risk_score,
        device: DeviceHealth {
            compliance_score: req.device_compliance,
            ..Default::default()
        },
        ..Default::default()
    };
    let decision = data.access.evaluate(&context);
    data.metrics.record_decision();

    HttpResponse::Ok().json(json!({
        "decision": decision.decision,
        "risk_level": decision.risk_level,
        "confidence": decision.confidence,
        "reasons": decision.reasons,
        "required_actions": decision.required_actions,
    }))
}

/// List recent decisions
async fn access_decisions(
    query: web::Query<HashMap<String, String>>,
    data: web::Data<AppState>,
) -> impl Responder {
    let n = query
        .get("n")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(50);
    HttpResponse::Ok().json(json!({ "decisions": data.access.recent_decisions(n) }))
}

/// Decision counts per kind
async fn access_stats(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.access.decision_stats())
}

/// Compute a risk score from submitted signals
async fn risk_score(
    body: web::Json<RiskSignals>,
    data: web::Data<AppState>,
) -> impl Responder {
    let score = data.risk.calculate(&body.into_inner());
    data.metrics.record_risk_score();
    HttpResponse::Ok().json(score)
}

/// Population risk summary
async fn risk_summary(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.risk.population_risk_summary())
}

/// Evaluate a context map against the policy store
async fn policy_evaluate(
    body: web::Json<serde_json::Value>,
    data: web::Data<AppState>,
) -> impl Responder {
    let context = context_from_json(&body.into_inner());
    let decision = data.policy.read().evaluate(&context);
    HttpResponse::Ok().json(decision)
}

/// Policy store summary
async fn policy_list(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.policy.read().policy_summary())
}

/// Conflicting rule pairs
async fn policy_conflicts(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({ "conflicts": data.policy.read().detect_conflicts() }))
}

/// Feed one behavioral observation into the baseline store
async fn behavioral_observe(
    body: web::Json<serde_json::Value>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AegisError> {
    let payload = body.into_inner();
    let entity_id = payload
        .get("entity_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AegisError::InvalidInput("entity_id required".to_string()))?;

    let event = BehaviorEvent::from_json(&payload);
    data.baseline.observe(entity_id, &event);
    data.metrics.record_observation();

    Ok(HttpResponse::Ok().json(json!({
        "status": "observed",
        "entity_id": entity_id,
    })))
}

/// Score one event against the entity's baseline
async fn behavioral_analyze(
    body: web::Json<serde_json::Value>,
    data: web::Data<AppState>,
) -> impl Responder {
    let payload = body.into_inner();
    let entity_id = payload
        .get("entity_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let event = BehaviorEvent::from_json(&payload);
    let result = data.anomaly.analyze(entity_id, &event);
    data.metrics.record_anomaly_scored();
    HttpResponse::Ok().json(result)
}

/// Profile summary for one entity
async fn behavioral_profile(
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, AegisError> {
    let entity_id = path.into_inner();
    let summary = data
        .baseline
        .profile_summary(&entity_id)
        .ok_or_else(|| AegisError::NotFound(format!("profile {entity_id}")))?;
    Ok(HttpResponse::Ok().json(summary))
}

/// Identity registry summary
async fn identity_summary(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.identity.summary())
}

/// Run lateral movement detection
async fn lateral_detect(data: web::Data<AppState>) -> impl Responder {
    let alerts = data.lateral.read().detect();
    data.metrics.record_lateral_scan();
    HttpResponse::Ok().json(json!({
        "alert_count": alerts.len(),
        "alerts": alerts,
    }))
}

/// Mount every route on a service config; shared between the real server
/// and handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/api/v1/access/decide", web::post().to(access_decide))
        .route("/api/v1/access/decisions", web::get().to(access_decisions))
        .route("/api/v1/access/stats", web::get().to(access_stats))
        .route("/api/v1/risk/score", web::post().to(risk_score))
        .route("/api/v1/risk/summary", web::get().to(risk_summary))
        .route("/api/v1/policy/evaluate", web::post().to(policy_evaluate))
        .route("/api/v1/policy/list", web::get().to(policy_list))
        .route("/api/v1/policy/conflicts", web::get().to(policy_conflicts))
        .route(
            "/api/v1/behavioral/observe",
            web::post().to(behavioral_observe),
        )
        .route(
            "/api/v1/behavioral/analyze",
            web::post().to(behavioral_analyze),
        )
        .route(
            "/api/v1/behavioral/profile/{entity_id}",
            web::get().to(behavioral_profile),
        )
        .route("/api/v1/identity/summary", web::get().to(identity_summary))
        .route("/api/v1/lateral/detect", web::get().to(lateral_detect));
}

/// Serve the facade until the process is stopped.
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    info!(host, port, "starting aegis API server");
    let data = web::Data::new(state);
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind((host, port))?
        .run()
        .await
}
