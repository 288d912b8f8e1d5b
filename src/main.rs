// aegis — CLI for the AEGIS zero-trust access evaluation platform.

use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use aegis_core::access::context::DeviceHealth;
use aegis_core::access::{AccessContext, AccessDecisionEngine, ContinuousVerifier};
use aegis_core::api::{self, AppState};
use aegis_core::behavioral::{AnomalyDetector, BehaviorEvent, BehavioralBaseline};
use aegis_core::identity::{Identity, IdentityRegistry};
use aegis_core::lateral::{AccessEdge, LateralMovementDetector};
use aegis_core::microseg::{Flow, FlowAnalyzer, PolicyRecommender, SegmentManager};
use aegis_core::policy::models::{
    context_from_json, ConditionOperator, ConditionValue, Policy, PolicyCondition, PolicyEffect,
    PolicyRule,
};
use aegis_core::policy::PolicyEngine;
use aegis_core::risk::{RiskEngine, RiskSignals};
use aegis_core::AegisConfig;

#[derive(Parser)]
#[command(
    name = "aegis",
    version,
    about = "AEGIS: zero-trust access evaluation platform"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Learn behavioral baselines from synthetic data
    Baseline {
        /// Number of synthetic events to generate
        #[arg(long, default_value_t = 500)]
        events: usize,
        /// Number of entities
        #[arg(long, default_value_t = 20)]
        entities: usize,
    },
    /// Analyze an access event for anomalies
    Analyze {
        /// Entity ID to analyze
        #[arg(long, default_value = "user-001")]
        entity: String,
        /// Hour of access (0-23)
        #[arg(long, default_value_t = 3)]
        hour: i64,
        /// Access location
        #[arg(long, default_value = "unknown-region")]
        location: String,
    },
    /// Detect lateral movement patterns in a synthetic access graph
    Detect {
        /// Number of graph nodes
        #[arg(long, default_value_t = 15)]
        nodes: usize,
        /// Number of access edges
        #[arg(long, default_value_t = 40)]
        edges: usize,
    },
    /// Manage and simulate policies
    Policy {
        /// YAML policy file to load instead of the built-in demo set
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Serve the HTTP API and dashboard endpoints
    Dashboard {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the complete zero trust demo scenario
    Demo,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    match Cli::parse().command {
        Command::Baseline { events, entities } => cmd_baseline(events, entities),
        Command::Analyze {
            entity,
            hour,
            location,
        } => cmd_analyze(&entity, hour, &location),
        Command::Detect { nodes, edges } => cmd_detect(nodes, edges),
        Command::Policy { file } => cmd_policy(file)?,
        Command::Dashboard { host, port, config } => {
            let cfg = AegisConfig::load_or_default(config.as_deref())
                .context("loading configuration")?;
            let host = host.unwrap_or_else(|| cfg.api.host.clone());
            let port = port.unwrap_or(cfg.api.port);
            println!("[*] Serving AEGIS API on {host}:{port}");
            api::serve(AppState::new(&cfg), &host, port)
                .await
                .context("API server failed")?;
        }
        Command::Demo => cmd_demo(),
    }
    Ok(())
}

/// Gaussian sample via the Box-Muller transform.
fn gauss(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(1e-10_f64..1.0_f64);
    let u2: f64 = rng.gen_range(0.0_f64..1.0_f64);
    mean + std * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn synthetic_event(rng: &mut StdRng, resources: &[&str], locations: &[&str]) -> BehaviorEvent {
    BehaviorEvent {
        hour: Some((gauss(rng, 10.0, 3.0).rem_euclid(24.0)) as i64),
        day_of_week: Some(rng.gen_range(0..7)),
        resource: Some(resources[rng.gen_range(0..resources.len())].to_string()),
        action: Some(["read", "write", "execute"][rng.gen_range(0..3)].to_string()),
        session_duration: Some(gauss(rng, 3600.0, 1200.0).max(60.0)),
        location: Some(locations[rng.gen_range(0..locations.len())].to_string()),
        source_ip: Some(format!(
            "10.0.{}.{}",
            rng.gen_range(1..=10),
            rng.gen_range(1..=254)
        )),
        ..Default::default()
    }
}

fn cmd_baseline(events: usize, entities: usize) {
    println!("[*] Generating {events} events for {entities} entities...");

    let baseline = BehavioralBaseline::default();
    let mut rng = StdRng::seed_from_u64(42);
    let entity_ids: Vec<String> = (0..entities).map(|i| format!("user-{i:03}")).collect();
    let resources: Vec<String> = "abcdefghij".chars().map(|c| format!("resource-{c}")).collect();
    let resource_refs: Vec<&str> = resources.iter().map(String::as_str).collect();
    let locations = ["us-east", "us-west", "eu-west", "ap-south"];

    for _ in 0..events {
        let entity = &entity_ids[rng.gen_range(0..entity_ids.len())];
        let event = synthetic_event(&mut rng, &resource_refs, &locations);
        baseline.observe(entity, &event);
    }

    let ids = baseline.all_entity_ids();
    println!("[+] Baselines learned for {} entities", ids.len());
    for id in ids.iter().take(5) {
        if let Some(summary) = baseline.profile_summary(id) {
            println!(
                "    {id}: {} obs, peak_hour={}, locations={}, avg_session={}s",
                summary.observation_count,
                summary.peak_hour,
                summary.unique_locations,
                summary.avg_session_duration
            );
        }
    }
    if ids.len() > 5 {
        println!("    ... and {} more", ids.len() - 5);
    }
}

fn cmd_analyze(entity: &str, hour: i64, location: &str) {
    println!("[*] Building baseline and analyzing event for {entity}...");

    let baseline = Arc::new(BehavioralBaseline::default());
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        baseline.observe(
            entity,
            &BehaviorEvent {
                hour: Some((gauss(&mut rng, 10.0, 2.0).rem_euclid(24.0)) as i64),
                day_of_week: Some(rng.gen_range(0..5)),
                resource: Some(
                    ["resource-a", "resource-b", "resource-c"][rng.gen_range(0..3)].to_string(),
                ),
                location: Some("us-east".to_string()),
                source_ip: Some("10.0.1.50".to_string()),
                session_duration: Some(gauss(&mut rng, 3600.0, 600.0).max(60.0)),
                ..Default::default()
            },
        );
    }

    let detector = AnomalyDetector::new(Arc::clone(&baseline));
    let result = detector.analyze(
        entity,
        &BehaviorEvent {
            hour: Some(hour),
            location: Some(location.to_string()),
            resource: Some("resource-z".to_string()),
            source_ip: Some("203.0.113.99".to_string()),
            session_duration: Some(18_000.0),
            ..Default::default()
        },
    );

    println!("\n--- Anomaly Analysis ---");
    println!("Entity:         {}", result.entity_id);
    println!("Anomaly Score:  {:.4}", result.anomaly_score);
    println!(
        "Is Anomalous:   {}",
        if result.is_anomalous { "YES" } else { "no" }
    );
    println!("\nComponent Scores:");
    for (component, score) in &result.component_scores {
        let bar = "#".repeat((score * 30.0) as usize);
        println!("  {component:12} {score:.4} |{bar}");
    }
    println!("\nDetails:");
    for (component, detail) in &result.details {
        println!("  {component}: {detail}");
    }
}

fn cmd_detect(nodes: usize, edges: usize) {
    println!("[*] Building access graph ({nodes} nodes, {edges} edges)...");

    let mut detector = LateralMovementDetector::default();
    let mut rng = StdRng::seed_from_u64(42);
    let node_ids: Vec<String> = (0..nodes).map(|i| format!("host-{i:02}")).collect();

    // Feature index 0 encodes privilege level
    for (i, node) in node_ids.iter().enumerate() {
        let mut features = ndarray::Array1::from_shape_fn(8, |_| rng.gen::<f64>());
        if i <= 1 {
            features[0] = 0.9;
        } else if i + 3 > nodes {
            features[0] = 0.1;
        }
        detector.graph.add_node(node, "host", Some(features));
    }

    let mut timestamp = 0.0;
    for _ in 0..edges {
        let src = &node_ids[rng.gen_range(0..node_ids.len())];
        let dst = &node_ids[rng.gen_range(0..node_ids.len())];
        if src == dst {
            continue;
        }
        timestamp += 60.0;
        detector.add_access_event(AccessEdge {
            src: src.clone(),
            dst: dst.clone(),
            action: ["ssh", "rdp", "smb", "api"][rng.gen_range(0..4)].to_string(),
            timestamp,
            credential_type: ["password", "key", "token"][rng.gen_range(0..3)].to_string(),
            success: rng.gen::<f64>() > 0.1,
            ..Default::default()
        });
    }

    // Inject a hopping chain from the last node through the first five
    let chain: Vec<&String> = std::iter::once(&node_ids[nodes - 1])
        .chain(node_ids.iter().take(5))
        .collect();
    for pair in chain.windows(2) {
        timestamp += 60.0;
        detector.add_access_event(AccessEdge {
            src: pair[0].clone(),
            dst: pair[1].clone(),
            action: "ssh".to_string(),
            timestamp,
            credential_type: "token".to_string(),
            ..Default::default()
        });
    }

    detector.learn_baseline();
    let alerts = detector.detect();

    println!("\n--- Lateral Movement Detection ---");
    println!("Total alerts: {}", alerts.len());
    for alert in alerts.iter().take(10) {
        let bar = "#".repeat((alert.severity * 20.0) as usize);
        println!(
            "\n  [{}] severity={:.4} |{bar}",
            alert.alert_type.as_str(),
            alert.severity
        );
        let shown: Vec<&str> = alert.path.iter().take(6).map(String::as_str).collect();
        println!("  Path: {}", shown.join(" -> "));
        for (key, value) in &alert.details {
            println!("    {key}: {value}");
        }
    }
}

fn demo_policies() -> Vec<Policy> {
    vec![
        Policy {
            policy_id: "deny-high-risk".to_string(),
            name: "Deny High Risk Access".to_string(),
            description: String::new(),
            enabled: true,
            tags: vec![],
            rules: vec![PolicyRule {
                rule_id: "r1".to_string(),
                description: "Deny when risk score exceeds threshold".to_string(),
                effect: PolicyEffect::Deny,
                conditions: vec![PolicyCondition::new(
                    "risk_score",
                    ConditionOperator::Gt,
                    ConditionValue::Num(0.8),
                )],
                priority: 10,
                enabled: true,
            }],
        },
        Policy {
            policy_id: "require-mfa-external".to_string(),
            name: "Require MFA for External Access".to_string(),
            description: String::new(),
            enabled: true,
            tags: vec![],
            rules: vec![PolicyRule {
                rule_id: "r2".to_string(),
                description: "Challenge external access without MFA".to_string(),
                effect: PolicyEffect::Challenge,
                conditions: vec![
                    PolicyCondition::new(
                        "network_zone",
                        ConditionOperator::Eq,
                        ConditionValue::Str("external".to_string()),
                    ),
                    PolicyCondition::new(
                        "mfa_verified",
                        ConditionOperator::Eq,
                        ConditionValue::Bool(false),
                    ),
                ],
                priority: 20,
                enabled: true,
            }],
        },
        Policy {
            policy_id: "allow-internal-read".to_string(),
            name: "Allow Internal Read Access".to_string(),
            description: String::new(),
            enabled: true,
            tags: vec![],
            rules: vec![PolicyRule {
                rule_id: "r3".to_string(),
                description: "Allow read access from internal network".to_string(),
                effect: PolicyEffect::Allow,
                conditions: vec![
                    PolicyCondition::new(
                        "network_zone",
                        ConditionOperator::Eq,
                        ConditionValue::Str("internal".to_string()),
                    ),
                    PolicyCondition::new(
                        "action",
                        ConditionOperator::Eq,
                        ConditionValue::Str("read".to_string()),
                    ),
                ],
                priority: 50,
                enabled: true,
            }],
        },
    ]
}

fn cmd_policy(file: Option<PathBuf>) -> anyhow::Result<()> {
    let mut engine = PolicyEngine::new();

    match file {
        Some(path) => {
            let yaml = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let loaded = engine.load_yaml(&yaml)?;
            println!("[+] Loaded {} policies from {}", loaded.len(), path.display());
        }
        None => {
            for policy in demo_policies() {
                engine.add_policy(policy);
            }
            println!("[+] Created 3 demo policies");
        }
    }

    let summary = engine.policy_summary();
    println!("\n--- Policy Summary ---");
    println!(
        "Total: {}, Active: {}, Rules: {}",
        summary.total_policies, summary.enabled_policies, summary.total_rules
    );

    let conflicts = engine.detect_conflicts();
    println!("\nConflicts detected: {}", conflicts.len());
    for conflict in &conflicts {
        println!(
            "  {} ({}) vs {} ({}) - winner: {}",
            conflict.rule_1.rule_id,
            conflict.rule_1.effect.as_str(),
            conflict.rule_2.rule_id,
            conflict.rule_2.effect.as_str(),
            conflict.winner
        );
    }

    let test_contexts = [
        serde_json::json!({"risk_score": 0.9, "network_zone": "external", "mfa_verified": false, "action": "write"}),
        serde_json::json!({"risk_score": 0.2, "network_zone": "internal", "mfa_verified": true, "action": "read"}),
        serde_json::json!({"risk_score": 0.5, "network_zone": "external", "mfa_verified": false, "action": "read"}),
    ];
    println!("\n--- Policy Simulation ---");
    for raw in &test_contexts {
        let decision = engine.evaluate(&context_from_json(raw));
        println!("  Context: {raw}");
        println!(
            "  Decision: {} (rule: {})\n",
            decision.decision.as_str(),
            decision.rule_id.as_deref().unwrap_or("N/A")
        );
    }

    println!("--- Exported YAML ---");
    println!("{}", engine.export_yaml()?);
    Ok(())
}

fn cmd_demo() {
    println!("{}", "=".repeat(60));
    println!("  AEGIS  -  Complete Zero Trust Demo Scenario");
    println!("{}", "=".repeat(60));

    let mut rng = StdRng::seed_from_u64(42);

    // 1. Identity setup
    println!("\n[1/6] Setting up identities...");
    let registry = IdentityRegistry::new();
    let mut alice = Identity::new("alice", "Alice Chen", "user");
    alice.email = "alice@corp.io".to_string();
    alice.department = "engineering".to_string();
    alice.roles = vec!["developer".to_string()];
    let mut bob = Identity::new("bob", "Bob Martinez", "user");
    bob.email = "bob@corp.io".to_string();
    bob.department = "finance".to_string();
    let mut charlie = Identity::new("charlie", "Charlie Kim", "user");
    charlie.roles = vec!["admin".to_string(), "soc-analyst".to_string()];
    let svc = Identity::new("svc-api", "API Service", "service");
    for identity in [alice, bob, charlie, svc] {
        registry.register_identity(identity);
    }
    println!("    Registered {} identities", registry.summary().total_identities);

    // 2. Behavioral baselines
    println!("\n[2/6] Learning behavioral baselines...");
    let baseline = Arc::new(BehavioralBaseline::default());
    for user in ["alice", "bob", "charlie"] {
        for _ in 0..150 {
            baseline.observe(
                user,
                &BehaviorEvent {
                    hour: Some((gauss(&mut rng, 10.0, 2.0).rem_euclid(24.0)) as i64),
                    day_of_week: Some(rng.gen_range(0..5)),
                    resource: Some(
                        ["db-prod", "api-internal", "docs"][rng.gen_range(0..3)].to_string(),
                    ),
                    location: Some("us-east".to_string()),
                    source_ip: Some(format!("10.0.1.{}", rng.gen_range(10..50))),
                    session_duration: Some(gauss(&mut rng, 3600.0, 800.0).max(60.0)),
                    ..Default::default()
                },
            );
        }
    }
    println!("    Baselines for {} users", baseline.all_entity_ids().len());

    // 3. Anomaly detection
    println!("\n[3/6] Running anomaly detection...");
    let detector = AnomalyDetector::new(Arc::clone(&baseline));
    let normal = detector.analyze(
        "alice",
        &BehaviorEvent {
            hour: Some(10),
            resource: Some("db-prod".to_string()),
            location: Some("us-east".to_string()),
            source_ip: Some("10.0.1.25".to_string()),
            ..Default::default()
        },
    );
    let suspicious = detector.analyze(
        "alice",
        &BehaviorEvent {
            hour: Some(3),
            resource: Some("hr-payroll".to_string()),
            location: Some("unknown-region".to_string()),
            source_ip: Some("203.0.113.99".to_string()),
            ..Default::default()
        },
    );
    println!(
        "    Normal event:     score={:.4} anomalous={}",
        normal.anomaly_score, normal.is_anomalous
    );
    println!(
        "    Suspicious event: score={:.4} anomalous={}",
        suspicious.anomaly_score, suspicious.is_anomalous
    );

    // 4. Risk scoring + access decision
    println!("\n[4/6] Computing risk and access decisions...");
    let risk_engine = RiskEngine::default();
    risk_engine.threat_intel.add_malicious_ip("203.0.113.99");
    let risk = risk_engine.calculate(&RiskSignals {
        entity_id: "alice".to_string(),
        behavior_score: suspicious.anomaly_score,
        device_health: 0.6,
        network_trust: 0.2,
        source_ip: "203.0.113.99".to_string(),
        auth_strength: 0.4,
    });
    println!(
        "    Risk: {:.4} ({})  factors: {}",
        risk.composite_score,
        risk.risk_level,
        risk.factors.join("; ")
    );

    let access_engine = Arc::new(AccessDecisionEngine::default());
    access_engine.set_resource_sensitivity("hr-payroll", 0.9);
    let context = AccessContext {
        entity_id: "alice".to_string(),
        resource: "hr-payroll".to_string(),
        action: "read".to_string(),
        source_ip: "203.0.113.99".to_string(),
        behavior_score: suspicious.anomaly_score,
        risk_score: risk.composite_score,
        session_id: "sess-demo-1".to_string(),
        device: DeviceHealth {
            os_patched: false,
            compliance_score: 0.6,
            ..Default::default()
        },
        ..Default::default()
    };
    let decision = access_engine.evaluate(&context);
    println!(
        "    Decision: {} (confidence {:.2})",
        decision.decision, decision.confidence
    );
    for reason in &decision.reasons {
        println!("      - {reason}");
    }

    // 5. Continuous verification
    println!("\n[5/6] Continuous verification...");
    let verifier = ContinuousVerifier::new(Arc::clone(&access_engine), 300.0);
    let init = verifier.initialize_session(&context);
    println!(
        "    Session initialized: {} (risk {:.4})",
        init.initial_decision, init.risk_level
    );
    let mut improved = context.clone();
    improved.behavior_score = 0.1;
    improved.risk_score = 0.2;
    improved.mfa_verified = true;
    improved.authentication_method = "totp".to_string();
    match verifier.reverify(&improved) {
        aegis_core::access::VerificationOutcome::Reverified(report) => {
            println!(
                "    Reverified: {} -> {} (trend {:?}, escalated {})",
                report.previous_decision,
                report.current_decision,
                report.trust_trend,
                report.escalated
            );
        }
        aegis_core::access::VerificationOutcome::Initialized(_) => {}
    }

    // 6. Lateral movement + microsegmentation
    println!("\n[6/6] Lateral movement and microsegmentation...");
    let mut lateral = LateralMovementDetector::default();
    for i in 0..6 {
        lateral.add_access_event(AccessEdge {
            src: "attacker".to_string(),
            dst: format!("server-{i}"),
            timestamp: i as f64 * 60.0,
            credential_type: "token".to_string(),
            ..Default::default()
        });
    }
    let alerts = lateral.detect();
    println!("    Lateral alerts: {}", alerts.len());
    if let Some(top) = alerts.first() {
        println!(
            "      [{}] severity={:.4} path={}",
            top.alert_type.as_str(),
            top.severity,
            top.path.join(" -> ")
        );
    }

    let mut flows = FlowAnalyzer::new();
    let mut segments = SegmentManager::new();
    segments.create_segment("frontend", "Frontend", "", 0.6);
    segments.create_segment("data", "Data tier", "", 0.9);
    segments.add_member("frontend", "web-1");
    segments.add_member("data", "db-1");
    for _ in 0..12 {
        flows.add_flow(Flow {
            src: "web-1".to_string(),
            dst: "db-1".to_string(),
            port: 5432,
            ..Default::default()
        });
    }
    let recommendations = PolicyRecommender::default().recommend(&flows, &segments);
    println!("    Segment policy recommendations: {}", recommendations.len());
    for rec in &recommendations {
        println!(
            "      {} -> {} ports {:?} (confidence {:.2})",
            rec.src_segment, rec.dst_segment, rec.allowed_ports, rec.confidence
        );
    }

    println!("\n[+] Demo complete.");
}
