// src/behavioral/mod.rs
// Behavioral analytics: streaming baselines, anomaly scoring, population
// pattern queries and session tracking.

pub mod anomaly;
pub mod baseline;
pub mod patterns;
pub mod session;

pub use anomaly::{AnomalyDetector, AnomalyResult};
pub use baseline::{BaselineProfile, BehaviorEvent, BehavioralBaseline, RunningStats};
pub use patterns::PatternAnalyzer;
pub use session::SessionAnalyzer;
