// src/microseg/mod.rs
// Microsegmentation: flow observation, segment definitions and
// least-privilege policy recommendations derived from real traffic.

pub mod flows;
pub mod recommender;
pub mod segments;

pub use flows::{Flow, FlowAnalyzer};
pub use recommender::{PolicyRecommendation, PolicyRecommender};
pub use segments::{Segment, SegmentManager};
