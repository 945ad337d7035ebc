//! `hybrid_sim` — Seeded demo scenarios that produce hybrid factor graphs
//! together with the ground truth they were sampled from.

pub mod scenarios;

pub use scenarios::{Scenario, ScenarioKind, ScenarioTruth};
