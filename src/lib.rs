//! Personalized weekly study plans.
//!
//! Combines a next-topic classifier ([`scorer`]), population statistics
//! ([`cohort`]) and the learner's own progress into one [`models::StudyPlan`]
//! ([`plan`]). [`db`] is the Postgres-backed storage the CLI wires in.

pub mod cohort;
pub mod db;
pub mod error;
pub mod fields;
pub mod models;
pub mod plan;
pub mod report;
pub mod scorer;
