//! Shadow Attack Data - Membership inference attack dataset builder
//!
//! Evaluates shadow models on their known train/test splits, records softmax
//! outputs with membership labels, and assembles a stratified dataset for
//! training an attacker model.

pub mod constants;
pub mod logic;

pub use logic::config::PipelineConfig;
pub use logic::error::{ArtifactKind, PipelineError, PipelineResult};
pub use logic::pipeline::{run, ModelOutcome, ModelSummary, RunReport, SkippedModel};
