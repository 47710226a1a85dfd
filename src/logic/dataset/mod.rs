//! Dataset Module - Shadow samples and attack data
//!
//! Sample sets go in, membership-labelled probability vectors come out.
//! Deduplication and its conflict log live here as well.

pub mod dedup;
pub mod loader;
pub mod record;
pub mod writer;

#[cfg(test)]
mod tests;

pub use dedup::{deduplicate, DedupConflict, DedupOutcome, KeyPrecision, ProbabilityKey};
pub use loader::{check_disjoint, Normalization, OverlapCheck, ShadowDataset};
pub use record::{AttackData, Membership, OutputRecord};
pub use writer::ConflictLogWriter;
