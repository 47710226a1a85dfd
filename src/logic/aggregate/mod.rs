//! Aggregate Module - Attacker dataset assembly
//!
//! Combines the per-model attack archives and performs the single
//! stratified train/test split.

pub mod combine;
pub mod split;


pub use combine::{
    build_features, combine_attack_data, combine_parts, discover_attack_archives, flag_stale_archives,
    member_ratio,
    CombinedDataset, CombinedSummary,
};
pub use split::{stratified_split, SplitIndices};
