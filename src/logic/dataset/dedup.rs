//! Deduplication - Collapse identical probability vectors
//!
//! Identical outputs for a member and a non-member mean the model cannot tell
//! them apart; keeping both would feed contradictory labels to the attacker.
//! First-seen record wins, later duplicates are dropped, and later records that
//! disagree on membership are reported as conflicts.

use std::collections::HashMap;
use std::str::FromStr;

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use super::record::AttackData;
use crate::logic::error::PipelineError;

/// Largest decimal precision that still maps onto distinct f64 values
const MAX_DECIMALS: u32 = 15;

// ============================================================================
// KEY
// ============================================================================

/// How probability vectors are canonicalized before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPrecision {
    /// Bit-exact match (with -0.0 folded into 0.0)
    #[default]
    Exact,
    /// Each entry rounded to this many decimal places
    Decimals(u32),
}

impl std::fmt::Display for KeyPrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPrecision::Exact => f.write_str("exact"),
            KeyPrecision::Decimals(d) => write!(f, "{} decimals", d),
        }
    }
}

impl FromStr for KeyPrecision {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("exact") {
            return Ok(KeyPrecision::Exact);
        }
        match s.parse::<u32>() {
            Ok(d) if d <= MAX_DECIMALS => Ok(KeyPrecision::Decimals(d)),
            _ => Err(PipelineError::Config(format!(
                "dedup precision must be 'exact' or 0..={}, got '{}'",
                MAX_DECIMALS, s
            ))),
        }
    }
}

/// Canonical, hashable form of a probability vector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbabilityKey(Vec<i64>);

impl ProbabilityKey {
    pub fn new(probabilities: ArrayView1<'_, f32>, precision: KeyPrecision) -> Self {
        let parts = match precision {
            KeyPrecision::Exact => probabilities
                .iter()
                .map(|&p| if p == 0.0 { 0 } else { p.to_bits() as i64 })
                .collect(),
            KeyPrecision::Decimals(d) => {
                let scale = 10f64.powi(d as i32);
                probabilities
                    .iter()
                    .map(|&p| (p as f64 * scale).round() as i64)
                    .collect()
            }
        };
        Self(parts)
    }
}

// ============================================================================
// DEDUP
// ============================================================================

/// A record dropped because its vector was already claimed by the other label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConflict {
    pub shadow_id: u32,
    /// Row of the dropped record in the input
    pub row: usize,
    pub kept_member: i64,
    pub dropped_member: i64,
    pub label: i64,
    pub probabilities: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub data: AttackData,
    pub conflicts: Vec<DedupConflict>,
    /// Same vector, same membership: dropped silently
    pub duplicates: usize,
}

impl DedupOutcome {
    pub fn dropped(&self) -> usize {
        self.conflicts.len() + self.duplicates
    }
}

pub fn deduplicate(data: &AttackData, shadow_id: u32, precision: KeyPrecision) -> DedupOutcome {
    let mut seen: HashMap<ProbabilityKey, i64> = HashMap::with_capacity(data.len());
    let mut kept = Vec::with_capacity(data.len());
    let mut conflicts = Vec::new();
    let mut duplicates = 0;

    for row in 0..data.len() {
        let probs = data.probability_row(row);
        let member = data.members[row];
        let key = ProbabilityKey::new(probs, precision);

        match seen.get(&key) {
            None => {
                seen.insert(key, member);
                kept.push(row);
            }
            Some(&first) if first == member => duplicates += 1,
            Some(&first) => {
                log::warn!(
                    "Conflict found in probabilities {:?} (Membership: {} vs {}). Skipping.",
                    probs.as_slice().unwrap_or(&[]),
                    first,
                    member
                );
                conflicts.push(DedupConflict {
                    shadow_id,
                    row,
                    kept_member: first,
                    dropped_member: member,
                    label: data.labels[row],
                    probabilities: probs.to_vec(),
                });
            }
        }
    }

    if !conflicts.is_empty() || duplicates > 0 {
        log::info!(
            "Shadow Model {}: dropped {} duplicates and {} conflicts ({} kept)",
            shadow_id,
            duplicates,
            conflicts.len(),
            kept.len()
        );
    }

    DedupOutcome {
        data: data.select(&kept),
        conflicts,
        duplicates,
    }
}
