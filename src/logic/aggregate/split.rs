//! Stratified Split - Train/test partition preserving class ratios
//!
//! Sizes follow the usual convention: `n_test = ceil(fraction * n)`, the
//! rest goes to train. Per-class test counts are apportioned by largest
//! remainder so the member/non-member ratio is kept in both halves.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::logic::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Row positions grouped by stratum, strata in ascending order
fn group_by_stratum(strata: &[i64]) -> BTreeMap<i64, Vec<usize>> {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, &s) in strata.iter().enumerate() {
        groups.entry(s).or_default().push(row);
    }
    groups
}

/// Test rows per stratum: floor share plus one for the largest remainders
/// (ties go to the smaller stratum value), then adjusted so no stratum ends
/// up entirely in train or entirely in test
fn apportion(counts: &[usize], n: usize, n_test: usize) -> Vec<usize> {
    let mut alloc: Vec<usize> = counts.iter().map(|&c| n_test * c / n).collect();
    let assigned: usize = alloc.iter().sum();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = n_test * counts[a] % n;
        let rb = n_test * counts[b] % n;
        rb.cmp(&ra).then(a.cmp(&b))
    });

    for &i in order.iter().take(n_test - assigned) {
        alloc[i] += 1;
    }
    keep_both_sides(&mut alloc, counts);
    alloc
}

/// Move test rows between strata until every stratum has at least one row on
/// each side. Needs every count >= 2 and the split sizes each >= the number
/// of strata; the total stays the same.
fn keep_both_sides(alloc: &mut [usize], counts: &[usize]) {
    let target: usize = alloc.iter().sum();
    for (take, &count) in alloc.iter_mut().zip(counts) {
        *take = (*take).clamp(1, count - 1);
    }

    let mut total: usize = alloc.iter().sum();
    while total > target {
        // most test rows first, smaller stratum value on ties
        let Some(i) = (0..alloc.len())
            .filter(|&i| alloc[i] > 1)
            .max_by(|&a, &b| alloc[a].cmp(&alloc[b]).then(b.cmp(&a)))
        else {
            break;
        };
        alloc[i] -= 1;
        total -= 1;
    }
    while total < target {
        // most train rows to spare first
        let Some(i) = (0..alloc.len())
            .filter(|&i| alloc[i] + 1 < counts[i])
            .max_by(|&a, &b| {
                (counts[a] - alloc[a]).cmp(&(counts[b] - alloc[b])).then(b.cmp(&a))
            })
        else {
            break;
        };
        alloc[i] += 1;
        total += 1;
    }
}

/// Split row positions `0..strata.len()` into train and test, stratified on
/// `strata`. Deterministic for a given `seed`.
pub fn stratified_split(strata: &[i64], test_fraction: f64, seed: u64) -> PipelineResult<SplitIndices> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::Config(format!(
            "test fraction must lie in (0, 1), got {}",
            test_fraction
        )));
    }

    let n = strata.len();
    let n_test = (test_fraction * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(PipelineError::EmptyDataset(format!(
            "{} samples cannot be split with test fraction {}",
            n, test_fraction
        )));
    }

    let groups = group_by_stratum(strata);
    if let Some((stratum, rows)) = groups.iter().find(|(_, rows)| rows.len() < 2) {
        return Err(PipelineError::Shape(format!(
            "stratum {} has only {} member; every stratum needs at least 2",
            stratum,
            rows.len()
        )));
    }
    if n_test < groups.len() || n_train < groups.len() {
        return Err(PipelineError::Shape(format!(
            "train ({}) and test ({}) sizes must each cover all {} strata",
            n_train,
            n_test,
            groups.len()
        )));
    }

    let counts: Vec<usize> = groups.values().map(Vec::len).collect();
    let test_counts = apportion(&counts, n, n_test);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);

    for (rows, &take) in groups.into_values().zip(test_counts.iter()) {
        let mut rows = rows;
        rows.shuffle(&mut rng);
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    Ok(SplitIndices { train, test })
}
