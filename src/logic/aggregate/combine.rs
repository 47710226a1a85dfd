//! Combine - Merge per-model attack data into the attacker dataset

use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::split::stratified_split;
use crate::constants::{MODEL_FILE_PREFIX, TENSOR_FILE_EXT};
use crate::logic::archive::{ArchiveWriter, TensorArchive};
use crate::logic::config::PipelineConfig;
use crate::logic::dataset::{AttackData, Membership};
use crate::logic::error::{ArtifactKind, PipelineError, PipelineResult};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Attacker train/test split. Feature rows are `[probabilities..., label]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedDataset {
    pub x_train: Array2<f64>,
    pub y_train: Array1<i64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<i64>,
    /// Shadow model id of every train row
    pub source_train: Array1<i64>,
    /// Shadow model id of every test row
    pub source_test: Array1<i64>,
}

/// Counts logged and written to the run report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombinedSummary {
    pub archives: Vec<u32>,
    pub total_records: usize,
    pub feature_count: usize,
    pub train_records: usize,
    pub test_records: usize,
    pub train_member_ratio: f64,
    pub test_member_ratio: f64,
    pub path: PathBuf,
    /// Combined archives this run did not write (skipped or outside the id range)
    #[serde(default)]
    pub stale_archives: Vec<u32>,
}

/// Share of member flags in `members` (0 for an empty slice)
pub fn member_ratio(members: &Array1<i64>) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let hits = members.iter().filter(|&&m| m == Membership::Member.flag()).count();
    hits as f64 / members.len() as f64
}

impl CombinedDataset {
    pub fn len(&self) -> usize {
        self.y_train.len() + self.y_test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feature_count(&self) -> usize {
        self.x_train.ncols()
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        let features = self.feature_count();
        ArchiveWriter::new()
            .put_f64("X_train", &[self.y_train.len(), features], self.x_train.iter())
            .put_i64("y_train", &[self.y_train.len()], self.y_train.iter())
            .put_f64("X_test", &[self.y_test.len(), features], self.x_test.iter())
            .put_i64("y_test", &[self.y_test.len()], self.y_test.iter())
            .put_i64("source_train", &[self.source_train.len()], self.source_train.iter())
            .put_i64("source_test", &[self.source_test.len()], self.source_test.iter())
            .save(path)
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let archive = TensorArchive::load(path, ArtifactKind::AttackData)?;
        Ok(Self {
            x_train: archive.array_f64("X_train")?.into_dimensionality::<Ix2>()?,
            y_train: archive.array_i64("y_train")?.into_dimensionality::<Ix1>()?,
            x_test: archive.array_f64("X_test")?.into_dimensionality::<Ix2>()?,
            y_test: archive.array_i64("y_test")?.into_dimensionality::<Ix1>()?,
            source_train: archive.array_i64("source_train")?.into_dimensionality::<Ix1>()?,
            source_test: archive.array_i64("source_test")?.into_dimensionality::<Ix1>()?,
        })
    }
}

// ============================================================================
// DISCOVERY
// ============================================================================

/// Per-model attack archives in `dir`, sorted by shadow id
pub fn discover_attack_archives(dir: &Path) -> PipelineResult<Vec<(u32, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        r"^{}(\d+)_attack_data\.{}$",
        regex::escape(MODEL_FILE_PREFIX),
        regex::escape(TENSOR_FILE_EXT)
    );
    let re = Regex::new(&pattern).map_err(|e| PipelineError::Config(e.to_string()))?;

    let mut found: Vec<(u32, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|r| r.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            let id = re.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((id, p))
        })
        .collect();

    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}

// ============================================================================
// COMBINE
// ============================================================================

/// Feature matrix `[probabilities..., label]` as f64
pub fn build_features(data: &AttackData) -> Array2<f64> {
    let k = data.num_classes();
    let mut features = Array2::<f64>::zeros((data.len(), k + 1));
    for (mut out, (probs, &label)) in features
        .axis_iter_mut(Axis(0))
        .zip(data.probabilities.axis_iter(Axis(0)).zip(data.labels.iter()))
    {
        for (dst, &p) in out.iter_mut().zip(probs.iter()) {
            *dst = p as f64;
        }
        out[k] = label as f64;
    }
    features
}

/// Concatenate attack data parts and split them for the attacker
pub fn combine_parts(
    parts: &[(u32, AttackData)],
    test_fraction: f64,
    seed: u64,
) -> PipelineResult<CombinedDataset> {
    let refs: Vec<&AttackData> = parts.iter().map(|(_, d)| d).collect();
    let combined = AttackData::concat(&refs)?;
    if combined.is_empty() {
        return Err(PipelineError::EmptyDataset("all attack archives are empty".into()));
    }
    log::info!("Collected data points: {}", combined.len());

    let sources: Array1<i64> = parts
        .iter()
        .flat_map(|(id, d)| std::iter::repeat(*id as i64).take(d.len()))
        .collect();

    let features = build_features(&combined);
    let members = combined.members.to_vec();
    let split = stratified_split(&members, test_fraction, seed)?;

    Ok(CombinedDataset {
        x_train: features.select(Axis(0), &split.train),
        y_train: combined.members.select(Axis(0), &split.train),
        x_test: features.select(Axis(0), &split.test),
        y_test: combined.members.select(Axis(0), &split.test),
        source_train: sources.select(Axis(0), &split.train),
        source_test: sources.select(Axis(0), &split.test),
    })
}

/// Load every per-model archive from the output dir, split, and persist the
/// combined dataset
pub fn combine_attack_data(config: &PipelineConfig) -> PipelineResult<(CombinedDataset, CombinedSummary)> {
    let archives = discover_attack_archives(&config.output_dir)?;
    if archives.is_empty() {
        return Err(PipelineError::EmptyDataset(format!(
            "no attack data archives in {}",
            config.output_dir.display()
        )));
    }

    let mut parts = Vec::with_capacity(archives.len());
    for (id, path) in &archives {
        log::info!("Load data from: {}", path.display());
        parts.push((*id, AttackData::load(path)?));
    }

    let dataset = combine_parts(&parts, config.test_fraction, config.split_seed)?;

    let path = config.combined_path();
    dataset.save(&path)?;

    let summary = CombinedSummary {
        archives: archives.iter().map(|(id, _)| *id).collect(),
        total_records: dataset.len(),
        feature_count: dataset.feature_count(),
        train_records: dataset.y_train.len(),
        test_records: dataset.y_test.len(),
        train_member_ratio: member_ratio(&dataset.y_train),
        test_member_ratio: member_ratio(&dataset.y_test),
        path: path.clone(),
        stale_archives: Vec::new(),
    };

    log::info!("Combined data path: {}", path.display());
    log::info!(
        "Train Data: ({}, {}), Test Data: ({}, {})",
        summary.train_records,
        summary.feature_count,
        summary.test_records,
        summary.feature_count
    );

    Ok((dataset, summary))
}

/// Record and warn about combined archives that were left over from an earlier
/// run: ids skipped in this run or outside its id range
pub fn flag_stale_archives(summary: &mut CombinedSummary, ids: &RangeInclusive<u32>, skipped: &[u32]) {
    summary.stale_archives = summary
        .archives
        .iter()
        .copied()
        .filter(|id| !ids.contains(id) || skipped.contains(id))
        .collect();

    for id in &summary.stale_archives {
        let reason = if ids.contains(id) { "skipped in this run" } else { "outside this run's ids" };
        log::warn!(
            "Combined attack data for Shadow Model {} comes from an earlier run ({})",
            id,
            reason
        );
    }
}
