//! Extraction Pipeline - Per shadow model loop and run report
//!
//! For each configured id: load samples, check the partitions, load the
//! checkpoint, evaluate, extract member (train) and non-member (test)
//! outputs, deduplicate, persist. Missing artifacts skip the id; anything
//! else aborts the run.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::aggregate::{combine_attack_data, flag_stale_archives, CombinedSummary};
use crate::logic::config::PipelineConfig;
use crate::logic::dataset::{
    check_disjoint, deduplicate, AttackData, ConflictLogWriter, Membership, OverlapCheck,
    ShadowDataset,
};
use crate::logic::error::{ArtifactKind, PipelineError, PipelineResult};
use crate::logic::model::{evaluate_accuracy, extract_outputs, load_checkpoint, InferenceOptions};

#[cfg(test)]
mod tests;

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Result of one successfully processed shadow model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSummary {
    pub shadow_id: u32,
    pub checkpoint_sha256: String,
    pub test_accuracy: f64,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Records written after dedup
    pub records: usize,
    pub members: usize,
    pub duplicates_dropped: usize,
    pub conflicts_dropped: usize,
    pub overlap_check: OverlapCheck,
    pub overlapping_samples: usize,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedModel {
    pub shadow_id: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum ModelOutcome {
    Extracted(ModelSummary),
    Skipped(SkippedModel),
}

/// Everything a run did, saved next to the attack data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub shadow_ids: (u32, u32),
    pub models: Vec<ModelSummary>,
    pub skipped: Vec<SkippedModel>,
    pub combined: Option<CombinedSummary>,
}

impl RunReport {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            version: crate::constants::APP_VERSION.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            shadow_ids: (*config.shadow_ids.start(), *config.shadow_ids.end()),
            models: Vec::new(),
            skipped: Vec::new(),
            combined: None,
        }
    }

    pub fn total_records(&self) -> usize {
        self.models.iter().map(|m| m.records).sum()
    }

    pub fn total_conflicts(&self) -> usize {
        self.models.iter().map(|m| m.conflicts_dropped).sum()
    }

    pub fn save(&self, path: &std::path::Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &std::path::Path) -> PipelineResult<Self> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

// ============================================================================
// PER MODEL
// ============================================================================

/// Process one shadow model. Missing inputs come back as skippable errors.
pub fn extract_shadow_model(
    config: &PipelineConfig,
    shadow_id: u32,
    conflict_log: &ConflictLogWriter,
) -> PipelineResult<ModelSummary> {
    let train_path = config.train_data_path(shadow_id);
    let test_path = config.test_data_path(shadow_id);
    for (path, kind) in [(&train_path, ArtifactKind::TrainData), (&test_path, ArtifactKind::TestData)] {
        if !path.exists() {
            log::info!("Data for Shadow Model {} not found. Skipping.", shadow_id);
            return Err(PipelineError::MissingArtifact { kind, path: path.clone() });
        }
    }

    let train = ShadowDataset::load(&train_path, ArtifactKind::TrainData)?;
    let test = ShadowDataset::load(&test_path, ArtifactKind::TestData)?;
    if train.image_shape() != test.image_shape() {
        return Err(PipelineError::Shape(format!(
            "Shadow Model {}: train images {:?} vs test images {:?}",
            shadow_id,
            train.image_shape(),
            test.image_shape()
        )));
    }
    let (overlap_check, overlapping) = check_disjoint(shadow_id, &train, &test)?;

    log::info!("Extracting attack data for Shadow Model {}...", shadow_id);

    let model_path = config.model_path(shadow_id);
    if !model_path.exists() {
        log::info!("Model {} not found. Skipping.", shadow_id);
        return Err(PipelineError::MissingArtifact {
            kind: ArtifactKind::Checkpoint,
            path: model_path,
        });
    }
    let (height, width, _) = train.image_shape();
    let checkpoint = load_checkpoint(&model_path, (height, width))?;

    let options = InferenceOptions {
        batch_size: config.batch_size,
        normalization: &config.normalization,
        tolerance: config.sum_tolerance,
    };

    log::info!("Evaluating Shadow Model {}...", shadow_id);
    let test_accuracy = evaluate_accuracy(&checkpoint.model, &test, &options)?;

    let train_out = extract_outputs(&checkpoint.model, &train, Membership::Member, &options)?;
    let test_out = extract_outputs(&checkpoint.model, &test, Membership::NonMember, &options)?;
    let outputs = AttackData::concat(&[&train_out, &test_out])?;

    let outcome = deduplicate(&outputs, shadow_id, config.dedup_precision);
    conflict_log.append(&outcome.conflicts)?;
    let data = outcome.data;

    log::info!(
        "Final probabilities shape: ({}, {})",
        data.len(),
        data.num_classes()
    );
    log::info!("Final labels shape: ({})", data.labels.len());
    log::info!("Final members shape: ({})", data.members.len());

    let output_path = config.attack_data_path(shadow_id);
    data.save(&output_path, shadow_id, Some(&checkpoint.sha256))?;
    log::info!(
        "Attack data for Shadow Model {} saved to {}.",
        shadow_id,
        output_path.display()
    );

    Ok(ModelSummary {
        shadow_id,
        checkpoint_sha256: checkpoint.sha256,
        test_accuracy,
        train_samples: train.len(),
        test_samples: test.len(),
        records: data.len(),
        members: data.member_count(),
        duplicates_dropped: outcome.duplicates,
        conflicts_dropped: outcome.conflicts.len(),
        overlap_check,
        overlapping_samples: overlapping,
        output_path,
    })
}

/// Run `extract_shadow_model`, turning skippable errors into a skip record
pub fn process_shadow_model(
    config: &PipelineConfig,
    shadow_id: u32,
    conflict_log: &ConflictLogWriter,
) -> PipelineResult<ModelOutcome> {
    match extract_shadow_model(config, shadow_id, conflict_log) {
        Ok(summary) => Ok(ModelOutcome::Extracted(summary)),
        Err(e) if e.is_skippable() => {
            if matches!(e, PipelineError::PartitionOverlap { .. }) {
                log::warn!("{}. Skipping.", e);
            }
            Ok(ModelOutcome::Skipped(SkippedModel {
                shadow_id,
                reason: e.to_string(),
            }))
        }
        Err(e) => {
            log::error!("Shadow Model {} failed: {}", shadow_id, e);
            Err(e)
        }
    }
}

// ============================================================================
// RUN
// ============================================================================

/// Extract every configured shadow model, then combine (if enabled)
pub fn run(config: &PipelineConfig) -> PipelineResult<RunReport> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)?;

    let mut report = RunReport::new(config);
    let conflict_log = ConflictLogWriter::create(&config.conflict_log_path())?;

    log::info!(
        "Processing shadow models {}-{} (batch size {}, dedup key {})",
        config.shadow_ids.start(),
        config.shadow_ids.end(),
        config.batch_size,
        config.dedup_precision
    );

    for shadow_id in config.shadow_ids.clone() {
        match process_shadow_model(config, shadow_id, &conflict_log)? {
            ModelOutcome::Extracted(summary) => report.models.push(summary),
            ModelOutcome::Skipped(skip) => report.skipped.push(skip),
        }
    }

    log::info!(
        "Extracted {} shadow models ({} skipped, {} records, {} conflicts)",
        report.models.len(),
        report.skipped.len(),
        report.total_records(),
        report.total_conflicts()
    );

    if config.combine {
        let (_, mut summary) = combine_attack_data(config)?;
        let skipped: Vec<u32> = report.skipped.iter().map(|s| s.shadow_id).collect();
        flag_stale_archives(&mut summary, &config.shadow_ids, &skipped);
        report.combined = Some(summary);
    }

    report.finished_at = Some(Utc::now());
    let report_path = config.report_path();
    report.save(&report_path)?;
    log::info!("Run report saved to {}", report_path.display());

    Ok(report)
}
