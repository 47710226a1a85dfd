use super::{process_shadow_model, run, ModelOutcome, RunReport};
use crate::logic::aggregate::CombinedDataset;
use crate::logic::config::PipelineConfig;
use crate::logic::dataset::writer::read_conflicts;
use crate::logic::dataset::{AttackData, ConflictLogWriter, ShadowDataset};
use crate::logic::error::{ArtifactKind, PipelineError};
use crate::logic::model::{save_checkpoint, Conv2d, Linear, ShadowCnn};
use ndarray::{array, Array1, Array2, Array4};
use std::path::Path;
use tempfile::tempdir;

const IMAGE: usize = 8;

fn tiny_cnn() -> ShadowCnn {
    let conv1 = Conv2d::new(
        Array4::from_shape_fn((2, 3, 3, 3), |(o, c, y, x)| ((o + c + y + x) as f32 * 0.1) - 0.3),
        array![0.01, -0.02],
    )
    .unwrap();
    let conv2 = Conv2d::new(
        Array4::from_shape_fn((2, 2, 3, 3), |(o, c, y, x)| ((o * 3 + c + y * x) as f32 * 0.05) - 0.1),
        array![0.0, 0.1],
    )
    .unwrap();
    let flat = 2 * (IMAGE / 4) * (IMAGE / 4);
    let fc1 = Linear::new(
        Array2::from_shape_fn((4, flat), |(o, i)| ((o + i) % 5) as f32 * 0.1 - 0.2),
        array![0.0, 0.1, -0.1, 0.2],
    )
    .unwrap();
    let fc2 = Linear::new(
        Array2::from_shape_fn((3, 4), |(o, i)| (o as f32 - i as f32) * 0.3),
        array![0.05, 0.0, -0.05],
    )
    .unwrap();
    ShadowCnn::new(conv1, conv2, fc1, fc2, (3, IMAGE, IMAGE)).unwrap()
}

fn samples(first_index: i64, n: usize) -> ShadowDataset {
    let offset = first_index as usize;
    let images = Array4::from_shape_fn((n, IMAGE, IMAGE, 3), |(i, y, x, c)| {
        (((i + offset) * 37 + y * 11 + x * 5 + c * 3) % 256) as u8
    });
    let labels = Array1::from_iter((0..n).map(|i| ((i + offset) % 3) as i64));
    let indices = Array1::from_iter((0..n as i64).map(|i| first_index + i));
    ShadowDataset::new(images, labels, Some(indices)).unwrap()
}

/// Train indices `0..n`, test indices starting at `test_start`
fn write_shadow_data(config: &PipelineConfig, shadow_id: u32, n: usize, test_start: i64) {
    samples(0, n).save(&config.train_data_path(shadow_id)).unwrap();
    samples(test_start, n).save(&config.test_data_path(shadow_id)).unwrap();
}

fn write_model(config: &PipelineConfig, shadow_id: u32) {
    save_checkpoint(&tiny_cnn(), &config.model_path(shadow_id)).unwrap();
}

fn test_config(base: &Path, ids: std::ops::RangeInclusive<u32>) -> PipelineConfig {
    let mut config = PipelineConfig::new(base);
    config.shadow_ids = ids;
    config.batch_size = 5;
    config
}

#[test]
fn test_run_skips_missing_checkpoint_and_continues() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 4..=6);
    for id in 4..=6 {
        write_shadow_data(&config, id, 12, 100);
    }
    write_model(&config, 4);
    write_model(&config, 6);

    let report = run(&config).unwrap();

    let extracted: Vec<u32> = report.models.iter().map(|m| m.shadow_id).collect();
    assert_eq!(extracted, vec![4, 6]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].shadow_id, 5);
    assert!(!config.attack_data_path(5).exists());
    assert!(config.attack_data_path(6).exists());
}

#[test]
fn test_run_flags_archive_left_from_earlier_run() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 4..=6);
    for id in 4..=6 {
        write_shadow_data(&config, id, 12, 100);
    }
    write_model(&config, 4);
    write_model(&config, 6);
    // id 5 was extracted by an earlier run, its checkpoint is gone now
    AttackData::new(
        array![[0.2f32, 0.3, 0.5], [0.6, 0.2, 0.2], [0.1, 0.1, 0.8], [0.4, 0.4, 0.2]],
        array![2i64, 0, 2, 1],
        array![1i64, 1, 0, 0],
    )
    .unwrap()
    .save(&config.attack_data_path(5), 5, None)
    .unwrap();

    let report = run(&config).unwrap();
    assert_eq!(report.skipped[0].shadow_id, 5);

    let combined = report.combined.as_ref().unwrap();
    assert_eq!(combined.archives, vec![4, 5, 6]);
    assert_eq!(combined.stale_archives, vec![5]);
}

#[test]
fn test_run_writes_member_then_non_member_outputs() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 1..=1);
    write_shadow_data(&config, 1, 10, 50);
    write_model(&config, 1);

    let report = run(&config).unwrap();
    let summary = &report.models[0];
    assert_eq!(summary.train_samples, 10);
    assert_eq!(summary.test_samples, 10);
    assert_eq!(summary.records + summary.duplicates_dropped + summary.conflicts_dropped, 20);
    assert_eq!(summary.checkpoint_sha256.len(), 64);

    let data = AttackData::load(&config.attack_data_path(1)).unwrap();
    assert_eq!(data.len(), summary.records);
    assert_eq!(data.num_classes(), 3);
    assert_eq!(data.member_count(), summary.members);
    for row in data.probabilities.rows() {
        let sum: f32 = row.sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    // members come first, as extracted from the train set
    let flags = data.members.to_vec();
    let first_non_member = flags.iter().position(|&m| m == 0).unwrap_or(flags.len());
    assert!(flags[first_non_member..].iter().all(|&m| m == 0));
}

#[test]
fn test_run_combines_with_stratified_split() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 1..=3);
    for id in 1..=3 {
        write_shadow_data(&config, id, 10, 20);
        write_model(&config, id);
    }

    let report = run(&config).unwrap();
    let combined = report.combined.as_ref().unwrap();

    assert_eq!(combined.archives, vec![1, 2, 3]);
    assert_eq!(combined.total_records, report.total_records());
    assert!(combined.total_records <= 60);
    let expected_test = (combined.total_records as f64 * 0.3).ceil() as usize;
    assert_eq!(combined.test_records, expected_test);
    assert_eq!(combined.feature_count, 4);

    let dataset = CombinedDataset::load(&config.combined_path()).unwrap();
    assert_eq!(dataset.len(), combined.total_records);
    assert!((combined.train_member_ratio - combined.test_member_ratio).abs() < 0.1);
}

#[test]
fn test_run_persists_report_and_conflict_log() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), 1..=2);
    config.combine = false;
    write_shadow_data(&config, 1, 6, 6);
    write_model(&config, 1);

    let report = run(&config).unwrap();
    assert!(report.combined.is_none());
    assert!(!config.combined_path().exists());

    let saved = RunReport::load(&config.report_path()).unwrap();
    assert_eq!(saved.run_id, report.run_id);
    assert_eq!(saved.shadow_ids, (1, 2));
    assert_eq!(saved.models, report.models);
    assert!(saved.finished_at.is_some());

    let conflicts = read_conflicts(&config.conflict_log_path()).unwrap();
    assert_eq!(conflicts.len(), report.total_conflicts());
}

#[test]
fn test_overlapping_partitions_are_skipped() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 7..=7);
    // test indices 4..10 overlap train indices 0..6
    write_shadow_data(&config, 7, 6, 4);
    write_model(&config, 7);

    let log = ConflictLogWriter::create(&config.conflict_log_path()).unwrap();
    match process_shadow_model(&config, 7, &log).unwrap() {
        ModelOutcome::Skipped(skip) => {
            assert_eq!(skip.shadow_id, 7);
            assert!(skip.reason.contains("both train and test"));
        }
        ModelOutcome::Extracted(_) => panic!("overlapping partitions must not be extracted"),
    }
}

#[test]
fn test_missing_sample_data_is_skipped() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 3..=3);
    write_model(&config, 3);
    samples(0, 4).save(&config.train_data_path(3)).unwrap();

    let log = ConflictLogWriter::create(&config.conflict_log_path()).unwrap();
    let err = super::extract_shadow_model(&config, 3, &log).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingArtifact { kind: ArtifactKind::TestData, .. }
    ));
    assert!(err.is_skippable());
}

#[test]
fn test_corrupt_checkpoint_aborts_run() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), 1..=2);
    for id in 1..=2 {
        write_shadow_data(&config, id, 6, 6);
    }
    std::fs::create_dir_all(&config.model_dir).unwrap();
    std::fs::write(config.model_path(1), b"not a checkpoint").unwrap();
    write_model(&config, 2);

    let err = run(&config).unwrap_err();
    assert!(matches!(err, PipelineError::Archive(_)));
    assert!(!config.attack_data_path(2).exists());
}

#[test]
fn test_run_rejects_invalid_config() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), 1..=1);
    config.batch_size = 0;
    assert!(matches!(run(&config), Err(PipelineError::Config(_))));
}
