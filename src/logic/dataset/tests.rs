use super::dedup::{deduplicate, KeyPrecision, ProbabilityKey};
use super::loader::{check_disjoint, Normalization, OverlapCheck, ShadowDataset};
use super::record::{AttackData, Membership};
use super::writer::{read_conflicts, ConflictLogWriter};
use crate::logic::config::PipelineConfig;
use crate::logic::error::{ArtifactKind, PipelineError};
use crate::logic::model::softmax_rows;
use ndarray::{array, Array1, Array4};
use tempfile::tempdir;

fn attack_data(rows: &[[f32; 3]], labels: &[i64], members: &[i64]) -> AttackData {
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    AttackData::new(
        ndarray::Array2::from_shape_vec((rows.len(), 3), flat).unwrap(),
        Array1::from(labels.to_vec()),
        Array1::from(members.to_vec()),
    )
    .unwrap()
}

fn tiny_dataset(n: usize, offset: u8, indices: Option<Vec<i64>>) -> ShadowDataset {
    let images = Array4::from_shape_fn((n, 2, 2, 3), |(i, y, x, c)| {
        offset.wrapping_add((i * 12 + y * 6 + x * 3 + c) as u8)
    });
    let labels = Array1::from_iter((0..n).map(|i| (i % 10) as i64));
    ShadowDataset::new(images, labels, indices.map(Array1::from)).unwrap()
}

// ============================================================================
// DEDUP
// ============================================================================

#[test]
fn test_conflicting_duplicate_is_dropped_first_kept() {
    let data = attack_data(&[[0.5, 0.5, 0.0], [0.5, 0.5, 0.0]], &[1, 1], &[1, 0]);

    let outcome = deduplicate(&data, 7, KeyPrecision::Exact);

    assert_eq!(outcome.data.len(), 1);
    assert_eq!(outcome.data.members[0], 1);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.duplicates, 0);

    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.shadow_id, 7);
    assert_eq!(conflict.row, 1);
    assert_eq!(conflict.kept_member, 1);
    assert_eq!(conflict.dropped_member, 0);
}

#[test]
fn test_same_label_duplicate_is_dropped_silently() {
    let data = attack_data(
        &[[0.2, 0.3, 0.5], [0.1, 0.1, 0.8], [0.2, 0.3, 0.5]],
        &[2, 2, 2],
        &[0, 0, 0],
    );

    let outcome = deduplicate(&data, 1, KeyPrecision::Exact);

    assert_eq!(outcome.data.len(), 2);
    assert!(outcome.conflicts.is_empty());
    assert_eq!(outcome.duplicates, 1);
    assert_eq!(outcome.dropped(), 1);
}

#[test]
fn test_dedup_is_idempotent() {
    let data = attack_data(
        &[
            [0.5, 0.5, 0.0],
            [0.5, 0.5, 0.0],
            [0.1, 0.2, 0.7],
            [0.1, 0.2, 0.7],
            [0.3, 0.3, 0.4],
        ],
        &[0, 0, 2, 2, 1],
        &[1, 0, 0, 0, 1],
    );

    let once = deduplicate(&data, 3, KeyPrecision::Decimals(8));
    let twice = deduplicate(&once.data, 3, KeyPrecision::Decimals(8));

    assert_eq!(once.data, twice.data);
    assert!(twice.conflicts.is_empty());
    assert_eq!(twice.duplicates, 0);
}

#[test]
fn test_conflict_after_drop_still_checks_first_label() {
    // member, non-member (conflict), member (duplicate of the kept one)
    let data = attack_data(
        &[[0.6, 0.4, 0.0], [0.6, 0.4, 0.0], [0.6, 0.4, 0.0]],
        &[0, 0, 0],
        &[1, 0, 1],
    );

    let outcome = deduplicate(&data, 2, KeyPrecision::Exact);

    assert_eq!(outcome.data.len(), 1);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.duplicates, 1);
}

#[test]
fn test_key_precision() {
    let a = array![0.1234561f32, 0.8765439];
    let b = array![0.1234564f32, 0.8765436];

    // Distinct f32 values that agree to 6 decimals
    assert_ne!(
        ProbabilityKey::new(a.view(), KeyPrecision::Exact),
        ProbabilityKey::new(b.view(), KeyPrecision::Exact)
    );
    assert_eq!(
        ProbabilityKey::new(a.view(), KeyPrecision::Decimals(6)),
        ProbabilityKey::new(b.view(), KeyPrecision::Decimals(6))
    );

    let neg_zero = array![-0.0f32, 1.0];
    let pos_zero = array![0.0f32, 1.0];
    assert_eq!(
        ProbabilityKey::new(neg_zero.view(), KeyPrecision::Exact),
        ProbabilityKey::new(pos_zero.view(), KeyPrecision::Exact)
    );
}

#[test]
fn test_default_key_keeps_distinct_saturated_rows() {
    let probs = softmax_rows(&array![[30.0f32, 0.0, 1.0], [30.0, 2.0, 0.5]]);
    assert_ne!(probs.row(0), probs.row(1));
    let data = AttackData::new(probs, array![0i64, 0], array![1i64, 0]).unwrap();

    let config = PipelineConfig::new("unused");
    assert_eq!(config.dedup_precision, KeyPrecision::Exact);

    let outcome = deduplicate(&data, 1, config.dedup_precision);
    assert_eq!(outcome.data.len(), 2);
    assert!(outcome.conflicts.is_empty());
    assert_eq!(outcome.duplicates, 0);

    // Rounding collapses the tiny entries onto one key
    let rounded = deduplicate(&data, 1, KeyPrecision::Decimals(8));
    assert_eq!(rounded.data.len(), 1);
    assert_eq!(rounded.conflicts.len(), 1);
}

#[test]
fn test_key_precision_parse() {
    assert_eq!("exact".parse::<KeyPrecision>().unwrap(), KeyPrecision::Exact);
    assert_eq!(" 8 ".parse::<KeyPrecision>().unwrap(), KeyPrecision::Decimals(8));
    assert!("16".parse::<KeyPrecision>().is_err());
    assert!("fine".parse::<KeyPrecision>().is_err());
}

// ============================================================================
// ATTACK DATA
// ============================================================================

#[test]
fn test_attack_data_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shadow_model_1_attack_data.safetensors");
    let data = attack_data(&[[0.2, 0.3, 0.5], [0.9, 0.05, 0.05]], &[2, 0], &[1, 0]);

    data.save(&path, 1, Some("abc123")).unwrap();
    let loaded = AttackData::load(&path).unwrap();

    assert_eq!(loaded, data);
    assert_eq!(loaded.member_count(), 1);
    assert_eq!(loaded.record(1, 1).label, 0);
}

#[test]
fn test_concat_rejects_class_mismatch() {
    let a = attack_data(&[[0.2, 0.3, 0.5]], &[2], &[1]);
    let b = AttackData::empty(4);

    assert!(matches!(AttackData::concat(&[&a, &b]), Err(PipelineError::Shape(_))));
    assert!(matches!(AttackData::concat(&[]), Err(PipelineError::EmptyDataset(_))));

    let both = AttackData::concat(&[&a, &a]).unwrap();
    assert_eq!(both.len(), 2);
}

#[test]
fn test_membership_flags() {
    assert_eq!(Membership::Member.flag(), 1);
    assert_eq!(Membership::NonMember.flag(), 0);
    assert_eq!(Membership::from_flag(1), Some(Membership::Member));
    assert_eq!(Membership::from_flag(2), None);
}

// ============================================================================
// SAMPLES
// ============================================================================

#[test]
fn test_batches_are_normalized_channel_first() {
    let dataset = tiny_dataset(5, 0, None);
    let norm = Normalization::default();

    let batches: Vec<_> = dataset.batches(2, &norm).collect();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].0.dim(), (2, 3, 2, 2));
    assert_eq!(batches[2].0.dim(), (1, 3, 2, 2));
    assert_eq!(batches[2].1.to_vec(), vec![4]);

    // pixel 0 -> (0/255 - 0.5) / 0.5 = -1
    assert!((batches[0].0[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
    // image 0, y 0, x 1, channel 2 holds 5
    let expected = (5.0 / 255.0 - 0.5) / 0.5;
    assert!((batches[0].0[[0, 2, 0, 1]] - expected).abs() < 1e-6);
}

#[test]
fn test_sample_archive_round_trip_and_missing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("train").join("train_data.safetensors");
    let dataset = tiny_dataset(3, 1, Some(vec![10, 11, 12]));
    dataset.save(&path).unwrap();

    let loaded = ShadowDataset::load(&path, ArtifactKind::TrainData).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.image_shape(), (2, 2, 3));
    assert_eq!(loaded.indices().unwrap().to_vec(), vec![10, 11, 12]);

    let missing = ShadowDataset::load(&dir.path().join("nope"), ArtifactKind::TestData);
    assert!(matches!(
        missing,
        Err(PipelineError::MissingArtifact { kind: ArtifactKind::TestData, .. })
    ));
}

#[test]
fn test_label_count_must_match_images() {
    let images = Array4::<u8>::zeros((3, 2, 2, 3));
    let labels = Array1::from(vec![0i64, 1]);
    assert!(ShadowDataset::new(images, labels, None).is_err());
}

#[test]
fn test_disjoint_partitions_by_indices() {
    let train = tiny_dataset(3, 0, Some(vec![0, 1, 2]));
    let test = tiny_dataset(2, 100, Some(vec![3, 4]));
    assert_eq!(check_disjoint(9, &train, &test).unwrap(), (OverlapCheck::Indices, 0));

    let leaking = tiny_dataset(2, 100, Some(vec![2, 5]));
    match check_disjoint(9, &train, &leaking) {
        Err(PipelineError::PartitionOverlap { shadow_id, overlapping }) => {
            assert_eq!(shadow_id, 9);
            assert_eq!(overlapping, 1);
        }
        other => panic!("expected overlap, got {other:?}"),
    }
}

#[test]
fn test_content_overlap_is_counted_not_fatal() {
    let train = tiny_dataset(3, 0, None);
    let test = tiny_dataset(3, 0, None);
    assert_eq!(
        check_disjoint(1, &train, &test).unwrap(),
        (OverlapCheck::ImageContent, 3)
    );

    let other = tiny_dataset(3, 200, None);
    assert_eq!(
        check_disjoint(1, &train, &other).unwrap(),
        (OverlapCheck::ImageContent, 0)
    );
}

// ============================================================================
// CONFLICT LOG
// ============================================================================

#[test]
fn test_conflict_log_append_and_read() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dedup_conflicts.jsonl");
    let writer = ConflictLogWriter::create(&path).unwrap();

    let data = attack_data(&[[0.5, 0.5, 0.0], [0.5, 0.5, 0.0]], &[1, 1], &[1, 0]);
    let outcome = deduplicate(&data, 5, KeyPrecision::Exact);
    assert_eq!(writer.append(&outcome.conflicts).unwrap(), 1);
    assert_eq!(writer.append(&[]).unwrap(), 0);

    let read = read_conflicts(&path).unwrap();
    assert_eq!(read, outcome.conflicts);

    // A new run starts from an empty log
    ConflictLogWriter::create(&path).unwrap();
    assert!(read_conflicts(&path).unwrap().is_empty());
}
