use std::path::Path;

use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis, Ix1, Ix2};
use serde::{Deserialize, Serialize};

use crate::logic::archive::{ArchiveWriter, TensorArchive};
use crate::logic::error::{ArtifactKind, PipelineError, PipelineResult};

/// Was the sample part of the shadow model's training set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Membership {
    NonMember = 0,
    Member = 1,
}

impl Membership {
    pub fn flag(self) -> i64 {
        self as i64
    }

    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            0 => Some(Membership::NonMember),
            1 => Some(Membership::Member),
            _ => None,
        }
    }
}

/// One model output: probability vector, true class, membership, source model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub probabilities: Vec<f32>,
    pub label: i64,
    pub member: i64,
    pub shadow_id: u32,
}

/// Column-wise attack data for one or more shadow models
#[derive(Debug, Clone, PartialEq)]
pub struct AttackData {
    /// Softmax outputs [N, K]
    pub probabilities: Array2<f32>,
    /// Ground-truth class labels [N]
    pub labels: Array1<i64>,
    /// Membership flags [N] (1 = member, 0 = non-member)
    pub members: Array1<i64>,
}

impl AttackData {
    pub fn new(
        probabilities: Array2<f32>,
        labels: Array1<i64>,
        members: Array1<i64>,
    ) -> PipelineResult<Self> {
        let n = probabilities.nrows();
        if labels.len() != n || members.len() != n {
            return Err(PipelineError::Shape(format!(
                "attack data rows disagree: {} probabilities, {} labels, {} members",
                n,
                labels.len(),
                members.len()
            )));
        }
        Ok(Self { probabilities, labels, members })
    }

    pub fn empty(num_classes: usize) -> Self {
        Self {
            probabilities: Array2::zeros((0, num_classes)),
            labels: Array1::zeros(0),
            members: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.probabilities.ncols()
    }

    pub fn member_count(&self) -> usize {
        self.members.iter().filter(|&&m| m == Membership::Member.flag()).count()
    }

    pub fn probability_row(&self, row: usize) -> ArrayView1<'_, f32> {
        self.probabilities.row(row)
    }

    pub fn record(&self, row: usize, shadow_id: u32) -> OutputRecord {
        OutputRecord {
            probabilities: self.probabilities.row(row).to_vec(),
            label: self.labels[row],
            member: self.members[row],
            shadow_id,
        }
    }

    /// Keep only `rows`, in the given order
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            probabilities: self.probabilities.select(Axis(0), rows),
            labels: self.labels.select(Axis(0), rows),
            members: self.members.select(Axis(0), rows),
        }
    }

    /// Stack parts row-wise; every part must have the same class count
    pub fn concat(parts: &[&AttackData]) -> PipelineResult<Self> {
        let Some(first) = parts.first() else {
            return Err(PipelineError::EmptyDataset("nothing to concatenate".into()));
        };
        let num_classes = first.num_classes();
        if let Some(bad) = parts.iter().find(|p| p.num_classes() != num_classes) {
            return Err(PipelineError::Shape(format!(
                "class count mismatch: {} vs {}",
                num_classes,
                bad.num_classes()
            )));
        }

        let probs: Vec<_> = parts.iter().map(|p| p.probabilities.view()).collect();
        let labels: Vec<_> = parts.iter().map(|p| p.labels.view()).collect();
        let members: Vec<_> = parts.iter().map(|p| p.members.view()).collect();

        Ok(Self {
            probabilities: concatenate(Axis(0), &probs)?,
            labels: concatenate(Axis(0), &labels)?,
            members: concatenate(Axis(0), &members)?,
        })
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    pub fn save(&self, path: &Path, shadow_id: u32, checkpoint_sha256: Option<&str>) -> PipelineResult<()> {
        let n = self.len();
        let mut writer = ArchiveWriter::new()
            .with_metadata("shadow_id", shadow_id)
            .put_f32("probabilities", &[n, self.num_classes()], self.probabilities.iter())
            .put_i64("labels", &[n], self.labels.iter())
            .put_i64("members", &[n], self.members.iter());
        if let Some(sha) = checkpoint_sha256 {
            writer = writer.with_metadata("checkpoint_sha256", sha);
        }
        writer.save(path)
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let archive = TensorArchive::load(path, ArtifactKind::AttackData)?;
        Self::new(
            archive.array_f32("probabilities")?.into_dimensionality::<Ix2>()?,
            archive.array_i64("labels")?.into_dimensionality::<Ix1>()?,
            archive.array_i64("members")?.into_dimensionality::<Ix1>()?,
        )
    }
}
