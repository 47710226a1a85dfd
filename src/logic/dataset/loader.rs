//! Shadow Dataset - Per-model train/test sample sets
//!
//! Images are stored as U8 [N, H, W, C] with integer labels [N] and an
//! optional `indices` tensor naming each sample's position in the source pool.

use std::collections::HashSet;
use std::path::Path;

use ndarray::{Array1, Array4, ArrayView1, Axis, Ix1, Ix4};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{DEFAULT_NORMALIZE_MEAN, DEFAULT_NORMALIZE_STD};
use crate::logic::archive::{ArchiveWriter, TensorArchive};
use crate::logic::error::{ArtifactKind, PipelineError, PipelineResult};

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Per-channel normalization: `(pixel / 255 - mean) / std`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Normalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: vec![DEFAULT_NORMALIZE_MEAN; 3],
            std: vec![DEFAULT_NORMALIZE_STD; 3],
        }
    }
}

impl Normalization {
    #[inline]
    pub fn apply(&self, pixel: u8, channel: usize) -> f32 {
        let mean = self.mean.get(channel).copied().unwrap_or(DEFAULT_NORMALIZE_MEAN);
        let std = self.std.get(channel).copied().unwrap_or(DEFAULT_NORMALIZE_STD);
        (pixel as f32 / 255.0 - mean) / std
    }
}

// ============================================================================
// DATASET
// ============================================================================

#[derive(Debug, Clone)]
pub struct ShadowDataset {
    images: Array4<u8>,
    labels: Array1<i64>,
    indices: Option<Array1<i64>>,
}

impl ShadowDataset {
    pub fn new(
        images: Array4<u8>,
        labels: Array1<i64>,
        indices: Option<Array1<i64>>,
    ) -> PipelineResult<Self> {
        let n = images.len_of(Axis(0));
        if labels.len() != n {
            return Err(PipelineError::Shape(format!(
                "{} images but {} labels",
                n,
                labels.len()
            )));
        }
        if let Some(idx) = &indices {
            if idx.len() != n {
                return Err(PipelineError::Shape(format!(
                    "{} images but {} indices",
                    n,
                    idx.len()
                )));
            }
        }
        Ok(Self { images, labels, indices })
    }

    /// Load a sample archive; `kind` tags the error if the file is absent
    pub fn load(path: &Path, kind: ArtifactKind) -> PipelineResult<Self> {
        let archive = TensorArchive::load(path, kind)?;

        let images = archive.array_u8("images")?.into_dimensionality::<Ix4>()?;
        let labels = archive.array_i64("labels")?.into_dimensionality::<Ix1>()?;
        let indices = if archive.has("indices") {
            Some(archive.array_i64("indices")?.into_dimensionality::<Ix1>()?)
        } else {
            None
        };

        let dataset = Self::new(images, labels, indices)?;
        log::debug!(
            "Loaded {} samples ({:?}) from {}",
            dataset.len(),
            dataset.image_shape(),
            path.display()
        );
        Ok(dataset)
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        let shape = self.images.shape().to_vec();
        let mut writer = ArchiveWriter::new()
            .put_u8("images", &shape, self.images.iter())
            .put_i64("labels", &[self.len()], self.labels.iter());
        if let Some(idx) = &self.indices {
            writer = writer.put_i64("indices", &[idx.len()], idx.iter());
        }
        writer.save(path)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> ArrayView1<'_, i64> {
        self.labels.view()
    }

    pub fn indices(&self) -> Option<ArrayView1<'_, i64>> {
        self.indices.as_ref().map(|i| i.view())
    }

    /// (height, width, channels)
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let (_, h, w, c) = self.images.dim();
        (h, w, c)
    }

    /// Normalized batch in channel-first layout [B, C, H, W]
    pub fn batch(&self, start: usize, end: usize, norm: &Normalization) -> Array4<f32> {
        let end = end.min(self.len());
        let start = start.min(end);
        let (h, w, c) = self.image_shape();

        Array4::from_shape_fn((end - start, c, h, w), |(i, ch, y, x)| {
            norm.apply(self.images[[start + i, y, x, ch]], ch)
        })
    }

    /// In-order batches of normalized images with their labels
    pub fn batches<'a>(
        &'a self,
        batch_size: usize,
        norm: &'a Normalization,
    ) -> impl Iterator<Item = (Array4<f32>, ArrayView1<'a, i64>)> + 'a {
        let batch_size = batch_size.max(1);
        let n = self.len();
        (0..n).step_by(batch_size).map(move |start| {
            let end = (start + batch_size).min(n);
            let labels = self.labels.slice(ndarray::s![start..end]);
            (self.batch(start, end, norm), labels)
        })
    }

    fn fingerprints(&self) -> Vec<[u8; 32]> {
        self.images
            .outer_iter()
            .map(|image| {
                let mut hasher = Sha256::new();
                for row in image.outer_iter() {
                    let bytes: Vec<u8> = row.iter().copied().collect();
                    hasher.update(&bytes);
                }
                hasher.finalize().into()
            })
            .collect()
    }
}

// ============================================================================
// PARTITION CHECK
// ============================================================================

/// How train and test partitions were compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapCheck {
    Indices,
    ImageContent,
}

/// Verify that train and test share no sample.
///
/// With `indices` on both sides an overlap is an error. Without them, samples are
/// compared by image content; identical images can legitimately occur in a sample
/// pool, so content matches are only counted and logged.
pub fn check_disjoint(
    shadow_id: u32,
    train: &ShadowDataset,
    test: &ShadowDataset,
) -> PipelineResult<(OverlapCheck, usize)> {
    if let (Some(train_idx), Some(test_idx)) = (train.indices(), test.indices()) {
        let seen: HashSet<i64> = train_idx.iter().copied().collect();
        let overlapping = test_idx.iter().filter(|i| seen.contains(i)).count();
        if overlapping > 0 {
            return Err(PipelineError::PartitionOverlap { shadow_id, overlapping });
        }
        return Ok((OverlapCheck::Indices, 0));
    }

    let seen: HashSet<[u8; 32]> = train.fingerprints().into_iter().collect();
    let overlapping = test
        .fingerprints()
        .iter()
        .filter(|f| seen.contains(*f))
        .count();
    if overlapping > 0 {
        log::warn!(
            "Shadow Model {}: {} test images also appear in the train set",
            shadow_id,
            overlapping
        );
    }
    Ok((OverlapCheck::ImageContent, overlapping))
}
