//! Checkpoint Loader - Shadow model weights from a state dict archive
//!
//! Tensor names follow the PyTorch state dict of the shadow model
//! (`conv_layers.N.*`, `fc_layers.N.*`).

use std::fs::File;
use std::path::Path;

use ndarray::{Ix1, Ix2, Ix4};
use sha2::{Digest, Sha256};

use super::shadow_cnn::{Conv2d, Linear, ShadowCnn};
use crate::logic::archive::{ArchiveWriter, TensorArchive};
use crate::logic::error::{ArtifactKind, PipelineError, PipelineResult};

pub const CONV1_WEIGHT: &str = "conv_layers.0.weight";
pub const CONV1_BIAS: &str = "conv_layers.0.bias";
pub const CONV2_WEIGHT: &str = "conv_layers.3.weight";
pub const CONV2_BIAS: &str = "conv_layers.3.bias";
pub const FC1_WEIGHT: &str = "fc_layers.1.weight";
pub const FC1_BIAS: &str = "fc_layers.1.bias";
pub const FC2_WEIGHT: &str = "fc_layers.3.weight";
pub const FC2_BIAS: &str = "fc_layers.3.bias";

#[derive(Debug, Clone)]
pub struct LoadedCheckpoint {
    pub model: ShadowCnn,
    /// Hex SHA-256 of the checkpoint file
    pub sha256: String,
}

/// Load a shadow model checkpoint for images of `image_hw` = (height, width).
/// A missing file is a `MissingArtifact` (the model gets skipped).
pub fn load_checkpoint(path: &Path, image_hw: (usize, usize)) -> PipelineResult<LoadedCheckpoint> {
    log::info!("Loading shadow model from: {}", path.display());
    let archive = TensorArchive::load(path, ArtifactKind::Checkpoint)?;

    let conv1 = Conv2d::new(
        archive.array_f32(CONV1_WEIGHT)?.into_dimensionality::<Ix4>()?,
        archive.array_f32(CONV1_BIAS)?.into_dimensionality::<Ix1>()?,
    )?;
    let conv2 = Conv2d::new(
        archive.array_f32(CONV2_WEIGHT)?.into_dimensionality::<Ix4>()?,
        archive.array_f32(CONV2_BIAS)?.into_dimensionality::<Ix1>()?,
    )?;
    let fc1 = Linear::new(
        archive.array_f32(FC1_WEIGHT)?.into_dimensionality::<Ix2>()?,
        archive.array_f32(FC1_BIAS)?.into_dimensionality::<Ix1>()?,
    )?;
    let fc2 = Linear::new(
        archive.array_f32(FC2_WEIGHT)?.into_dimensionality::<Ix2>()?,
        archive.array_f32(FC2_BIAS)?.into_dimensionality::<Ix1>()?,
    )?;

    let input_shape = (conv1.in_channels(), image_hw.0, image_hw.1);
    let model = ShadowCnn::new(conv1, conv2, fc1, fc2, input_shape)
        .map_err(|e| PipelineError::Shape(format!("{}: {}", path.display(), e)))?;

    let sha256 = compute_file_hash(path)?;
    log::debug!("Checkpoint {} sha256 {}", path.display(), sha256);

    Ok(LoadedCheckpoint { model, sha256 })
}

/// Write a model back out under the state dict names
pub fn save_checkpoint(model: &ShadowCnn, path: &Path) -> PipelineResult<()> {
    ArchiveWriter::new()
        .put_f32(CONV1_WEIGHT, model.conv1.weight.shape(), model.conv1.weight.iter())
        .put_f32(CONV1_BIAS, model.conv1.bias.shape(), model.conv1.bias.iter())
        .put_f32(CONV2_WEIGHT, model.conv2.weight.shape(), model.conv2.weight.iter())
        .put_f32(CONV2_BIAS, model.conv2.bias.shape(), model.conv2.bias.iter())
        .put_f32(FC1_WEIGHT, model.fc1.weight.shape(), model.fc1.weight.iter())
        .put_f32(FC1_BIAS, model.fc1.bias.shape(), model.fc1.bias.iter())
        .put_f32(FC2_WEIGHT, model.fc2.weight.shape(), model.fc2.weight.iter())
        .put_f32(FC2_BIAS, model.fc2.bias.shape(), model.fc2.bias.iter())
        .save(path)
}

/// Compute SHA256 hash of file
fn compute_file_hash(path: &Path) -> Result<String, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
