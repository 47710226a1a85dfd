//! Tensor Archive - Named tensor files on disk
//!
//! Every artifact the pipeline reads or writes (checkpoints, sample sets,
//! attack data) is a safetensors file: named, typed, shaped tensors plus
//! optional string metadata.


use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};

use crate::logic::error::{ArtifactKind, PipelineError, PipelineResult};

// ============================================================================
// STORED TENSOR
// ============================================================================

#[derive(Debug, Clone)]
struct StoredTensor {
    dtype: Dtype,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl StoredTensor {
    fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

// ============================================================================
// READING
// ============================================================================

/// Loaded archive, tensors copied out of the file buffer
#[derive(Debug, Clone)]
pub struct TensorArchive {
    tensors: HashMap<String, StoredTensor>,
    metadata: HashMap<String, String>,
}

impl TensorArchive {
    /// Load an archive. A missing file is reported as `MissingArtifact` of `kind`.
    pub fn load(path: &Path, kind: ArtifactKind) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingArtifact {
                kind,
                path: path.to_path_buf(),
            });
        }

        let buffer = fs::read(path)?;
        Self::from_bytes(&buffer)
            .map_err(|e| PipelineError::Archive(format!("{}: {}", path.display(), e)))
    }

    pub fn from_bytes(buffer: &[u8]) -> PipelineResult<Self> {
        let (_, header) = SafeTensors::read_metadata(buffer)?;
        let metadata = header.metadata().clone().unwrap_or_default();

        let parsed = SafeTensors::deserialize(buffer)?;
        let tensors = parsed
            .tensors()
            .into_iter()
            .map(|(name, view)| {
                let stored = StoredTensor {
                    dtype: view.dtype(),
                    shape: view.shape().to_vec(),
                    data: view.data().to_vec(),
                };
                (name, stored)
            })
            .collect();

        Ok(Self { tensors, metadata })
    }

    pub fn has(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn shape(&self, name: &str) -> PipelineResult<&[usize]> {
        Ok(&self.get(name)?.shape)
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    fn get(&self, name: &str) -> PipelineResult<&StoredTensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| PipelineError::Archive(format!("tensor '{}' not found", name)))
    }

    pub fn array_f32(&self, name: &str) -> PipelineResult<ArrayD<f32>> {
        let tensor = self.get(name)?;
        let values: Vec<f32> = match tensor.dtype {
            Dtype::F32 => tensor
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            other => return Err(dtype_error(name, other, "F32")),
        };
        to_array(name, &tensor.shape, values)
    }

    pub fn array_f64(&self, name: &str) -> PipelineResult<ArrayD<f64>> {
        let tensor = self.get(name)?;
        let values: Vec<f64> = match tensor.dtype {
            Dtype::F64 => tensor
                .data
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes(le8(c)))
                .collect(),
            Dtype::F32 => tensor
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect(),
            other => return Err(dtype_error(name, other, "F64")),
        };
        to_array(name, &tensor.shape, values)
    }

    pub fn array_u8(&self, name: &str) -> PipelineResult<ArrayD<u8>> {
        let tensor = self.get(name)?;
        match tensor.dtype {
            Dtype::U8 => to_array(name, &tensor.shape, tensor.data.clone()),
            other => Err(dtype_error(name, other, "U8")),
        }
    }

    /// Integer tensor widened to i64 (accepts U8, I32, I64)
    pub fn array_i64(&self, name: &str) -> PipelineResult<ArrayD<i64>> {
        let tensor = self.get(name)?;
        let values: Vec<i64> = match tensor.dtype {
            Dtype::I64 => tensor
                .data
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes(le8(c)))
                .collect(),
            Dtype::I32 => tensor
                .data
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                .collect(),
            Dtype::U8 => tensor.data.iter().map(|&b| b as i64).collect(),
            other => return Err(dtype_error(name, other, "integer")),
        };
        to_array(name, &tensor.shape, values)
    }
}

fn le8(chunk: &[u8]) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(chunk);
    bytes
}

fn dtype_error(name: &str, actual: Dtype, expected: &str) -> PipelineError {
    PipelineError::Archive(format!(
        "tensor '{}' has dtype {:?}, expected {}",
        name, actual, expected
    ))
}

fn to_array<T>(name: &str, shape: &[usize], values: Vec<T>) -> PipelineResult<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|e| PipelineError::Shape(format!("tensor '{}': {}", name, e)))
}

// ============================================================================
// WRITING
// ============================================================================

/// Collects named tensors, then writes them as one archive
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    tensors: Vec<(String, StoredTensor)>,
    metadata: HashMap<String, String>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn put_f32<'a>(self, name: &str, shape: &[usize], values: impl IntoIterator<Item = &'a f32>) -> Self {
        let data = values.into_iter().flat_map(|v| v.to_le_bytes()).collect();
        self.put(name, Dtype::F32, shape, data)
    }

    pub fn put_f64<'a>(self, name: &str, shape: &[usize], values: impl IntoIterator<Item = &'a f64>) -> Self {
        let data = values.into_iter().flat_map(|v| v.to_le_bytes()).collect();
        self.put(name, Dtype::F64, shape, data)
    }

    pub fn put_i64<'a>(self, name: &str, shape: &[usize], values: impl IntoIterator<Item = &'a i64>) -> Self {
        let data = values.into_iter().flat_map(|v| v.to_le_bytes()).collect();
        self.put(name, Dtype::I64, shape, data)
    }

    pub fn put_u8<'a>(self, name: &str, shape: &[usize], values: impl IntoIterator<Item = &'a u8>) -> Self {
        let data = values.into_iter().copied().collect();
        self.put(name, Dtype::U8, shape, data)
    }

    fn put(mut self, name: &str, dtype: Dtype, shape: &[usize], data: Vec<u8>) -> Self {
        self.tensors.retain(|(existing, _)| existing != name);
        self.tensors.push((
            name.to_string(),
            StoredTensor {
                dtype,
                shape: shape.to_vec(),
                data,
            },
        ));
        self
    }

    /// Serialize to bytes (validates every tensor's byte length against its shape)
    pub fn to_bytes(&self) -> PipelineResult<Vec<u8>> {
        let views = self.views()?;
        Ok(safetensors::serialize(views, &self.metadata_option())?)
    }

    /// Write the archive, creating parent directories as needed
    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let views = self.views()?;
        safetensors::serialize_to_file(views, &self.metadata_option(), path)?;
        log::debug!("Wrote {} tensors to {}", self.tensors.len(), path.display());
        Ok(())
    }

    fn views(&self) -> PipelineResult<Vec<(&str, TensorView<'_>)>> {
        self.tensors
            .iter()
            .map(|(name, tensor)| {
                let expected = tensor.element_count() * tensor.dtype.size();
                if expected != tensor.data.len() {
                    return Err(PipelineError::Shape(format!(
                        "tensor '{}' has {} bytes, shape {:?} needs {}",
                        name,
                        tensor.data.len(),
                        tensor.shape,
                        expected
                    )));
                }
                let view = TensorView::new(tensor.dtype, tensor.shape.clone(), &tensor.data)?;
                Ok((name.as_str(), view))
            })
            .collect()
    }

    fn metadata_option(&self) -> Option<HashMap<String, String>> {
        if self.metadata.is_empty() {
            None
        } else {
            Some(self.metadata.clone())
        }
    }
}
