//! Error handling

use std::path::PathBuf;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Which artifact a shadow model was missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Checkpoint,
    TrainData,
    TestData,
    AttackData,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactKind::Checkpoint => "checkpoint",
            ArtifactKind::TrainData => "train data",
            ArtifactKind::TestData => "test data",
            ArtifactKind::AttackData => "attack data",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // Artifact errors (recoverable: the shadow model is skipped)
    #[error("Missing {kind}: {}", path.display())]
    MissingArtifact { kind: ArtifactKind, path: PathBuf },

    #[error("Shadow model {shadow_id}: {overlapping} samples appear in both train and test")]
    PartitionOverlap { shadow_id: u32, overlapping: usize },

    // Invariant violations (fatal)
    #[error("Probabilities do not sum up to 1 (row {row}, sum {sum})")]
    ProbabilitySum { row: usize, sum: f32 },

    #[error("Non-finite model output in row {row}")]
    NonFiniteOutput { row: usize },

    // Data errors
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Errors after which the run continues with the next shadow model
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingArtifact { .. } | PipelineError::PartitionOverlap { .. }
        )
    }
}

impl From<safetensors::SafeTensorError> for PipelineError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        PipelineError::Archive(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PipelineError {
    fn from(err: ndarray::ShapeError) -> Self {
        PipelineError::Shape(err.to_string())
    }
}
