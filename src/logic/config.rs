//! Pipeline Configuration
//!
//! Explicit configuration passed into every stage. Paths for each artifact
//! are derived here so no other module hard-codes the directory layout.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use crate::constants::{self, MODEL_FILE_PREFIX, TENSOR_FILE_EXT};
use crate::logic::dataset::dedup::KeyPrecision;
use crate::logic::dataset::loader::Normalization;
use crate::logic::error::{PipelineError, PipelineResult};
use crate::logic::model::inference::SumTolerance;

/// Application configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Per-shadow-model train/test sample archives
    pub shadow_data_dir: PathBuf,

    /// Shadow model checkpoints
    pub model_dir: PathBuf,

    /// Attack data output (per-model archives, combined archive, report)
    pub output_dir: PathBuf,

    /// Shadow model ids to process (inclusive)
    pub shadow_ids: RangeInclusive<u32>,

    pub batch_size: usize,

    /// Attacker test share for the stratified split
    pub test_fraction: f64,

    pub split_seed: u64,

    pub dedup_precision: KeyPrecision,

    pub normalization: Normalization,

    pub sum_tolerance: SumTolerance,

    /// Run the combine stage after extraction
    pub combine: bool,
}

impl PipelineConfig {
    /// Defaults rooted at `base_dir`
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref();
        Self {
            shadow_data_dir: base_dir.join("shadow_data"),
            model_dir: base_dir.join("models"),
            output_dir: base_dir.join("attack_data"),
            shadow_ids: constants::DEFAULT_SHADOW_ID_START..=constants::DEFAULT_SHADOW_ID_END,
            batch_size: constants::DEFAULT_BATCH_SIZE,
            test_fraction: constants::DEFAULT_TEST_FRACTION,
            split_seed: constants::DEFAULT_SPLIT_SEED,
            dedup_precision: KeyPrecision::default(),
            normalization: Normalization::default(),
            sum_tolerance: SumTolerance::default(),
            combine: true,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> PipelineResult<Self> {
        let mut config = Self::new(constants::get_base_dir());

        if let Some(dir) = constants::get_dir_override("MIA_SHADOW_DATA_DIR") {
            config.shadow_data_dir = dir;
        }
        if let Some(dir) = constants::get_dir_override("MIA_MODEL_DIR") {
            config.model_dir = dir;
        }
        if let Some(dir) = constants::get_dir_override("MIA_OUTPUT_DIR") {
            config.output_dir = dir;
        }
        if let Some(raw) = constants::get_shadow_ids() {
            config.shadow_ids = parse_id_range(&raw)?;
        }
        if let Some(raw) = constants::get_dedup_precision() {
            config.dedup_precision = raw.parse()?;
        }

        config.batch_size = constants::get_batch_size();
        config.test_fraction = constants::get_test_fraction();
        config.split_seed = constants::get_split_seed();
        config.combine = constants::is_combine_enabled();

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch size must be positive".into()));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(PipelineError::Config(format!(
                "test fraction must lie in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.shadow_ids.is_empty() {
            return Err(PipelineError::Config(format!(
                "empty shadow id range {}-{}",
                self.shadow_ids.start(),
                self.shadow_ids.end()
            )));
        }
        if self.normalization.std.iter().any(|s| *s == 0.0) {
            return Err(PipelineError::Config("normalization std must be non-zero".into()));
        }
        Ok(())
    }

    // ========================================================================
    // ARTIFACT PATHS
    // ========================================================================

    pub fn model_path(&self, shadow_id: u32) -> PathBuf {
        self.model_dir
            .join(format!("{MODEL_FILE_PREFIX}{shadow_id}.{TENSOR_FILE_EXT}"))
    }

    pub fn train_data_path(&self, shadow_id: u32) -> PathBuf {
        self.shadow_data_dir
            .join(format!("{MODEL_FILE_PREFIX}{shadow_id}"))
            .join("train")
            .join(format!("train_data.{TENSOR_FILE_EXT}"))
    }

    pub fn test_data_path(&self, shadow_id: u32) -> PathBuf {
        self.shadow_data_dir
            .join(format!("{MODEL_FILE_PREFIX}{shadow_id}"))
            .join("test")
            .join(format!("test_data.{TENSOR_FILE_EXT}"))
    }

    pub fn attack_data_path(&self, shadow_id: u32) -> PathBuf {
        self.output_dir
            .join(format!("{MODEL_FILE_PREFIX}{shadow_id}_attack_data.{TENSOR_FILE_EXT}"))
    }

    pub fn combined_path(&self) -> PathBuf {
        self.output_dir.join(constants::COMBINED_FILE_NAME)
    }

    pub fn conflict_log_path(&self) -> PathBuf {
        self.output_dir.join(constants::CONFLICT_LOG_FILE_NAME)
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(constants::REPORT_FILE_NAME)
    }
}

/// Parse "1-30" or "7" into an inclusive id range
pub fn parse_id_range(raw: &str) -> PipelineResult<RangeInclusive<u32>> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| PipelineError::Config(format!("invalid shadow id '{}'", s.trim())))
    };

    let range = match raw.split_once('-') {
        Some((start, end)) => parse(start)?..=parse(end)?,
        None => {
            let id = parse(raw)?;
            id..=id
        }
    };

    if range.is_empty() {
        return Err(PipelineError::Config(format!("empty shadow id range '{}'", raw)));
    }
    Ok(range)
}
