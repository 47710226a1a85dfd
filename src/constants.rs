//! Central Configuration Constants
//!
//! Single source of truth for all pipeline defaults.
//! Every value can be overridden through an environment variable (or `.env`).

use std::path::{Path, PathBuf};

/// First shadow model id processed by default
pub const DEFAULT_SHADOW_ID_START: u32 = 1;

/// Last shadow model id processed by default (inclusive)
pub const DEFAULT_SHADOW_ID_END: u32 = 30;

/// Inference batch size
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Share of the combined dataset held out for the attacker test set
pub const DEFAULT_TEST_FRACTION: f64 = 0.3;

/// Seed for the stratified split
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Per-channel normalization applied after scaling pixels to [0, 1]
pub const DEFAULT_NORMALIZE_MEAN: f32 = 0.5;
pub const DEFAULT_NORMALIZE_STD: f32 = 0.5;

/// Probability sum tolerance (same semantics as numpy `allclose`)
pub const SUM_RTOL: f32 = 1e-5;
pub const SUM_ATOL: f32 = 1e-8;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "shadow-attack-data";

// ============================================
// Artifact names
// ============================================

pub const MODEL_FILE_PREFIX: &str = "shadow_model_";
pub const TENSOR_FILE_EXT: &str = "safetensors";
pub const COMBINED_FILE_NAME: &str = "combined_attack_data.safetensors";
pub const CONFLICT_LOG_FILE_NAME: &str = "dedup_conflicts.jsonl";
pub const REPORT_FILE_NAME: &str = "extraction_report.json";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Base directory from environment or the local data dir
pub fn get_base_dir() -> PathBuf {
    std::env::var("MIA_BASE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME)
        })
}

/// Optional directory override (unset or empty means "derive from base dir")
pub fn get_dir_override(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Raw shadow id range, e.g. "1-30" or "7"
pub fn get_shadow_ids() -> Option<String> {
    std::env::var("MIA_SHADOW_IDS").ok()
}

pub fn get_batch_size() -> usize {
    std::env::var("MIA_BATCH_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_BATCH_SIZE)
}

pub fn get_test_fraction() -> f64 {
    std::env::var("MIA_TEST_FRACTION")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_TEST_FRACTION)
}

pub fn get_split_seed() -> u64 {
    std::env::var("MIA_SPLIT_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SPLIT_SEED)
}

/// Raw dedup precision, "exact" or a decimal count
pub fn get_dedup_precision() -> Option<String> {
    std::env::var("MIA_DEDUP_PRECISION").ok()
}

/// Check if the combine stage is enabled
pub fn is_combine_enabled() -> bool {
    std::env::var("MIA_COMBINE_ENABLED")
        .map(|s| s.to_lowercase() != "false" && s != "0")
        .unwrap_or(true)
}

/// Load a `.env` file into the process environment (the nearest one when
/// `path` is `None`). Existing variables win. Returns the file that was read.
pub fn load_dotenv(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(p) => dotenvy::from_path(p).ok().map(|_| p.to_path_buf()),
        None => dotenvy::dotenv().ok(),
    }
}
