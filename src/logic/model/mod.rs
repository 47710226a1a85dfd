//! Model Module - Shadow model inference
//!
//! Loads shadow model checkpoints and turns their outputs into
//! probability vectors. The `Classifier` trait is the only seam between
//! the network and the extraction logic.

pub mod checkpoint;
pub mod inference;
pub mod shadow_cnn;


// Re-export common types
pub use checkpoint::{load_checkpoint, save_checkpoint, LoadedCheckpoint};
pub use inference::{
    check_probability_sums, evaluate_accuracy, extract_outputs, softmax_rows, Classifier,
    InferenceOptions, SumTolerance,
};
pub use shadow_cnn::{Conv2d, Linear, ShadowCnn};
