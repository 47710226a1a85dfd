//! Inference Engine - Probability extraction
//!
//! Runs a classifier over a sample set, turns logits into softmax
//! probabilities and labels every row with the set's membership.

use ndarray::{Array1, Array2, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use crate::constants::{SUM_ATOL, SUM_RTOL};
use crate::logic::dataset::{AttackData, Membership, Normalization, ShadowDataset};
use crate::logic::error::{PipelineError, PipelineResult};

// ============================================================================
// CLASSIFIER TRAIT
// ============================================================================

/// Trait for inference backends producing raw class scores
pub trait Classifier {
    fn num_classes(&self) -> usize;

    /// Expected input as (channels, height, width)
    fn input_shape(&self) -> (usize, usize, usize);

    /// Raw scores [B, K] for a normalized batch [B, C, H, W]
    fn logits(&self, batch: ArrayView4<'_, f32>) -> PipelineResult<Array2<f32>>;
}

// ============================================================================
// SOFTMAX
// ============================================================================

/// Row-wise softmax, shifted by the row max for stability
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probs
}

/// Allowed deviation of a probability row sum from 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SumTolerance {
    pub rtol: f32,
    pub atol: f32,
}

impl Default for SumTolerance {
    fn default() -> Self {
        Self { rtol: SUM_RTOL, atol: SUM_ATOL }
    }
}

impl SumTolerance {
    pub fn accepts(&self, sum: f32) -> bool {
        (sum - 1.0).abs() <= self.atol + self.rtol
    }
}

/// Every row must be finite and sum to 1 within tolerance.
/// `row_offset` shifts reported row numbers to dataset positions.
pub fn check_probability_sums(
    probs: &Array2<f32>,
    tolerance: SumTolerance,
    row_offset: usize,
) -> PipelineResult<()> {
    for (i, row) in probs.axis_iter(Axis(0)).enumerate() {
        if row.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::NonFiniteOutput { row: row_offset + i });
        }
        let sum = row.sum();
        if !tolerance.accepts(sum) {
            return Err(PipelineError::ProbabilitySum { row: row_offset + i, sum });
        }
    }
    Ok(())
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Inference settings shared by extraction and evaluation
#[derive(Debug, Clone)]
pub struct InferenceOptions<'a> {
    pub batch_size: usize,
    pub normalization: &'a Normalization,
    pub tolerance: SumTolerance,
}

fn check_input<C: Classifier + ?Sized>(model: &C, dataset: &ShadowDataset) -> PipelineResult<()> {
    let (h, w, c) = dataset.image_shape();
    if model.input_shape() != (c, h, w) {
        return Err(PipelineError::Shape(format!(
            "model expects {:?} inputs, dataset images are {:?}",
            model.input_shape(),
            (c, h, w)
        )));
    }
    Ok(())
}

/// Softmax outputs for every sample, labelled with `membership`
pub fn extract_outputs<C: Classifier + ?Sized>(
    model: &C,
    dataset: &ShadowDataset,
    membership: Membership,
    options: &InferenceOptions<'_>,
) -> PipelineResult<AttackData> {
    check_input(model, dataset)?;
    let num_classes = model.num_classes();
    let mut probabilities = Array2::<f32>::zeros((dataset.len(), num_classes));
    let mut offset = 0;

    for (inputs, _) in dataset.batches(options.batch_size, options.normalization) {
        let logits = model.logits(inputs.view())?;
        if logits.dim() != (inputs.len_of(Axis(0)), num_classes) {
            return Err(PipelineError::Shape(format!(
                "model returned {:?} logits for a batch of {}",
                logits.dim(),
                inputs.len_of(Axis(0))
            )));
        }

        let probs = softmax_rows(&logits);
        check_probability_sums(&probs, options.tolerance, offset)?;

        let rows = probs.nrows();
        probabilities
            .slice_mut(ndarray::s![offset..offset + rows, ..])
            .assign(&probs);
        offset += rows;
    }

    AttackData::new(
        probabilities,
        dataset.labels().to_owned(),
        Array1::from_elem(dataset.len(), membership.flag()),
    )
}

/// Top-1 accuracy in percent
pub fn evaluate_accuracy<C: Classifier + ?Sized>(
    model: &C,
    dataset: &ShadowDataset,
    options: &InferenceOptions<'_>,
) -> PipelineResult<f64> {
    check_input(model, dataset)?;
    if dataset.is_empty() {
        log::warn!("Evaluation set is empty, accuracy undefined");
        return Ok(0.0);
    }

    let mut correct = 0usize;
    for (inputs, labels) in dataset.batches(options.batch_size, options.normalization) {
        let logits = model.logits(inputs.view())?;
        for (row, &label) in logits.axis_iter(Axis(0)).zip(labels.iter()) {
            if argmax(row.iter().copied()) == Some(label as usize) {
                correct += 1;
            }
        }
    }

    let accuracy = correct as f64 / dataset.len() as f64 * 100.0;
    log::info!("Test Accuracy: {:.2}%", accuracy);
    Ok(accuracy)
}

fn argmax(values: impl Iterator<Item = f32>) -> Option<usize> {
    values
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
