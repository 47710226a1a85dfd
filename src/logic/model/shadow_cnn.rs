//! Shadow CNN - Native forward pass of the shadow classifier
//!
//! conv(3→32) → tanh → maxpool → conv(32→64) → tanh → maxpool → flatten
//! → linear(4096→128) → tanh → linear(128→10). Outputs raw logits.

use ndarray::{s, Array1, Array2, Array4, ArrayView2, ArrayView4, Axis};

use super::inference::Classifier;
use crate::logic::error::{PipelineError, PipelineResult};

// ============================================================================
// LAYERS
// ============================================================================

/// 2D convolution, stride 1, zero padding `kernel / 2` (output keeps H×W)
#[derive(Debug, Clone)]
pub struct Conv2d {
    /// [out, in, k, k]
    pub weight: Array4<f32>,
    /// [out]
    pub bias: Array1<f32>,
}

impl Conv2d {
    pub fn new(weight: Array4<f32>, bias: Array1<f32>) -> PipelineResult<Self> {
        let (out_c, _, kh, kw) = weight.dim();
        if kh != kw || kh % 2 == 0 {
            return Err(PipelineError::Shape(format!(
                "conv kernel must be square and odd, got {}x{}",
                kh, kw
            )));
        }
        if bias.len() != out_c {
            return Err(PipelineError::Shape(format!(
                "conv bias has {} entries for {} output channels",
                bias.len(),
                out_c
            )));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    pub fn forward(&self, input: ArrayView4<'_, f32>) -> PipelineResult<Array4<f32>> {
        let (batch, channels, height, width) = input.dim();
        if channels != self.in_channels() {
            return Err(PipelineError::Shape(format!(
                "conv expects {} input channels, got {}",
                self.in_channels(),
                channels
            )));
        }

        let (out_c, in_c, k, _) = self.weight.dim();
        let pad = (k / 2) as isize;
        let kernel = self
            .weight
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((out_c, in_c * k * k))?;
        let bias = self.bias.view().insert_axis(Axis(1));

        let mut output = Array4::<f32>::zeros((batch, out_c, height, width));
        let mut cols = Array2::<f32>::zeros((in_c * k * k, height * width));

        for n in 0..batch {
            // im2col: one column per output pixel
            cols.fill(0.0);
            for ci in 0..in_c {
                for ky in 0..k {
                    for kx in 0..k {
                        let row = (ci * k + ky) * k + kx;
                        for y in 0..height {
                            let iy = y as isize + ky as isize - pad;
                            if iy < 0 || iy >= height as isize {
                                continue;
                            }
                            for x in 0..width {
                                let ix = x as isize + kx as isize - pad;
                                if ix < 0 || ix >= width as isize {
                                    continue;
                                }
                                cols[[row, y * width + x]] = input[[n, ci, iy as usize, ix as usize]];
                            }
                        }
                    }
                }
            }

            let mut out = kernel.dot(&cols);
            out += &bias;
            let out = out.into_shape_with_order((out_c, height, width))?;
            output.slice_mut(s![n, .., .., ..]).assign(&out);
        }

        Ok(output)
    }
}

/// Fully connected layer, PyTorch weight layout [out, in]
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> PipelineResult<Self> {
        if bias.len() != weight.nrows() {
            return Err(PipelineError::Shape(format!(
                "linear bias has {} entries for {} outputs",
                bias.len(),
                weight.nrows()
            )));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, input: ArrayView2<'_, f32>) -> PipelineResult<Array2<f32>> {
        if input.ncols() != self.in_features() {
            return Err(PipelineError::Shape(format!(
                "linear expects {} features, got {}",
                self.in_features(),
                input.ncols()
            )));
        }
        Ok(input.dot(&self.weight.t()) + &self.bias)
    }
}

/// 2×2 max pooling, stride 2 (odd trailing rows/cols dropped)
pub fn max_pool2(input: ArrayView4<'_, f32>) -> Array4<f32> {
    let (batch, channels, height, width) = input.dim();
    Array4::from_shape_fn((batch, channels, height / 2, width / 2), |(n, c, y, x)| {
        let (y0, x0) = (y * 2, x * 2);
        input[[n, c, y0, x0]]
            .max(input[[n, c, y0, x0 + 1]])
            .max(input[[n, c, y0 + 1, x0]])
            .max(input[[n, c, y0 + 1, x0 + 1]])
    })
}

// ============================================================================
// MODEL
// ============================================================================

#[derive(Debug, Clone)]
pub struct ShadowCnn {
    pub conv1: Conv2d,
    pub conv2: Conv2d,
    pub fc1: Linear,
    pub fc2: Linear,
    input_shape: (usize, usize, usize),
}

impl ShadowCnn {
    /// Assemble the network for inputs of `input_shape` = (C, H, W), checking
    /// that consecutive layers agree.
    pub fn new(
        conv1: Conv2d,
        conv2: Conv2d,
        fc1: Linear,
        fc2: Linear,
        input_shape: (usize, usize, usize),
    ) -> PipelineResult<Self> {
        let (channels, height, width) = input_shape;
        if conv1.in_channels() != channels {
            return Err(PipelineError::Shape(format!(
                "first conv takes {} channels, images have {}",
                conv1.in_channels(),
                channels
            )));
        }
        if conv2.in_channels() != conv1.out_channels() {
            return Err(PipelineError::Shape(format!(
                "conv layers disagree: {} → {}",
                conv1.out_channels(),
                conv2.in_channels()
            )));
        }

        let flat = conv2.out_channels() * (height / 4) * (width / 4);
        if fc1.in_features() != flat {
            return Err(PipelineError::Shape(format!(
                "first linear layer takes {} features, flattened conv output has {}",
                fc1.in_features(),
                flat
            )));
        }
        if fc2.in_features() != fc1.out_features() {
            return Err(PipelineError::Shape(format!(
                "linear layers disagree: {} → {}",
                fc1.out_features(),
                fc2.in_features()
            )));
        }

        Ok(Self { conv1, conv2, fc1, fc2, input_shape })
    }
}

impl Classifier for ShadowCnn {
    fn num_classes(&self) -> usize {
        self.fc2.out_features()
    }

    fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    fn logits(&self, batch: ArrayView4<'_, f32>) -> PipelineResult<Array2<f32>> {
        let (_, c, h, w) = batch.dim();
        if (c, h, w) != self.input_shape {
            return Err(PipelineError::Shape(format!(
                "model expects input {:?}, got {:?}",
                self.input_shape,
                (c, h, w)
            )));
        }

        let x = self.conv1.forward(batch)?.mapv_into(f32::tanh);
        let x = max_pool2(x.view());
        let x = self.conv2.forward(x.view())?.mapv_into(f32::tanh);
        let x = max_pool2(x.view());

        let n = x.len_of(Axis(0));
        let flat = x.len() / n.max(1);
        let x = x.into_shape_with_order((n, flat))?;

        let x = self.fc1.forward(x.view())?.mapv_into(f32::tanh);
        self.fc2.forward(x.view())
    }
}
