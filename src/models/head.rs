//! Linear classification head.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

/// Projects each encoder step onto class logits.
#[derive(Debug, Clone)]
pub struct ClassificationHead {
    fc: Linear,
    num_classes: usize,
}

impl ClassificationHead {
    pub fn load(input_dim: usize, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let fc = candle_nn::linear(input_dim, num_classes, vb)?;
        Ok(Self { fc, num_classes })
    }

    /// Maps `(batch, steps, input_dim)` to `(steps, batch, num_classes)`.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.fc.forward(xs)?.transpose(0, 1)?.contiguous()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}
