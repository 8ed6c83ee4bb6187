//! Convolutional feature extractor.
//!
//! Seven convolution stages reduce a `(N, 1, H, W)` glyph to a
//! `(N, C, H/16 - 1, W/4 - 1)` feature map. Height is pooled aggressively,
//! width only twice, so enough horizontal resolution survives to be read as a
//! sequence. Parameter names follow the `cnn.<index>` layout of the trained
//! checkpoints.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Init, VarBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pool {
    /// 2x2 window, stride 2.
    Square,
    /// 2x1 window, stride (2, 1): halves height only.
    Tall,
}

impl Pool {
    fn apply(self, x: &Tensor) -> Result<Tensor> {
        match self {
            Pool::Square => x.max_pool2d_with_stride(2, 2),
            Pool::Tall => x.max_pool2d_with_stride((2, 1), (2, 1)),
        }
    }

    fn reduce(self, (h, w): (usize, usize)) -> (usize, usize) {
        match self {
            Pool::Square => (h / 2, w / 2),
            Pool::Tall => (h / 2, w),
        }
    }
}

/// Static description of one stage: checkpoint index, kernel, padding,
/// batch-norm presence and pooling.
struct StageSpec {
    index: usize,
    kernel: usize,
    padding: usize,
    batch_norm: bool,
    pool: Option<Pool>,
}

const STAGES: [StageSpec; 7] = [
    StageSpec { index: 0, kernel: 3, padding: 1, batch_norm: false, pool: Some(Pool::Square) },
    StageSpec { index: 3, kernel: 3, padding: 1, batch_norm: false, pool: Some(Pool::Square) },
    StageSpec { index: 6, kernel: 3, padding: 1, batch_norm: true, pool: None },
    StageSpec { index: 9, kernel: 3, padding: 1, batch_norm: false, pool: Some(Pool::Tall) },
    StageSpec { index: 12, kernel: 3, padding: 1, batch_norm: true, pool: None },
    StageSpec { index: 15, kernel: 3, padding: 1, batch_norm: false, pool: Some(Pool::Tall) },
    StageSpec { index: 18, kernel: 2, padding: 0, batch_norm: true, pool: None },
];

/// Inference-mode batch normalization from running statistics.
#[derive(Debug, Clone)]
struct BatchNorm {
    weight: Tensor,
    bias: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
    eps: f64,
}

impl BatchNorm {
    fn load(channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(channels, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(channels, "bias", Init::Const(0.0))?,
            running_mean: vb.get_with_hints(channels, "running_mean", Init::Const(0.0))?,
            running_var: vb.get_with_hints(channels, "running_var", Init::Const(1.0))?,
            eps: 1e-5,
        })
    }
}

impl Module for BatchNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // y = (x - mean) / sqrt(var + eps) * weight + bias
        let (_, c, _, _) = x.dims4()?;
        let mean = self.running_mean.reshape((1, c, 1, 1))?;
        let var = self.running_var.reshape((1, c, 1, 1))?;
        let weight = self.weight.reshape((1, c, 1, 1))?;
        let bias = self.bias.reshape((1, c, 1, 1))?;

        let std = (var + self.eps)?.sqrt()?;
        x.broadcast_sub(&mean)?
            .broadcast_div(&std)?
            .broadcast_mul(&weight)?
            .broadcast_add(&bias)
    }
}

#[derive(Debug, Clone)]
struct ConvStage {
    conv: Conv2d,
    norm: Option<BatchNorm>,
    pool: Option<Pool>,
}

impl Module for ConvStage {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = self.conv.forward(x)?;
        if let Some(norm) = &self.norm {
            x = norm.forward(&x)?;
        }
        let x = x.relu()?;
        match self.pool {
            Some(pool) => pool.apply(&x),
            None => Ok(x),
        }
    }
}

/// Shape of the feature map produced for a given input geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGeometry {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FeatureGeometry {
    /// Per-time-step feature size seen by the recurrent encoder.
    pub fn step_features(&self) -> usize {
        self.channels * self.height
    }
}

#[derive(Debug, Clone)]
pub struct SpatialFeatureExtractor {
    stages: Vec<ConvStage>,
    output_channels: usize,
}

impl SpatialFeatureExtractor {
    /// Builds the stages under `vb` (normally `vb.pp("cnn")`).
    pub fn load(channels: &[usize; 7], vb: VarBuilder) -> Result<Self> {
        let mut stages = Vec::with_capacity(STAGES.len());
        let mut in_channels = 1;
        for (layout, &out_channels) in STAGES.iter().zip(channels) {
            let cfg = Conv2dConfig {
                padding: layout.padding,
                ..Default::default()
            };
            let conv = candle_nn::conv2d(
                in_channels,
                out_channels,
                layout.kernel,
                cfg,
                vb.pp(layout.index),
            )?;
            let norm = if layout.batch_norm {
                Some(BatchNorm::load(out_channels, vb.pp(layout.index + 1))?)
            } else {
                None
            };
            stages.push(ConvStage {
                conv,
                norm,
                pool: layout.pool,
            });
            in_channels = out_channels;
        }
        Ok(Self {
            stages,
            output_channels: channels[6],
        })
    }

    /// Computes the feature-map geometry for an `height`x`width` input.
    ///
    /// Returns `None` when the input is too small to survive the poolings.
    pub fn output_geometry(&self, height: usize, width: usize) -> Option<FeatureGeometry> {
        let mut size = (height, width);
        for layout in &STAGES {
            // Convolution: out = in + 2 * padding - kernel + 1.
            let grow = 2 * layout.padding + 1;
            if size.0 + grow <= layout.kernel || size.1 + grow <= layout.kernel {
                return None;
            }
            size = (size.0 + grow - layout.kernel, size.1 + grow - layout.kernel);
            if let Some(pool) = layout.pool {
                size = pool.reduce(size);
            }
            if size.0 == 0 || size.1 == 0 {
                return None;
            }
        }
        Some(FeatureGeometry {
            channels: self.output_channels,
            height: size.0,
            width: size.1,
        })
    }
}

impl Module for SpatialFeatureExtractor {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = x.clone();
        for stage in &self.stages {
            x = stage.forward(&x)?;
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    const SMALL: [usize; 7] = [4, 8, 8, 8, 16, 16, 16];

    fn extractor(varmap: &VarMap) -> SpatialFeatureExtractor {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        SpatialFeatureExtractor::load(&SMALL, vb.pp("cnn")).unwrap()
    }

    #[test]
    fn test_geometry_matches_forward() {
        let varmap = VarMap::new();
        let ext = extractor(&varmap);
        let geometry = ext.output_geometry(64, 256).unwrap();
        assert_eq!(
            geometry,
            FeatureGeometry {
                channels: 16,
                height: 3,
                width: 63
            }
        );
        assert_eq!(geometry.step_features(), 48);

        let x = Tensor::zeros((2, 1, 64, 256), DType::F32, &Device::Cpu).unwrap();
        let y = ext.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 16, 3, 63]);
    }

    #[test]
    fn test_default_widths_give_1536_features() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ext = SpatialFeatureExtractor::load(
            &crate::core::constants::DEFAULT_EXTRACTOR_CHANNELS,
            vb.pp("cnn"),
        )
        .unwrap();
        assert_eq!(ext.output_geometry(64, 256).unwrap().step_features(), 1536);
    }

    #[test]
    fn test_too_small_input() {
        let varmap = VarMap::new();
        let ext = extractor(&varmap);
        assert!(ext.output_geometry(16, 256).is_none());
        assert!(ext.output_geometry(64, 4).is_none());
    }

    #[test]
    fn test_parameter_names_follow_checkpoint_layout() {
        let varmap = VarMap::new();
        let _ext = extractor(&varmap);
        let data = varmap.data().lock().unwrap();
        for name in [
            "cnn.0.weight",
            "cnn.0.bias",
            "cnn.7.running_var",
            "cnn.13.weight",
            "cnn.18.weight",
            "cnn.19.running_mean",
        ] {
            assert!(data.contains_key(name), "missing {name}");
        }
        assert_eq!(data["cnn.18.weight"].dims(), &[16, 16, 2, 2]);
    }
}
