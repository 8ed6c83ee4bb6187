//! Recurrent sequence encoder.
//!
//! The feature map is read as a sequence along its width axis; each step is
//! the flattened `(channels x height)` column at that position. Two
//! bidirectional LSTMs are stacked over it.
//!
//! The first layer's input size depends on the input height and the
//! extractor's pooling, so it is built on the first forward pass from the
//! observed size and fixed from then on. [`LazyRecurrentLayer`] makes the two
//! states explicit and guards the transition: one caller binds, concurrent
//! callers wait on the lock and then reuse the bound layer. A later input of a
//! different size is rejected rather than truncated or padded.

use crate::core::errors::{OCRError, OcrResult, candle_to_ocr_inference};
use candle_core::{DType, Device, Result, Tensor};
use candle_nn::rnn::Direction;
use candle_nn::{LSTM, LSTMConfig, RNN, VarBuilder, VarMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

const MODEL_NAME: &str = "GlyphCrnn";

/// A bidirectional single-layer LSTM with PyTorch parameter names
/// (`weight_ih_l0`, `weight_ih_l0_reverse`, ...).
#[derive(Debug, Clone)]
pub struct BiLstm {
    forward: LSTM,
    backward: LSTM,
    input_dim: usize,
    hidden_dim: usize,
}

impl BiLstm {
    pub fn load(input_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let forward = candle_nn::lstm(input_dim, hidden_dim, LSTMConfig::default(), vb.clone())?;
        let backward = candle_nn::lstm(
            input_dim,
            hidden_dim,
            LSTMConfig {
                direction: Direction::Backward,
                ..Default::default()
            },
            vb,
        )?;
        Ok(Self {
            forward,
            backward,
            input_dim,
            hidden_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Maps `(batch, steps, input_dim)` to `(batch, steps, 2 * hidden_dim)`.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let steps = xs.dim(1)?;
        let forward_states = self.forward.seq(xs)?;
        let forward_out = self.forward.states_to_tensor(&forward_states)?;

        // The backward direction reads the sequence right to left.
        let reversed: Vec<u32> = (0..steps as u32).rev().collect();
        let reversed = Tensor::from_vec(reversed, steps, xs.device())?;
        let backward_states = self.backward.seq(&xs.index_select(&reversed, 1)?)?;
        let backward_out = self
            .backward
            .states_to_tensor(&backward_states)?
            .index_select(&reversed, 1)?;

        Tensor::cat(&[forward_out, backward_out], 2)
    }

    pub fn output_dim(&self) -> usize {
        2 * self.hidden_dim
    }
}

#[derive(Debug)]
enum LazyState {
    Uninitialized,
    Bound {
        layer: Arc<BiLstm>,
        expected_input_dim: usize,
    },
}

/// A [`BiLstm`] whose input size is fixed by its first use.
///
/// Parameters are created in the shared [`VarMap`] under `prefix` when the
/// layer binds, with fresh random initialization.
pub struct LazyRecurrentLayer {
    state: RwLock<LazyState>,
    prefix: String,
    hidden_dim: usize,
    varmap: VarMap,
    dtype: DType,
    device: Device,
    instantiations: AtomicUsize,
}

impl std::fmt::Debug for LazyRecurrentLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRecurrentLayer")
            .field("prefix", &self.prefix)
            .field("hidden_dim", &self.hidden_dim)
            .field("bound_input_dim", &self.bound_input_dim())
            .field("instantiations", &self.instantiations())
            .finish()
    }
}

impl LazyRecurrentLayer {
    pub fn new(
        prefix: impl Into<String>,
        hidden_dim: usize,
        varmap: VarMap,
        dtype: DType,
        device: Device,
    ) -> Self {
        Self {
            state: RwLock::new(LazyState::Uninitialized),
            prefix: prefix.into(),
            hidden_dim,
            varmap,
            dtype,
            device,
            instantiations: AtomicUsize::new(0),
        }
    }

    /// Returns the bound layer, binding it to `input_dim` on first use.
    ///
    /// # Errors
    ///
    /// `OCRError::DimensionMismatch` if the layer is already bound to a
    /// different input size.
    pub fn bind_or_get(&self, input_dim: usize) -> OcrResult<Arc<BiLstm>> {
        {
            let state = self.state.read().map_err(|_| self.poisoned())?;
            if let LazyState::Bound {
                layer,
                expected_input_dim,
            } = &*state
            {
                return self.check(layer, *expected_input_dim, input_dim);
            }
        }

        let mut state = self.state.write().map_err(|_| self.poisoned())?;
        // Another caller may have bound the layer while we waited.
        if let LazyState::Bound {
            layer,
            expected_input_dim,
        } = &*state
        {
            return self.check(layer, *expected_input_dim, input_dim);
        }

        let vb = VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device);
        let layer = BiLstm::load(input_dim, self.hidden_dim, vb.pp(&self.prefix))
            .map(Arc::new)
            .map_err(|e| {
                candle_to_ocr_inference(
                    MODEL_NAME,
                    format!("instantiate {} for input size {}", self.prefix, input_dim),
                    e,
                )
            })?;
        let count = self.instantiations.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            layer = %self.prefix,
            input_dim,
            hidden_dim = self.hidden_dim,
            instantiations = count,
            "bound lazily shaped recurrent layer"
        );
        *state = LazyState::Bound {
            layer: layer.clone(),
            expected_input_dim: input_dim,
        };
        Ok(layer)
    }

    fn check(&self, layer: &Arc<BiLstm>, expected: usize, actual: usize) -> OcrResult<Arc<BiLstm>> {
        if expected != actual {
            tracing::error!(
                layer = %self.prefix,
                expected,
                actual,
                "input size differs from the bound recurrent layer"
            );
            return Err(OCRError::dimension_mismatch(&self.prefix, expected, actual));
        }
        Ok(layer.clone())
    }

    fn poisoned(&self) -> OCRError {
        OCRError::inference_error(
            MODEL_NAME,
            format!("state lock of {} is poisoned", self.prefix),
            crate::core::errors::SimpleError::new("lock poisoned"),
        )
    }

    pub fn is_bound(&self) -> bool {
        self.bound_input_dim().is_some()
    }

    /// Input size the layer is bound to, if any.
    pub fn bound_input_dim(&self) -> Option<usize> {
        match &*self.state.read().ok()? {
            LazyState::Bound {
                expected_input_dim,
                ..
            } => Some(*expected_input_dim),
            LazyState::Uninitialized => None,
        }
    }

    /// How many times the layer has been built. Never exceeds one.
    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub fn output_dim(&self) -> usize {
        2 * self.hidden_dim
    }
}

/// Two stacked bidirectional LSTMs, the first one lazily shaped.
#[derive(Debug)]
pub struct SequenceEncoder {
    lstm1: LazyRecurrentLayer,
    lstm2: BiLstm,
}

impl SequenceEncoder {
    pub fn new(lstm1: LazyRecurrentLayer, lstm2: BiLstm) -> Self {
        Self { lstm1, lstm2 }
    }

    /// Encodes a `(batch, channels, height, width)` feature map into
    /// `(batch, width, 2 * hidden)` step features.
    pub fn forward(&self, features: &Tensor) -> OcrResult<Tensor> {
        let (batch, channels, height, width) = features
            .dims4()
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "feature map must be 4D", e))?;
        let input_dim = channels * height;

        let sequence = features
            .reshape((batch, input_dim, width))
            .and_then(|t| t.transpose(1, 2))
            .and_then(|t| t.contiguous())
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "reshape feature map", e))?;

        let lstm1 = self.lstm1.bind_or_get(input_dim)?;
        let hidden = lstm1
            .forward(&sequence)
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "first recurrent layer", e))?;
        self.lstm2
            .forward(&hidden)
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "second recurrent layer", e))
    }

    pub fn lazy_layer(&self) -> &LazyRecurrentLayer {
        &self.lstm1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn lazy(varmap: &VarMap) -> LazyRecurrentLayer {
        LazyRecurrentLayer::new("lstm1", 4, varmap.clone(), DType::F32, Device::Cpu)
    }

    #[test]
    fn test_binds_once() {
        let varmap = VarMap::new();
        let layer = lazy(&varmap);
        assert!(!layer.is_bound());
        assert_eq!(layer.instantiations(), 0);

        let first = layer.bind_or_get(12).unwrap();
        let second = layer.bind_or_get(12).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(layer.instantiations(), 1);
        assert_eq!(layer.bound_input_dim(), Some(12));
        assert!(varmap.data().lock().unwrap().contains_key("lstm1.weight_ih_l0_reverse"));
    }

    #[test]
    fn test_rejects_other_dimension() {
        let layer = lazy(&VarMap::new());
        layer.bind_or_get(12).unwrap();
        let err = layer.bind_or_get(20).unwrap_err();
        assert!(err.is_dimension_mismatch());
        assert_eq!(layer.instantiations(), 1);
        assert_eq!(layer.bound_input_dim(), Some(12));
    }

    #[test]
    fn test_concurrent_first_use_binds_once() {
        let layer = Arc::new(lazy(&VarMap::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let layer = layer.clone();
                thread::spawn(move || layer.bind_or_get(6).map(|l| l.input_dim()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 6);
        }
        assert_eq!(layer.instantiations(), 1);
    }

    #[test]
    fn test_bilstm_output_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let lstm = BiLstm::load(5, 3, vb.pp("lstm2")).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (2, 7, 5), &Device::Cpu).unwrap();
        let ys = lstm.forward(&xs).unwrap();
        assert_eq!(ys.dims(), &[2, 7, 6]);
    }

    #[test]
    fn test_encoder_forward() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = SequenceEncoder::new(
            lazy(&varmap),
            BiLstm::load(8, 4, vb.pp("lstm2")).unwrap(),
        );
        let features = Tensor::randn(0f32, 1.0, (1, 3, 2, 5), &Device::Cpu).unwrap();
        let out = encoder.forward(&features).unwrap();
        assert_eq!(out.dims(), &[1, 5, 8]);
        assert_eq!(encoder.lazy_layer().bound_input_dim(), Some(6));

        let taller = Tensor::randn(0f32, 1.0, (1, 3, 3, 5), &Device::Cpu).unwrap();
        assert!(encoder.forward(&taller).unwrap_err().is_dimension_mismatch());
    }
}
