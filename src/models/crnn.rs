//! The CRNN glyph classifier.

use super::encoder::{BiLstm, LazyRecurrentLayer, SequenceEncoder};
use super::extractor::{FeatureGeometry, SpatialFeatureExtractor};
use super::head::ClassificationHead;
use crate::core::config::RecognizerConfig;
use crate::core::constants::LAZY_LAYER_PREFIX;
use crate::core::errors::{OCRError, OcrResult, candle_to_ocr_inference};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{VarBuilder, VarMap};

const MODEL_NAME: &str = "GlyphCrnn";

/// Extractor, lazily shaped encoder and head over one parameter store.
///
/// All parameters live in a single [`VarMap`] so checkpoints can be merged
/// into it by name. The encoder's first layer only appears in that map after
/// the first forward pass.
pub struct GlyphCrnn {
    extractor: SpatialFeatureExtractor,
    encoder: SequenceEncoder,
    head: ClassificationHead,
    varmap: VarMap,
    device: Device,
}

impl std::fmt::Debug for GlyphCrnn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlyphCrnn")
            .field("extractor", &self.extractor)
            .field("encoder", &self.encoder)
            .field("head", &self.head)
            .field("parameters", &self.varmap.all_vars().len())
            .field("device", &self.device)
            .finish()
    }
}

impl GlyphCrnn {
    /// Builds a randomly initialized model for `num_classes` classes.
    pub fn new(config: &RecognizerConfig, num_classes: usize, device: Device) -> OcrResult<Self> {
        if num_classes == 0 {
            return Err(OCRError::invalid_input("model needs at least one class"));
        }
        let varmap = VarMap::new();
        let dtype = DType::F32;
        let vb = VarBuilder::from_varmap(&varmap, dtype, &device);
        let hidden = config.hidden_size;

        let extractor = SpatialFeatureExtractor::load(&config.extractor.channels, vb.pp("cnn"))
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "build feature extractor", e))?;
        let lstm1 = LazyRecurrentLayer::new(
            LAZY_LAYER_PREFIX,
            hidden,
            varmap.clone(),
            dtype,
            device.clone(),
        );
        let lstm2 = BiLstm::load(lstm1.output_dim(), hidden, vb.pp("lstm2"))
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "build second recurrent layer", e))?;
        let head = ClassificationHead::load(lstm2.output_dim(), num_classes, vb.pp("fc"))
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "build classification head", e))?;

        tracing::debug!(
            num_classes,
            hidden,
            channels = ?config.extractor.channels,
            "constructed CRNN"
        );
        Ok(Self {
            extractor,
            encoder: SequenceEncoder::new(lstm1, lstm2),
            head,
            varmap,
            device,
        })
    }

    /// Runs `(N, 1, H, W)` glyphs through the model, returning
    /// `(steps, N, num_classes)` logits.
    ///
    /// # Errors
    ///
    /// `OCRError::DimensionMismatch` if the input height yields a different
    /// step size than the one the lazy layer was bound with.
    pub fn forward(&self, input: &Tensor) -> OcrResult<Tensor> {
        let (_, channels, height, width) = input
            .dims4()
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "input must be (N, 1, H, W)", e))?;
        if channels != 1 {
            return Err(OCRError::invalid_input(format!(
                "expected single-channel glyphs, got {} channels",
                channels
            )));
        }
        if self.output_geometry(height, width).is_none() {
            return Err(OCRError::invalid_input(format!(
                "input of {}x{} is too small for the feature extractor",
                width, height
            )));
        }

        let features = self
            .extractor
            .forward(input)
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "feature extraction", e))?;
        let encoded = self.encoder.forward(&features)?;
        self.head
            .forward(&encoded)
            .map_err(|e| candle_to_ocr_inference(MODEL_NAME, "classification head", e))
    }

    pub fn output_geometry(&self, height: usize, width: usize) -> Option<FeatureGeometry> {
        self.extractor.output_geometry(height, width)
    }

    pub fn lazy_layer(&self) -> &LazyRecurrentLayer {
        self.encoder.lazy_layer()
    }

    /// The parameter store checkpoints are merged into.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }
}
