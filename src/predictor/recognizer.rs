//! The model-based glyph recognizer: preprocessing, CRNN, aggregation.

use crate::core::config::{ConfigValidator, RecognizerConfig};
use crate::core::device::parse_device;
use crate::core::errors::{OCRError, OcrResult};
use crate::domain::{ClassVocabulary, PredictionResult};
use crate::models::{CheckpointLoader, CheckpointReport, GlyphCrnn};
use crate::processors::{GlyphPreprocessor, ResultAggregator};
use candle_core::Device;
use image::{DynamicImage, GrayImage};
use std::sync::Arc;

/// Recognizes single glyphs with the CRNN.
///
/// Construction loads the class vocabulary, builds the network and restores
/// the checkpoint if there is one. After that the recognizer is read-only
/// apart from the one-time binding of the lazily shaped layer, so it can be
/// shared across threads.
#[derive(Debug)]
pub struct GlyphRecognizer {
    vocabulary: Arc<ClassVocabulary>,
    preprocessor: GlyphPreprocessor,
    model: GlyphCrnn,
    aggregator: ResultAggregator,
    checkpoint: Option<CheckpointReport>,
}

impl GlyphRecognizer {
    /// Builds a recognizer from configuration.
    ///
    /// # Errors
    ///
    /// `OCRError::VocabularyLoad` when the vocabulary file is missing or
    /// malformed, `OCRError::ConfigError` for invalid settings or devices.
    /// A missing checkpoint is not an error.
    pub fn from_config(config: &RecognizerConfig) -> OcrResult<Self> {
        config.validate()?;
        let vocabulary = Arc::new(ClassVocabulary::load(&config.vocabulary_path)?);
        let device = parse_device(&config.device)?;
        Self::with_vocabulary(config, vocabulary, device)
    }

    /// Builds a recognizer around an already loaded vocabulary.
    pub fn with_vocabulary(
        config: &RecognizerConfig,
        vocabulary: Arc<ClassVocabulary>,
        device: Device,
    ) -> OcrResult<Self> {
        let model = GlyphCrnn::new(config, vocabulary.len(), device)?;
        let checkpoint = match &config.checkpoint_path {
            Some(path) => CheckpointLoader.load_into(path, &model)?,
            None => {
                tracing::warn!("no checkpoint configured, using randomly initialized weights");
                None
            }
        };
        let preprocessor = GlyphPreprocessor::new(
            config.preprocess.clone(),
            config.input_width,
            config.input_height,
        );

        tracing::info!(
            classes = vocabulary.len(),
            width = config.input_width,
            height = config.input_height,
            restored = checkpoint.as_ref().map(|r| r.restored.len()).unwrap_or(0),
            "glyph recognizer ready"
        );
        Ok(Self {
            aggregator: ResultAggregator::new(Arc::clone(&vocabulary)),
            vocabulary,
            preprocessor,
            model,
            checkpoint,
        })
    }

    /// Normalizes an input image into the glyph the model consumes.
    pub fn preprocess(&self, image: &DynamicImage) -> OcrResult<GrayImage> {
        self.preprocessor.process(image)
    }

    pub fn predict(&self, image: &DynamicImage) -> OcrResult<PredictionResult> {
        let glyph = self.preprocess(image)?;
        self.predict_normalized(&glyph)
    }

    /// Predicts a glyph that already went through [`Self::preprocess`].
    pub fn predict_normalized(&self, glyph: &GrayImage) -> OcrResult<PredictionResult> {
        self.predict_batch(std::slice::from_ref(glyph))?
            .pop()
            .ok_or_else(|| OCRError::invalid_input("model returned no result for the glyph"))
    }

    /// Predicts preprocessed glyphs in a single forward pass.
    ///
    /// Each result carries the PNG encoding of its glyph.
    pub fn predict_batch(&self, glyphs: &[GrayImage]) -> OcrResult<Vec<PredictionResult>> {
        if glyphs.is_empty() {
            return Ok(Vec::new());
        }
        let input = self.preprocessor.to_tensor(glyphs, self.model.device())?;
        let logits = self.model.forward(&input)?;
        let results = self.aggregator.aggregate(&logits)?;
        if results.len() != glyphs.len() {
            return Err(OCRError::dimension_mismatch(
                "batch aggregation",
                glyphs.len(),
                results.len(),
            ));
        }

        results
            .into_iter()
            .zip(glyphs)
            .map(|(result, glyph)| {
                let png = GlyphPreprocessor::encode_png(glyph)?;
                Ok(result.with_preprocessed_image(png))
            })
            .collect()
    }

    pub fn vocabulary(&self) -> &Arc<ClassVocabulary> {
        &self.vocabulary
    }

    pub fn preprocessor(&self) -> &GlyphPreprocessor {
        &self.preprocessor
    }

    pub fn model(&self) -> &GlyphCrnn {
        &self.model
    }

    /// What the checkpoint restore did, if a checkpoint was read.
    pub fn checkpoint_report(&self) -> Option<&CheckpointReport> {
        self.checkpoint.as_ref()
    }
}
