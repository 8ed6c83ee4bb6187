//! The first tier: the CRNN recognizer.

use super::recognizer::GlyphRecognizer;
use super::strategy::{GlyphRequest, RecognitionStrategy, StrategyKind, TierReport};
use crate::core::errors::{OCRError, OcrResult};
use crate::domain::PredictionResult;
use std::sync::Arc;

/// Runs the normalized glyph through [`GlyphRecognizer`].
#[derive(Debug, Clone)]
pub struct ModelStrategy {
    recognizer: Arc<GlyphRecognizer>,
}

impl ModelStrategy {
    pub fn new(recognizer: Arc<GlyphRecognizer>) -> Self {
        Self { recognizer }
    }
}

impl RecognitionStrategy for ModelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Model
    }

    fn is_available(&self, request: &GlyphRequest) -> bool {
        request.normalized.is_some()
    }

    fn attempt(
        &self,
        request: &GlyphRequest,
        _trail: &[TierReport],
    ) -> OcrResult<Option<PredictionResult>> {
        let glyph = request
            .normalized
            .as_ref()
            .ok_or_else(|| OCRError::invalid_input("request carries no normalized glyph"))?;
        self.recognizer.predict_normalized(glyph).map(Some)
    }
}
