//! The second tier: the alternate text engine.

use super::strategy::{GlyphRequest, RecognitionStrategy, StrategyKind, TierReport};
use super::substitute::pad_candidates;
use crate::core::config::EngineParams;
use crate::core::constants::{
    ENGINE_CANDIDATE_DECAY, ENGINE_DEFAULT_CONFIDENCE, ENGINE_EXTRA_CANDIDATES, ENGINE_PAD_BASE,
    ENGINE_PAD_DECAY,
};
use crate::core::errors::OcrResult;
use crate::domain::{FallbackVocabulary, PredictionCandidate, PredictionResult};
use crate::models::{TextDetection, TextEngine};
use crate::processors::GlyphPreprocessor;
use std::sync::Arc;

/// Asks a [`TextEngine`] to read the original glyph and turns the first text
/// it reports into a candidate list.
///
/// The first character of the text is the answer. Up to
/// [`ENGINE_EXTRA_CANDIDATES`] following characters become runner-up
/// candidates, each [`ENGINE_CANDIDATE_DECAY`] less confident than the one
/// before. The rest is padded from the fallback vocabulary.
pub struct EngineStrategy {
    engine: Arc<dyn TextEngine>,
    preprocessor: GlyphPreprocessor,
    params: EngineParams,
    pool: Arc<FallbackVocabulary>,
}

impl std::fmt::Debug for EngineStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineStrategy")
            .field("engine", &self.engine.name())
            .field("params", &self.params)
            .finish()
    }
}

impl EngineStrategy {
    pub fn new(
        engine: Arc<dyn TextEngine>,
        preprocessor: GlyphPreprocessor,
        params: EngineParams,
        pool: Arc<FallbackVocabulary>,
    ) -> Self {
        Self {
            engine,
            preprocessor,
            params,
            pool,
        }
    }

    /// Ranked candidates from the first detection with visible text.
    fn candidates_from(detections: &[TextDetection]) -> Option<Vec<PredictionCandidate>> {
        let (detection, text) = detections.iter().find_map(|d| {
            let text = d.text.trim();
            (!text.is_empty()).then_some((d, text))
        })?;
        let confidence = detection
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(ENGINE_DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);

        let mut chars = text.chars();
        let first = chars.next()?;
        let mut candidates = vec![PredictionCandidate::new(first, confidence)];
        for (position, glyph) in chars.take(ENGINE_EXTRA_CANDIDATES).enumerate() {
            if glyph.is_whitespace() || candidates.iter().any(|c| c.glyph == glyph) {
                continue;
            }
            let decayed = (confidence - ENGINE_CANDIDATE_DECAY * (position + 1) as f32).max(0.0);
            candidates.push(PredictionCandidate::new(glyph, decayed));
        }
        Some(candidates)
    }
}

impl RecognitionStrategy for EngineStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AlternateEngine
    }

    fn is_available(&self, request: &GlyphRequest) -> bool {
        request.original.is_some()
    }

    fn attempt(
        &self,
        request: &GlyphRequest,
        _trail: &[TierReport],
    ) -> OcrResult<Option<PredictionResult>> {
        let Some(original) = &request.original else {
            return Ok(None);
        };
        // The engine reads the enhanced original, not the normalized glyph.
        let enhanced = self.preprocessor.enhance_for_engine(original);
        let detections = self.engine.read_text(&enhanced, &self.params)?;
        tracing::debug!(
            engine = self.engine.name(),
            texts = ?detections.iter().map(|d| d.text.as_str()).collect::<Vec<_>>(),
            "alternate engine finished"
        );

        let Some(mut candidates) = Self::candidates_from(&detections) else {
            return Ok(None);
        };
        pad_candidates(&mut candidates, &self.pool, &mut rand::thread_rng(), |len| {
            ENGINE_PAD_BASE - ENGINE_PAD_DECAY * len as f32
        });
        PredictionResult::from_candidates(candidates).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PreprocessConfig;
    use crate::core::constants::CANDIDATE_COUNT;
    use crate::core::errors::OCRError;
    use image::{GrayImage, Luma};
    use std::sync::Mutex;

    struct FixedEngine {
        detections: Vec<TextDetection>,
        seen: Mutex<Option<(u32, u32)>>,
    }

    impl FixedEngine {
        fn new(texts: &[(&str, Option<f32>)]) -> Arc<Self> {
            Arc::new(Self {
                detections: texts
                    .iter()
                    .map(|(text, confidence)| TextDetection {
                        bounding_box: None,
                        text: text.to_string(),
                        confidence: *confidence,
                    })
                    .collect(),
                seen: Mutex::new(None),
            })
        }
    }

    impl TextEngine for FixedEngine {
        fn name(&self) -> &str {
            "fixed"
        }

        fn read_text(&self, image: &GrayImage, _params: &EngineParams) -> OcrResult<Vec<TextDetection>> {
            *self.seen.lock().unwrap() = Some(image.dimensions());
            Ok(self.detections.clone())
        }
    }

    struct BrokenEngine;

    impl TextEngine for BrokenEngine {
        fn name(&self) -> &str {
            "broken"
        }

        fn read_text(&self, _image: &GrayImage, _params: &EngineParams) -> OcrResult<Vec<TextDetection>> {
            Err(OCRError::invalid_input("engine exploded"))
        }
    }

    fn strategy(engine: Arc<dyn TextEngine>) -> EngineStrategy {
        EngineStrategy::new(
            engine,
            GlyphPreprocessor::new(PreprocessConfig::default(), 256, 64),
            EngineParams::default(),
            Arc::new(FallbackVocabulary::default()),
        )
    }

    fn request() -> GlyphRequest {
        GlyphRequest::new(Some(GrayImage::from_pixel(40, 30, Luma([200]))), None)
    }

    #[test]
    fn test_two_character_text() {
        let result = strategy(FixedEngine::new(&[("一二", Some(0.9))]))
            .attempt(&request(), &[])
            .unwrap()
            .unwrap();
        assert_eq!(result.result, '一');
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.candidates[1], PredictionCandidate::new('二', 0.85));
        let padded: Vec<f32> = result.candidates[2..].iter().map(|c| c.confidence).collect();
        assert_eq!(padded, vec![0.66, 0.64, 0.62]);
        assert!(
            result.candidates[2..]
                .iter()
                .all(|c| c.glyph != '一' && c.glyph != '二')
        );
        assert!(result.check_invariants().is_ok());
    }

    #[test]
    fn test_extra_characters_are_capped() {
        let result = strategy(FixedEngine::new(&[("天地玄黄宇宙", Some(0.8))]))
            .attempt(&request(), &[])
            .unwrap()
            .unwrap();
        let glyphs: String = result.candidates.iter().map(|c| c.glyph).collect();
        assert!(glyphs.starts_with("天地玄黄"));
        assert_eq!(result.candidates[3].confidence, 0.65);
        assert_eq!(result.candidates[4].confidence, 0.62);
    }

    #[test]
    fn test_first_visible_text_wins() {
        let result = strategy(FixedEngine::new(&[("  ", Some(0.99)), (" 好", None)]))
            .attempt(&request(), &[])
            .unwrap()
            .unwrap();
        assert_eq!(result.result, '好');
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.candidates.len(), CANDIDATE_COUNT);
    }

    #[test]
    fn test_repeated_characters_are_skipped() {
        let candidates = EngineStrategy::candidates_from(&[TextDetection {
            bounding_box: None,
            text: "好好的".to_string(),
            confidence: Some(0.9),
        }])
        .unwrap();
        let glyphs: Vec<char> = candidates.iter().map(|c| c.glyph).collect();
        assert_eq!(glyphs, vec!['好', '的']);
        assert!((candidates[1].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_no_text_is_empty() {
        let outcome = strategy(FixedEngine::new(&[])).attempt(&request(), &[]).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn test_engine_sees_enhanced_image() {
        let engine = FixedEngine::new(&[]);
        strategy(engine.clone()).attempt(&request(), &[]).unwrap();
        assert_eq!(*engine.seen.lock().unwrap(), Some((80, 60)));
    }

    #[test]
    fn test_errors_propagate() {
        assert!(strategy(Arc::new(BrokenEngine)).attempt(&request(), &[]).is_err());
    }

    #[test]
    fn test_requires_original_image() {
        let strategy = strategy(FixedEngine::new(&[("一", Some(0.9))]));
        assert!(!strategy.is_available(&GlyphRequest::default()));
        assert!(strategy.is_available(&request()));
    }
}
