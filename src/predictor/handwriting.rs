//! The top-level predictor.

use super::chain::{AttemptBoundary, ChainOutcome, FallbackChain};
use super::engine_strategy::EngineStrategy;
use super::model_strategy::ModelStrategy;
use super::recognizer::GlyphRecognizer;
use super::strategy::{GlyphRequest, RecognitionStrategy, StrategyKind, TierReport};
use super::substitute::{Clock, DeterministicSubstitute};
use crate::core::config::{ConfigValidator, FallbackConfig, PredictorConfig};
use crate::core::constants::DEFAULT_PARALLEL_THRESHOLD;
use crate::core::errors::OcrResult;
use crate::domain::{FallbackVocabulary, PredictionResult};
use crate::models::{OrtTextEngine, TextEngine};
use crate::utils::{decode_image_bytes, dynamic_to_gray, encode_png};
use image::{DynamicImage, GrayImage};
use rayon::prelude::*;
use std::sync::Arc;

/// Position of the model tier in the chain.
const MODEL_TIER: usize = 0;

/// A prediction together with what a caller needs to record it.
#[derive(Debug, Clone)]
pub struct RecognitionOutcome {
    pub prediction: PredictionResult,
    /// The decoded input in grayscale; absent when decoding failed.
    pub original: Option<GrayImage>,
    /// The glyph the model saw; absent when preprocessing failed.
    pub normalized: Option<GrayImage>,
    /// The tier that produced `prediction`.
    pub tier: StrategyKind,
    /// Tiers that were tried first and gave up.
    pub trail: Vec<TierReport>,
}

/// Recognizes handwritten glyphs, always answering with five candidates.
///
/// The CRNN is tried first, then the alternate text engine when one is
/// configured, then a substitute from the fallback vocabulary. Failures of
/// any tier are logged and recorded in the outcome's trail; none of them
/// reach the caller.
///
/// # Examples
///
/// ```rust,no_run
/// use handwrite_ocr::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PredictorConfig::from_json_file("config.json")?;
/// let predictor = HandwritingPredictor::from_config(&config)?;
/// let image = load_image(std::path::Path::new("glyph.png"))?;
/// let outcome = predictor.predict(&image);
/// println!("{} ({:.4})", outcome.prediction.result, outcome.prediction.confidence);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HandwritingPredictor {
    recognizer: Arc<GlyphRecognizer>,
    chain: FallbackChain,
    parallel_threshold: usize,
}

impl HandwritingPredictor {
    /// Builds the predictor and all of its tiers.
    ///
    /// # Errors
    ///
    /// Only an invalid configuration or an unreadable class vocabulary fail
    /// construction. An engine that cannot be loaded is logged and left out
    /// of the chain.
    pub fn from_config(config: &PredictorConfig) -> OcrResult<Self> {
        config.validate()?;
        let recognizer = Arc::new(GlyphRecognizer::from_config(&config.recognizer)?);
        let engine: Option<Arc<dyn TextEngine>> = match &config.engine {
            Some(engine_config) => match OrtTextEngine::new(engine_config) {
                Ok(engine) => Some(Arc::new(engine)),
                Err(e) => {
                    tracing::warn!(error = %e, "alternate text engine unavailable");
                    None
                }
            },
            None => {
                tracing::info!("no alternate text engine configured");
                None
            }
        };
        Self::from_parts(recognizer, engine, &config.fallback)
    }

    /// Builds the predictor around an existing recognizer and engine.
    pub fn from_parts(
        recognizer: Arc<GlyphRecognizer>,
        engine: Option<Arc<dyn TextEngine>>,
        fallback: &FallbackConfig,
    ) -> OcrResult<Self> {
        let pool = Arc::new(FallbackVocabulary::new(&fallback.vocabulary)?);
        Self::assemble(
            recognizer,
            engine,
            fallback,
            DeterministicSubstitute::new(Arc::clone(&pool)),
            pool,
        )
    }

    /// Like [`Self::from_parts`], with the substitute index taken from `clock`.
    pub fn with_clock(
        recognizer: Arc<GlyphRecognizer>,
        engine: Option<Arc<dyn TextEngine>>,
        fallback: &FallbackConfig,
        clock: Arc<dyn Clock>,
    ) -> OcrResult<Self> {
        let pool = Arc::new(FallbackVocabulary::new(&fallback.vocabulary)?);
        Self::assemble(
            recognizer,
            engine,
            fallback,
            DeterministicSubstitute::with_clock(Arc::clone(&pool), clock),
            pool,
        )
    }

    fn assemble(
        recognizer: Arc<GlyphRecognizer>,
        engine: Option<Arc<dyn TextEngine>>,
        fallback: &FallbackConfig,
        terminal: DeterministicSubstitute,
        pool: Arc<FallbackVocabulary>,
    ) -> OcrResult<Self> {
        fallback.validate()?;
        let mut strategies: Vec<Arc<dyn RecognitionStrategy>> =
            vec![Arc::new(ModelStrategy::new(Arc::clone(&recognizer)))];
        if let Some(engine) = engine {
            strategies.push(Arc::new(EngineStrategy::new(
                engine,
                recognizer.preprocessor().clone(),
                fallback.engine_params,
                pool,
            )));
        }
        let chain = FallbackChain::new(
            strategies,
            terminal,
            AttemptBoundary::from_millis(fallback.attempt_timeout_ms)
                .with_max_workers(fallback.max_attempt_workers),
        );
        tracing::debug!(tiers = ?chain.tiers(), "fallback chain assembled");
        Ok(Self {
            recognizer,
            chain,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        })
    }

    /// Sets the batch size above which fallbacks run on the rayon pool.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn recognizer(&self) -> &Arc<GlyphRecognizer> {
        &self.recognizer
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub fn predict(&self, image: &DynamicImage) -> RecognitionOutcome {
        let request = Arc::new(self.request_for(image));
        let outcome = self.chain.run(Arc::clone(&request));
        Self::finish(request, outcome)
    }

    /// Decodes and predicts an encoded image. Undecodable input falls through
    /// to the substitute.
    pub fn predict_bytes(&self, bytes: &[u8]) -> RecognitionOutcome {
        match decode_image_bytes(bytes) {
            Ok(image) => self.predict(&image),
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "cannot decode input image");
                let request = Arc::new(GlyphRequest::default());
                let outcome = self.chain.run(Arc::clone(&request));
                Self::finish(request, outcome)
            }
        }
    }

    /// Predicts several images with one batched model pass.
    ///
    /// Images whose model result is unusable, and every image when the
    /// batched pass fails, go through the rest of the chain on their own.
    pub fn predict_batch(&self, images: &[DynamicImage]) -> Vec<RecognitionOutcome> {
        let requests: Vec<Arc<GlyphRequest>> = if images.len() > self.parallel_threshold {
            images.par_iter().map(|img| Arc::new(self.request_for(img))).collect()
        } else {
            images.iter().map(|img| Arc::new(self.request_for(img))).collect()
        };

        let glyphs: Vec<GrayImage> = requests
            .iter()
            .filter_map(|r| r.normalized.clone())
            .collect();
        let batched = if glyphs.is_empty() {
            Ok(Vec::new())
        } else {
            let recognizer = Arc::clone(&self.recognizer);
            self.chain
                .boundary()
                .run("model_batch", move || recognizer.predict_batch(&glyphs))
        };
        let (mut model_results, batch_failure) = match batched {
            Ok(results) => (results.into_iter().map(Some).collect::<Vec<_>>(), None),
            Err(e) => {
                let report = FallbackChain::failure_report(StrategyKind::Model, &e);
                (Vec::new(), Some(report))
            }
        };
        tracing::debug!(
            images = images.len(),
            batched = model_results.len(),
            "batched model pass finished"
        );

        // Pair each request with its model result, if it had a normalized glyph.
        let mut next = 0;
        let paired: Vec<(Arc<GlyphRequest>, Option<PredictionResult>)> = requests
            .into_iter()
            .map(|request| {
                let result = if request.normalized.is_some() {
                    let result = model_results.get_mut(next).and_then(Option::take);
                    next += 1;
                    result
                } else {
                    None
                };
                (request, result)
            })
            .collect();

        let resolve = |(request, result): (Arc<GlyphRequest>, Option<PredictionResult>)| {
            let outcome = match (result, &batch_failure) {
                (Some(prediction), _) if prediction.check_invariants().is_ok() => ChainOutcome {
                    prediction,
                    tier: StrategyKind::Model,
                    trail: Vec::new(),
                },
                (_, Some(report)) if request.normalized.is_some() => {
                    self.chain
                        .run_from(Arc::clone(&request), vec![report.clone()], MODEL_TIER + 1)
                }
                _ => self.chain.run(Arc::clone(&request)),
            };
            Self::finish(request, outcome)
        };
        if paired.len() > self.parallel_threshold {
            paired.into_par_iter().map(resolve).collect()
        } else {
            paired.into_iter().map(resolve).collect()
        }
    }

    fn request_for(&self, image: &DynamicImage) -> GlyphRequest {
        let original = dynamic_to_gray(image);
        let normalized = match self.recognizer.preprocess(image) {
            Ok(glyph) => Some(glyph),
            Err(e) => {
                tracing::warn!(error = %e, "glyph preprocessing failed");
                None
            }
        };
        GlyphRequest::new(Some(original), normalized)
    }

    fn finish(request: Arc<GlyphRequest>, outcome: ChainOutcome) -> RecognitionOutcome {
        let mut prediction = outcome.prediction;
        if prediction.preprocessed_image.is_none()
            && let Some(glyph) = &request.normalized
        {
            match encode_png(glyph) {
                Ok(png) => prediction.preprocessed_image = Some(png),
                Err(e) => tracing::warn!(error = %e, "cannot encode normalized glyph"),
            }
        }
        // A timed-out attempt may still hold the request.
        let request = Arc::try_unwrap(request).unwrap_or_else(|shared| (*shared).clone());
        RecognitionOutcome {
            prediction,
            original: request.original,
            normalized: request.normalized,
            tier: outcome.tier,
            trail: outcome.trail,
        }
    }
}
