//! Collapsing per-step class logits into a ranked candidate list.
//!
//! The aggregator represents the whole glyph by the **last** time step of the
//! sequence. Earlier steps are ignored.

use crate::core::constants::CANDIDATE_COUNT;
use crate::core::errors::{OCRError, OcrResult, ProcessingStage, SimpleError, candle_to_ocr_processing};
use crate::domain::{ClassVocabulary, PredictionCandidate, PredictionResult};
use candle_core::{IndexOp, Tensor};
use std::sync::Arc;

/// Numerically stable softmax over one logit vector.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Returns the `k` highest scores as `(index, score)` pairs.
///
/// Sorted by descending score; equal scores keep the lower index first.
pub fn top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

/// Turns classification-head output into prediction results.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    vocabulary: Arc<ClassVocabulary>,
}

impl ResultAggregator {
    pub fn new(vocabulary: Arc<ClassVocabulary>) -> Self {
        Self { vocabulary }
    }

    /// Aggregates a `(steps, batch, classes)` logit tensor into one result per batch item.
    pub fn aggregate(&self, logits: &Tensor) -> OcrResult<Vec<PredictionResult>> {
        let (steps, _batch, classes) = logits.dims3().map_err(|e| {
            candle_to_ocr_processing(ProcessingStage::PostProcessing, "logits must be 3D", e)
        })?;
        if steps == 0 {
            return Err(OCRError::post_processing(
                "aggregate logits",
                SimpleError::new("sequence has no time steps"),
            ));
        }
        if classes != self.vocabulary.len() {
            return Err(OCRError::dimension_mismatch(
                "result aggregator",
                self.vocabulary.len(),
                classes,
            ));
        }

        let last_step = logits
            .i(steps - 1)
            .and_then(|t| t.to_dtype(candle_core::DType::F32))
            .and_then(|t| t.to_vec2::<f32>())
            .map_err(|e| {
                candle_to_ocr_processing(
                    ProcessingStage::PostProcessing,
                    "extract last time step",
                    e,
                )
            })?;

        last_step.iter().map(|row| self.aggregate_step(row)).collect()
    }

    /// Aggregates the logits of a single time step.
    pub fn aggregate_step(&self, logits: &[f32]) -> OcrResult<PredictionResult> {
        let probs = softmax(logits);
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(OCRError::post_processing(
                "softmax over class logits",
                SimpleError::new("non-finite probability"),
            ));
        }

        let mut candidates = Vec::with_capacity(CANDIDATE_COUNT);
        for (index, prob) in top_k(&probs, CANDIDATE_COUNT) {
            let glyph = self.vocabulary.glyph_of(index).ok_or_else(|| {
                OCRError::post_processing(
                    "map class index to glyph",
                    SimpleError::new(format!("class {} is outside the vocabulary", index)),
                )
            })?;
            candidates.push(PredictionCandidate::new(glyph, prob));
        }

        // Fewer classes than candidates: repeat the weakest real one.
        if let Some(&weakest) = candidates.last()
            && candidates.len() < CANDIDATE_COUNT
        {
            tracing::debug!(
                classes = probs.len(),
                "vocabulary smaller than candidate list, repeating last candidate"
            );
            candidates.resize(CANDIDATE_COUNT, weakest);
        }

        PredictionResult::from_candidates(candidates)
    }
}
