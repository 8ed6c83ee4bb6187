//! Prediction result types.

use super::vocabulary::Glyph;
use crate::core::constants::{CANDIDATE_COUNT, CONFIDENCE_DECIMALS};
use crate::core::errors::{OCRError, OcrResult};
use serde::{Deserialize, Serialize};

/// Rounds a confidence to the fixed number of decimal digits results carry.
pub fn round_confidence(value: f32) -> f32 {
    let scale = 10f64.powi(CONFIDENCE_DECIMALS);
    ((value as f64 * scale).round() / scale) as f32
}

/// One ranked guess within a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionCandidate {
    #[serde(rename = "char")]
    pub glyph: Glyph,
    pub confidence: f32,
}

impl PredictionCandidate {
    pub fn new(glyph: Glyph, confidence: f32) -> Self {
        Self { glyph, confidence }
    }
}

/// The answer to one recognition request.
///
/// `candidates` always holds exactly [`CANDIDATE_COUNT`] entries and its first
/// entry equals `(result, confidence)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub result: Glyph,
    pub confidence: f32,
    pub candidates: Vec<PredictionCandidate>,
    /// PNG encoding of the normalized glyph the model saw, when available.
    #[serde(skip)]
    pub preprocessed_image: Option<Vec<u8>>,
}

impl PredictionResult {
    /// Builds a result from a complete candidate list.
    ///
    /// Confidences are rounded and the head of the list becomes the result.
    ///
    /// # Errors
    ///
    /// Returns `OCRError::InvalidInput` unless exactly [`CANDIDATE_COUNT`]
    /// candidates are given.
    pub fn from_candidates(candidates: Vec<PredictionCandidate>) -> OcrResult<Self> {
        if candidates.len() != CANDIDATE_COUNT {
            return Err(OCRError::invalid_input(format!(
                "a result needs exactly {} candidates, got {}",
                CANDIDATE_COUNT,
                candidates.len()
            )));
        }
        let candidates: Vec<PredictionCandidate> = candidates
            .into_iter()
            .map(|c| PredictionCandidate::new(c.glyph, round_confidence(c.confidence)))
            .collect();
        let head = candidates[0];
        Ok(Self {
            result: head.glyph,
            confidence: head.confidence,
            candidates,
            preprocessed_image: None,
        })
    }

    /// Attaches the encoded normalized image.
    pub fn with_preprocessed_image(mut self, png: Vec<u8>) -> Self {
        self.preprocessed_image = Some(png);
        self
    }

    /// Verifies the shape every tier must produce.
    pub fn check_invariants(&self) -> OcrResult<()> {
        if self.candidates.len() != CANDIDATE_COUNT {
            return Err(OCRError::invalid_input(format!(
                "expected {} candidates, found {}",
                CANDIDATE_COUNT,
                self.candidates.len()
            )));
        }
        let head = self.candidates[0];
        if head.glyph != self.result || head.confidence != self.confidence {
            return Err(OCRError::invalid_input(format!(
                "first candidate ({}, {}) differs from result ({}, {})",
                head.glyph, head.confidence, self.result, self.confidence
            )));
        }
        if let Some(bad) = self
            .candidates
            .iter()
            .find(|c| !c.confidence.is_finite() || !(0.0..=1.0).contains(&c.confidence))
        {
            return Err(OCRError::invalid_input(format!(
                "confidence {} of '{}' is outside [0, 1]",
                bad.confidence, bad.glyph
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five(confidences: [f32; 5]) -> Vec<PredictionCandidate> {
        "甲乙丙丁戊"
            .chars()
            .zip(confidences)
            .map(|(g, c)| PredictionCandidate::new(g, c))
            .collect()
    }

    #[test]
    fn test_round_confidence() {
        assert_eq!(round_confidence(0.123456), 0.1235);
        assert_eq!(round_confidence(0.9 - 0.05), 0.85);
        assert_eq!(round_confidence(1.0), 1.0);
    }

    #[test]
    fn test_from_candidates_sets_head() {
        let result = PredictionResult::from_candidates(five([0.912345, 0.05, 0.02, 0.01, 0.0]))
            .unwrap();
        assert_eq!(result.result, '甲');
        assert_eq!(result.confidence, 0.9123);
        assert_eq!(result.candidates[0].confidence, result.confidence);
        assert!(result.check_invariants().is_ok());
    }

    #[test]
    fn test_wrong_candidate_count() {
        let mut candidates = five([0.5; 5]);
        candidates.pop();
        assert!(PredictionResult::from_candidates(candidates).is_err());
    }

    #[test]
    fn test_check_invariants_detects_tampering() {
        let mut result = PredictionResult::from_candidates(five([0.5; 5])).unwrap();
        result.confidence = 0.4;
        assert!(result.check_invariants().is_err());
    }

    #[test]
    fn test_serializes_char_field() {
        let result = PredictionResult::from_candidates(five([0.5; 5]))
            .unwrap()
            .with_preprocessed_image(vec![1, 2, 3]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["result"], "甲");
        assert_eq!(json["candidates"][1]["char"], "乙");
        assert!(json.get("preprocessed_image").is_none());
    }
}
