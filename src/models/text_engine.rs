//! Alternate text engine.
//!
//! The fallback chain treats the engine as an opaque source of ranked texts.
//! [`OrtTextEngine`] implements it with a PP-OCR style CTC recognizer run
//! through ONNX Runtime.

use crate::core::config::{CtcDecoding, EngineConfig, EngineParams};
use crate::core::errors::{OCRError, OcrResult};
use crate::core::inference::{SessionPool, Tensor4D};
use crate::processors::{CtcDecoder, DecodedText};
use crate::utils::read_character_dict;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Axis;

/// One text found by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TextDetection {
    /// `[x, y, width, height]` of the region the text was read from.
    pub bounding_box: Option<[u32; 4]>,
    pub text: String,
    /// Engine score in `[0, 1]`, when the engine reports one.
    pub confidence: Option<f32>,
}

/// A text recognizer the fallback chain can consult.
pub trait TextEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Reads zero or more texts from a glyph image, best first.
    fn read_text(&self, image: &GrayImage, params: &EngineParams) -> OcrResult<Vec<TextDetection>>;
}

/// CTC text recognizer over an ONNX model.
///
/// The model takes `(1, 3, H, W)` images normalized to `[-1, 1]` and returns
/// `(1, steps, classes)` probabilities with the blank at class 0.
#[derive(Debug)]
pub struct OrtTextEngine {
    sessions: SessionPool,
    decoder: CtcDecoder,
    input_height: u32,
}

impl OrtTextEngine {
    pub fn new(config: &EngineConfig) -> OcrResult<Self> {
        let entries = read_character_dict(&config.char_dict_path)?;
        let sessions = SessionPool::open(
            &config.model_path,
            config.session_pool_size,
            config.ort_session.as_ref(),
        )?;
        // A model exported with a fixed height wins over the configured one.
        let input_height = match sessions.input_dims().as_deref() {
            Some(&[_, _, height, _]) if height > 0 && height as u32 != config.input_height => {
                tracing::warn!(
                    configured = config.input_height,
                    model = height,
                    "engine model has a fixed input height, using it"
                );
                height as u32
            }
            _ => config.input_height,
        };
        tracing::info!(
            model = %sessions.model_path().display(),
            characters = entries.len(),
            sessions = sessions.len(),
            input_height,
            "loaded alternate text engine"
        );
        Ok(Self {
            sessions,
            decoder: CtcDecoder::new(entries),
            input_height,
        })
    }

    /// Resizes to the model height keeping the aspect ratio, then builds the
    /// normalized three-channel input.
    fn prepare_input(&self, image: &GrayImage) -> Tensor4D {
        prepare_input(image, self.input_height)
    }

    fn decode(&self, probs: ndarray::ArrayView2<'_, f32>, params: &EngineParams) -> DecodedText {
        match params.decoder {
            CtcDecoding::Greedy => self.decoder.greedy(probs, params.low_text),
            CtcDecoding::BeamSearch { width } => {
                self.decoder.beam_search(probs, width, params.low_text)
            }
        }
    }
}

fn prepare_input(image: &GrayImage, input_height: u32) -> Tensor4D {
    let (w, h) = image.dimensions();
    let target_w = ((w as f32 * input_height as f32 / h as f32).round() as u32).max(input_height / 4);
    let resized = imageops::resize(image, target_w, input_height, FilterType::Triangle);

    let mut tensor = Tensor4D::zeros((1, 3, input_height as usize, target_w as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = (pixel[0] as f32 / 255.0 - 0.5) / 0.5;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = value;
        }
    }
    tensor
}

impl TextEngine for OrtTextEngine {
    fn name(&self) -> &str {
        self.sessions.model_name()
    }

    fn read_text(&self, image: &GrayImage, params: &EngineParams) -> OcrResult<Vec<TextDetection>> {
        let (w, h) = image.dimensions();
        if w.min(h) < params.min_size {
            tracing::debug!(width = w, height = h, min_size = params.min_size, "glyph below engine minimum size");
            return Ok(Vec::new());
        }

        let input = self.prepare_input(image);
        let output = self.sessions.run_sequence(&input)?;
        let classes = output.shape()[2];
        if classes != self.decoder.class_count() {
            return Err(OCRError::dimension_mismatch(
                "text engine dictionary",
                self.decoder.class_count(),
                classes,
            ));
        }

        let mut detections = Vec::new();
        for probs in output.axis_iter(Axis(0)) {
            let decoded = self.decode(probs, params);
            let confidence = decoded.confidence();
            if decoded.is_empty() || confidence < params.text_threshold {
                continue;
            }
            detections.push(TextDetection {
                bounding_box: Some([0, 0, w, h]),
                text: decoded.text,
                confidence: Some(confidence),
            });
        }
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_model_fails_construction() {
        let mut dict = NamedTempFile::new().unwrap();
        writeln!(dict, "一").unwrap();
        let config = EngineConfig::new("/nonexistent/rec.onnx", dict.path());
        assert!(OrtTextEngine::new(&config).is_err());
    }

    #[test]
    fn test_missing_dictionary_fails_construction() {
        let config = EngineConfig::new("/nonexistent/rec.onnx", "/nonexistent/keys.txt");
        assert!(matches!(
            OrtTextEngine::new(&config),
            Err(OCRError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_prepare_input_keeps_aspect_ratio() {
        let image = GrayImage::from_pixel(128, 64, Luma([255]));
        let tensor = prepare_input(&image, 48);
        assert_eq!(tensor.shape(), &[1, 3, 48, 96]);
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_prepare_input_has_minimum_width() {
        let image = GrayImage::from_pixel(2, 200, Luma([0]));
        let tensor = prepare_input(&image, 48);
        assert_eq!(tensor.shape(), &[1, 3, 48, 12]);
    }
}
