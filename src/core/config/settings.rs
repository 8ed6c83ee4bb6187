//! Configuration documents for the recognizer, the fallback chain and the
//! alternate text engine.
//!
//! Every section deserializes from JSON with sensible defaults for missing
//! fields, so a minimal document only needs the vocabulary path:
//!
//! ```rust
//! use handwrite_ocr::core::config::PredictorConfig;
//!
//! let config: PredictorConfig = serde_json::from_str(
//!     r#"{ "recognizer": { "vocabulary_path": "models/char_dict.json" } }"#,
//! ).unwrap();
//! assert_eq!(config.recognizer.input_height, 64);
//! ```

use super::errors::{ConfigError, ConfigValidator};
use super::onnx::OrtSessionConfig;
use crate::core::constants::{
    COMMON_CHARACTERS, DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_EXTRACTOR_CHANNELS, DEFAULT_HIDDEN_SIZE,
    DEFAULT_INPUT_HEIGHT, DEFAULT_INPUT_WIDTH, DEFAULT_MAX_ATTEMPT_WORKERS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One step of the glyph preprocessing pipeline.
///
/// Conversion to a single intensity channel always happens first and is not
/// a configurable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessStep {
    /// Global threshold, pixels below the threshold become black.
    Binarize,
    /// Gaussian adaptive threshold, ink becomes white on black.
    AdaptiveBinarize,
    /// Morphological open followed by close.
    Denoise,
    /// Crop the ink bounding box and re-center it on a blank canvas.
    Center,
    /// Resize to the configured input geometry.
    Resize,
}

/// Settings for the glyph preprocessing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Steps applied in order. `Resize` is always enforced last if omitted.
    pub steps: Vec<PreprocessStep>,
    /// Neighborhood size of the adaptive threshold (odd, at least 3).
    pub adaptive_block_size: u32,
    /// Constant subtracted from the weighted neighborhood mean.
    pub adaptive_offset: i16,
    /// Cut-off of the global `Binarize` step.
    pub binarize_threshold: u8,
    /// Radius of the denoise structuring element. Zero leaves the image untouched.
    pub denoise_radius: u8,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                PreprocessStep::AdaptiveBinarize,
                PreprocessStep::Denoise,
                PreprocessStep::Center,
                PreprocessStep::Resize,
            ],
            adaptive_block_size: 11,
            adaptive_offset: 2,
            binarize_threshold: 127,
            denoise_radius: 0,
        }
    }
}

impl ConfigValidator for PreprocessConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.adaptive_block_size < 3 || self.adaptive_block_size % 2 == 0 {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "adaptive_block_size must be odd and at least 3, got {}",
                    self.adaptive_block_size
                ),
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Channel widths of the seven convolutional stages.
///
/// The stage topology (kernels, pooling, normalization placement) is fixed;
/// only the widths vary between deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub channels: [usize; 7],
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_EXTRACTOR_CHANNELS,
        }
    }
}

impl ExtractorConfig {
    /// Number of channels of the final feature map.
    pub fn output_channels(&self) -> usize {
        self.channels[6]
    }
}

/// Configuration of the model-based recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Serialized glyph↔index table. Its absence is fatal.
    pub vocabulary_path: PathBuf,
    /// Safetensors checkpoint. Missing files degrade to random weights.
    pub checkpoint_path: Option<PathBuf>,
    /// Normalized glyph height.
    pub input_height: u32,
    /// Normalized glyph width.
    pub input_width: u32,
    /// Feature extractor widths.
    pub extractor: ExtractorConfig,
    /// Hidden size of each recurrent direction.
    pub hidden_size: usize,
    /// Device string: `cpu`, `cuda` or `cuda:N`.
    pub device: String,
    /// Preprocessing pipeline.
    pub preprocess: PreprocessConfig,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            vocabulary_path: PathBuf::from("char_dict.json"),
            checkpoint_path: None,
            input_height: DEFAULT_INPUT_HEIGHT,
            input_width: DEFAULT_INPUT_WIDTH,
            extractor: ExtractorConfig::default(),
            hidden_size: DEFAULT_HIDDEN_SIZE,
            device: "cpu".to_string(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl ConfigValidator for RecognizerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_image_dimensions(self.input_width, self.input_height)?;
        // Four 2x height poolings and a 2x2 valid convolution.
        if self.input_height < 32 {
            return Err(ConfigError::InvalidConfig {
                message: format!("input_height must be at least 32, got {}", self.input_height),
            });
        }
        if self.input_width < 8 {
            return Err(ConfigError::InvalidConfig {
                message: format!("input_width must be at least 8, got {}", self.input_width),
            });
        }
        if self.extractor.channels.contains(&0) {
            return Err(ConfigError::InvalidConfig {
                message: "extractor channel widths must be greater than 0".to_string(),
            });
        }
        if self.hidden_size == 0 {
            return Err(ConfigError::InvalidConfig {
                message: "hidden_size must be greater than 0".to_string(),
            });
        }
        self.preprocess.validate()
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// CTC decoding strategy used by the alternate text engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CtcDecoding {
    /// Best path decoding.
    #[default]
    Greedy,
    /// Prefix beam search keeping `width` beams.
    BeamSearch { width: usize },
}

/// Tunables handed to the alternate text engine on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Minimum glyph side length in pixels; smaller inputs yield no text.
    pub min_size: u32,
    /// Minimum mean character confidence for a text to be reported.
    pub text_threshold: f32,
    /// Characters whose probability falls below this are dropped.
    pub low_text: f32,
    /// Decoding strategy.
    pub decoder: CtcDecoding,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            min_size: 10,
            text_threshold: 0.5,
            low_text: 0.3,
            decoder: CtcDecoding::Greedy,
        }
    }
}

impl ConfigValidator for EngineParams {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_confidence_threshold(self.text_threshold)?;
        self.validate_confidence_threshold(self.low_text)?;
        if let CtcDecoding::BeamSearch { width } = self.decoder
            && width == 0
        {
            return Err(ConfigError::InvalidConfig {
                message: "beam width must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Configuration of the fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Per-call boundary for the model and engine tiers. `None` runs them inline.
    pub attempt_timeout_ms: Option<u64>,
    /// Attempt workers allowed alive at once, including ones that outlived
    /// their boundary. Further attempts are refused until one finishes.
    pub max_attempt_workers: usize,
    /// Characters the fallback tiers pick substitutes and padding from.
    pub vocabulary: String,
    /// Tunables for the alternate engine.
    pub engine_params: EngineParams,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: Some(DEFAULT_ATTEMPT_TIMEOUT_MS),
            max_attempt_workers: DEFAULT_MAX_ATTEMPT_WORKERS,
            vocabulary: COMMON_CHARACTERS.to_string(),
            engine_params: EngineParams::default(),
        }
    }
}

impl ConfigValidator for FallbackConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.attempt_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidConfig {
                message: "attempt_timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.max_attempt_workers == 0 {
            return Err(ConfigError::invalid("max_attempt_workers must be greater than 0"));
        }
        self.engine_params.validate()
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Configuration of the ONNX alternate text engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// ONNX CTC text-recognition model.
    pub model_path: PathBuf,
    /// Character dictionary of the engine, one entry per line.
    pub char_dict_path: PathBuf,
    /// Input height the engine model expects.
    #[serde(default = "default_engine_height")]
    pub input_height: u32,
    /// Number of sessions in the pool.
    #[serde(default = "default_pool_size")]
    pub session_pool_size: usize,
    /// Session tuning.
    #[serde(default)]
    pub ort_session: Option<OrtSessionConfig>,
}

fn default_engine_height() -> u32 {
    48
}

fn default_pool_size() -> usize {
    1
}

impl EngineConfig {
    /// Creates an engine configuration with default geometry.
    pub fn new(model_path: impl Into<PathBuf>, char_dict_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            char_dict_path: char_dict_path.into(),
            input_height: default_engine_height(),
            session_pool_size: default_pool_size(),
            ort_session: None,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub recognizer: RecognizerConfig,
    pub fallback: FallbackConfig,
    pub engine: Option<EngineConfig>,
}

impl PredictorConfig {
    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            message: format!("cannot read '{}': {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            message: format!("'{}': {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl ConfigValidator for PredictorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.recognizer.validate()?;
        self.fallback.validate()?;
        if let Some(engine) = &self.engine
            && (engine.session_pool_size == 0 || engine.input_height == 0)
        {
            return Err(ConfigError::InvalidConfig {
                message: "engine session_pool_size and input_height must be greater than 0"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}
