//! Configuration for the recognizer, the fallback chain and the text engine.

pub mod errors;
pub mod onnx;
pub mod settings;

pub use errors::{ConfigError, ConfigValidator};
pub use onnx::{OrtGraphOptimizationLevel, OrtSessionConfig};
pub use settings::{
    CtcDecoding, EngineConfig, EngineParams, ExtractorConfig, FallbackConfig, PredictorConfig,
    PreprocessConfig, PreprocessStep, RecognizerConfig,
};
