//! Error types for the glyph recognition engine.
//!
//! Only two kinds of error reach a caller of
//! [`HandwritingPredictor`](crate::predictor::HandwritingPredictor): a class
//! vocabulary that cannot be loaded, and an invalid configuration. Both
//! surface at construction. Everything raised while recognizing is absorbed
//! by the fallback chain and logged.
//!
//! Lower layers ([`GlyphRecognizer`](crate::predictor::GlyphRecognizer), the
//! models, the processors) return these errors directly.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where in the pipeline a processing error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    TensorOperation,
    /// Building the normalized input tensor.
    Normalization,
    /// Turning logits into candidates.
    PostProcessing,
    /// Copying checkpoint weights into the model.
    Checkpoint,
    Generic,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessingStage::TensorOperation => "tensor operation",
            ProcessingStage::Normalization => "normalization",
            ProcessingStage::PostProcessing => "post-processing",
            ProcessingStage::Checkpoint => "checkpoint restore",
            ProcessingStage::Generic => "processing",
        };
        f.write_str(name)
    }
}

/// A message-only error, used as the `source` when there is no underlying error.
#[derive(Debug, Clone)]
pub struct SimpleError {
    message: String,
}

impl SimpleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SimpleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SimpleError {}

#[derive(Error, Debug)]
pub enum OCRError {
    #[error("image load")]
    ImageLoad(#[source] image::ImageError),

    #[error("{kind} failed: {context}")]
    Processing {
        kind: ProcessingStage,
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A forward pass of the CRNN or the text engine failed.
    #[error("inference failed in model '{model_name}': {context}")]
    Inference {
        model_name: String,
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to load model from '{}': {context}", path.display())]
    ModelLoad {
        path: PathBuf,
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Fatal at construction time.
    #[error("failed to load class vocabulary from '{}': {message}", path.display())]
    VocabularyLoad { path: PathBuf, message: String },

    /// A bound layer was handed features of another size.
    #[error("dimension mismatch in {component}: expected {expected}, got {actual}")]
    DimensionMismatch {
        component: String,
        expected: usize,
        actual: usize,
    },

    #[error("strategy '{strategy}' exceeded its attempt boundary of {timeout_ms} ms")]
    AttemptTimeout { strategy: String, timeout_ms: u64 },

    /// Too many earlier attempts are still running past their boundary.
    #[error("strategy '{strategy}' refused: {limit} attempt workers still running")]
    AttemptsSaturated { strategy: String, limit: usize },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("configuration: {message}")]
    ConfigError { message: String },

    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),

    #[error("io")]
    Io(#[from] std::io::Error),
}

pub type OcrResult<T> = Result<T, OCRError>;

impl OCRError {
    pub fn processing_error(
        kind: ProcessingStage,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind,
            context: context.into(),
            source: Box::new(error),
        }
    }

    pub fn tensor_operation(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::processing_error(ProcessingStage::TensorOperation, context, error)
    }

    pub fn post_processing(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::processing_error(ProcessingStage::PostProcessing, context, error)
    }

    pub fn inference_error(
        model_name: &str,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.to_string(),
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// `hint` is appended to the context in parentheses.
    pub fn model_load_error(
        path: &Path,
        context: &str,
        hint: Option<&str>,
        error: Option<impl std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        Self::ModelLoad {
            path: path.to_path_buf(),
            context: match hint {
                Some(hint) => format!("{} ({})", context, hint),
                None => context.to_string(),
            },
            source: error.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        }
    }

    pub fn vocabulary_load(path: &Path, message: impl Into<String>) -> Self {
        Self::VocabularyLoad {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn dimension_mismatch(component: &str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            component: component.to_string(),
            expected,
            actual,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Layer-shape conflicts are the one hard failure during recognition.
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. })
    }
}

impl From<image::ImageError> for OCRError {
    fn from(error: image::ImageError) -> Self {
        Self::ImageLoad(error)
    }
}

impl From<crate::core::config::ConfigError> for OCRError {
    fn from(error: crate::core::config::ConfigError) -> Self {
        Self::ConfigError {
            message: error.to_string(),
        }
    }
}

/// Wraps a candle error raised while running a model.
pub fn candle_to_ocr_inference(
    model_name: &str,
    context: impl Into<String>,
    err: candle_core::Error,
) -> OCRError {
    OCRError::inference_error(model_name, context, err)
}

/// Wraps a candle error raised by a processing step.
pub fn candle_to_ocr_processing(
    kind: ProcessingStage,
    context: impl Into<String>,
    err: candle_core::Error,
) -> OCRError {
    OCRError::processing_error(kind, context, err)
}
