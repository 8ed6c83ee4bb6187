//! # Handwrite OCR
//!
//! Single-glyph handwriting recognition. An image of one handwritten
//! character goes in; the most likely character comes out together with four
//! ranked alternatives.
//!
//! ## Features
//!
//! - CRNN classifier on candle whose first recurrent layer is shaped by the
//!   first input it sees
//! - Partial checkpoint restore that tolerates missing files and skips the
//!   lazily shaped layer
//! - Configurable glyph preprocessing (adaptive binarization, denoising,
//!   centering, resizing)
//! - Optional alternate text engine over ONNX Runtime with CTC decoding
//! - A fallback chain that always answers with exactly five candidates
//! - Batched prediction in a single forward pass
//!
//! ## Modules
//!
//! * [`core`] - Configuration, errors, constants, ONNX inference, devices
//! * [`domain`] - Vocabularies and prediction result types
//! * [`models`] - The CRNN, its parts, checkpoint loading and the text engine
//! * [`predictor`] - Recognition strategies, the fallback chain and the predictor
//! * [`processors`] - Preprocessing, result aggregation and CTC decoding
//! * [`utils`] - Image loading, decoding and encoding helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use handwrite_ocr::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config: PredictorConfig = serde_json::from_str(r#"
//! {
//!   "recognizer": {
//!     "vocabulary_path": "models/char_dict.json",
//!     "checkpoint_path": "models/crnn.safetensors"
//!   },
//!   "engine": {
//!     "model_path": "models/rec.onnx",
//!     "char_dict_path": "models/ppocr_keys.txt"
//!   }
//! }
//! "#)?;
//!
//! let predictor = HandwritingPredictor::from_config(&config)?;
//! let outcome = predictor.predict(&load_image(Path::new("glyph.png"))?);
//! for candidate in &outcome.prediction.candidates {
//!     println!("{} {:.4}", candidate.glyph, candidate.confidence);
//! }
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod core;
pub mod domain;
pub mod models;

pub mod predictor;
pub mod processors;
pub mod utils;

/// Prelude module for convenient imports.
///
/// ```rust
/// use handwrite_ocr::prelude::*;
/// ```
///
/// Lower-level pieces (the CRNN, strategies, processors) are imported from
/// their modules directly.
pub mod prelude {
    // Predictor (essential)
    pub use crate::predictor::{HandwritingPredictor, RecognitionOutcome, StrategyKind};

    // Configuration
    pub use crate::core::config::{ConfigValidator, PredictorConfig};

    // Results
    pub use crate::domain::{PredictionCandidate, PredictionResult};

    // Error Handling (essential)
    pub use crate::core::{OCRError, OcrResult};

    // Image Utility (minimal)
    pub use crate::utils::{load_image, load_images_batch};
}
