//! Domain-level structures shared across the recognition engine.
//!
//! This module groups the glyph vocabularies and the prediction result types
//! that every recognition strategy produces.

pub mod prediction;
pub mod vocabulary;

pub use prediction::{PredictionCandidate, PredictionResult, round_confidence};
pub use vocabulary::{ClassVocabulary, FallbackVocabulary, Glyph};
