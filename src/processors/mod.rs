//! Image and tensor processing around the recognition models.
//!
//! - [`preprocess`]: glyph normalization before the CRNN and enhancement
//!   before the alternate engine
//! - [`aggregate`]: turns per-step logits into a ranked candidate list
//! - [`ctc`]: decodes the alternate engine's per-step probabilities into text

pub mod aggregate;
pub mod ctc;
pub mod preprocess;

pub use aggregate::{ResultAggregator, softmax, top_k};
pub use ctc::{CtcDecoder, DecodedText};
pub use preprocess::GlyphPreprocessor;
