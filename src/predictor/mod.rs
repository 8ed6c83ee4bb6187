//! Recognition front end.
//!
//! [`HandwritingPredictor`] owns a [`FallbackChain`] of strategies:
//! - [`ModelStrategy`]: the CRNN behind [`GlyphRecognizer`]
//! - [`EngineStrategy`]: the alternate text engine, when configured
//! - [`DeterministicSubstitute`]: a time-derived glyph from the fallback vocabulary
//!
//! Bounded strategies run behind an [`AttemptBoundary`]. Whatever happens in
//! the tiers, the predictor answers with five ranked candidates.

pub mod chain;
pub mod engine_strategy;
pub mod handwriting;
pub mod model_strategy;
pub mod recognizer;
pub mod strategy;
pub mod substitute;

pub use chain::{AttemptBoundary, ChainOutcome, FallbackChain};
pub use engine_strategy::EngineStrategy;
pub use handwriting::{HandwritingPredictor, RecognitionOutcome};
pub use model_strategy::ModelStrategy;
pub use recognizer::GlyphRecognizer;
pub use strategy::{GlyphRequest, RecognitionStrategy, StrategyKind, TierReport, TierStatus};
pub use substitute::{Clock, DeterministicSubstitute, SystemClock};
