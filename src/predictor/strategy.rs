//! The seam between the fallback chain and the things it can fall back to.

use crate::core::errors::OcrResult;
use crate::domain::PredictionResult;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which tier of the chain produced, or failed to produce, a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// The CRNN glyph classifier.
    Model,
    /// The alternate text engine.
    AlternateEngine,
    /// The time-derived substitute from the fallback vocabulary.
    Substitute,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Model => "model",
            StrategyKind::AlternateEngine => "alternate_engine",
            StrategyKind::Substitute => "substitute",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a tier that did not answer ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TierStatus {
    /// Ran to completion and recognized nothing.
    Empty,
    /// Raised an error, timed out or panicked. `hard` marks layer-shape conflicts.
    Failed { message: String, hard: bool },
    /// Could not run for this request.
    Unavailable,
}

/// One entry of the trail the chain leaves behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierReport {
    pub kind: StrategyKind,
    #[serde(flatten)]
    pub status: TierStatus,
}

impl TierReport {
    pub fn new(kind: StrategyKind, status: TierStatus) -> Self {
        Self { kind, status }
    }

    /// True for a layer-shape conflict.
    pub fn is_hard_failure(&self) -> bool {
        matches!(self.status, TierStatus::Failed { hard: true, .. })
    }
}

/// Everything a strategy may look at for one glyph.
///
/// `original` is the decoded grayscale input; `normalized` is the output of
/// the glyph preprocessor. Either may be absent when decoding or
/// preprocessing failed.
#[derive(Debug, Clone, Default)]
pub struct GlyphRequest {
    pub original: Option<GrayImage>,
    pub normalized: Option<GrayImage>,
}

impl GlyphRequest {
    pub fn new(original: Option<GrayImage>, normalized: Option<GrayImage>) -> Self {
        Self {
            original,
            normalized,
        }
    }
}

/// A tier of the fallback chain.
///
/// `attempt` returns `Ok(None)` when the strategy ran but has nothing to
/// offer. Errors are absorbed by the chain, which moves on to the next tier.
pub trait RecognitionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether the chain runs this strategy behind its attempt boundary.
    fn is_bounded(&self) -> bool {
        true
    }

    /// Whether the request carries what this strategy needs.
    fn is_available(&self, _request: &GlyphRequest) -> bool {
        true
    }

    /// Tries to recognize the glyph. `trail` holds the reports of the tiers
    /// that already gave up on this request.
    fn attempt(
        &self,
        request: &GlyphRequest,
        trail: &[TierReport],
    ) -> OcrResult<Option<PredictionResult>>;
}
