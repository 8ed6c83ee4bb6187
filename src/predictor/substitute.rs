//! The terminal tier: a glyph picked from the fallback vocabulary.

use super::strategy::{StrategyKind, TierReport, TierStatus};
use crate::core::constants::{
    CANDIDATE_COUNT, SUBSTITUTE_CONFIDENCE_EMPTY, SUBSTITUTE_CONFIDENCE_FAILED,
    SUBSTITUTE_PAD_DECAY,
};
use crate::domain::{FallbackVocabulary, Glyph, PredictionCandidate, PredictionResult, round_confidence};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the time the substitute index is derived from.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u128;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    }
}

/// Appends glyphs drawn from `pool` until the list holds [`CANDIDATE_COUNT`]
/// entries, never repeating a glyph already present.
///
/// `confidence_at` receives the number of candidates present before each
/// draw. Negative confidences are clamped to zero.
pub(crate) fn pad_candidates<R: Rng + ?Sized>(
    candidates: &mut Vec<PredictionCandidate>,
    pool: &FallbackVocabulary,
    rng: &mut R,
    confidence_at: impl Fn(usize) -> f32,
) {
    let mut used: HashSet<Glyph> = candidates.iter().map(|c| c.glyph).collect();
    while candidates.len() < CANDIDATE_COUNT {
        let Some(glyph) = pool.sample_unique(rng, &used) else {
            break;
        };
        used.insert(glyph);
        let confidence = confidence_at(candidates.len()).max(0.0);
        candidates.push(PredictionCandidate::new(glyph, confidence));
    }
}

/// Picks a glyph from the fallback vocabulary by the current time.
///
/// The substitute always answers. Its confidence tells the caller how much
/// the earlier tiers knew: [`SUBSTITUTE_CONFIDENCE_EMPTY`] when the
/// alternate engine ran and saw nothing, [`SUBSTITUTE_CONFIDENCE_FAILED`]
/// otherwise.
#[derive(Clone)]
pub struct DeterministicSubstitute {
    pool: Arc<FallbackVocabulary>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DeterministicSubstitute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicSubstitute")
            .field("pool", &self.pool.len())
            .finish()
    }
}

impl DeterministicSubstitute {
    pub fn new(pool: Arc<FallbackVocabulary>) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: Arc<FallbackVocabulary>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn kind(&self) -> StrategyKind {
        StrategyKind::Substitute
    }

    /// Confidence of the substitute given what the earlier tiers reported.
    pub fn confidence_for(trail: &[TierReport]) -> f32 {
        let engine_saw_nothing = trail
            .iter()
            .any(|r| r.kind == StrategyKind::AlternateEngine && r.status == TierStatus::Empty);
        if engine_saw_nothing {
            SUBSTITUTE_CONFIDENCE_EMPTY
        } else {
            SUBSTITUTE_CONFIDENCE_FAILED
        }
    }

    /// Builds the substitute result.
    pub fn substitute(&self, trail: &[TierReport]) -> PredictionResult {
        let index = (self.clock.now_millis() % self.pool.len() as u128) as usize;
        let glyph = self.pool.pick(index);
        let confidence = Self::confidence_for(trail);
        tracing::info!(%glyph, confidence, "using fallback substitute");

        let mut candidates = vec![PredictionCandidate::new(glyph, confidence)];
        pad_candidates(&mut candidates, &self.pool, &mut rand::thread_rng(), |len| {
            confidence - SUBSTITUTE_PAD_DECAY * len as f32
        });

        // The pool holds at least CANDIDATE_COUNT distinct glyphs, so padding
        // always completes.
        let candidates: Vec<PredictionCandidate> = candidates
            .into_iter()
            .map(|c| PredictionCandidate::new(c.glyph, round_confidence(c.confidence)))
            .collect();
        let head = candidates[0];
        PredictionResult {
            result: head.glyph,
            confidence: head.confidence,
            candidates,
            preprocessed_image: None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    pub(crate) struct FixedClock(pub u128);

    impl Clock for FixedClock {
        fn now_millis(&self) -> u128 {
            self.0
        }
    }

    fn pool() -> Arc<FallbackVocabulary> {
        Arc::new(FallbackVocabulary::new("的一是了在人有我").unwrap())
    }

    #[test]
    fn test_substitute_index_follows_clock() {
        let substitute = DeterministicSubstitute::with_clock(pool(), Arc::new(FixedClock(10)));
        let result = substitute.substitute(&[]);
        // 10 % 8 == 2
        assert_eq!(result.result, '是');
        assert!(result.check_invariants().is_ok());
    }

    #[test]
    fn test_confidence_when_engine_saw_nothing() {
        let substitute = DeterministicSubstitute::with_clock(pool(), Arc::new(FixedClock(0)));
        let trail = vec![
            TierReport::new(
                StrategyKind::Model,
                TierStatus::Failed {
                    message: "boom".to_string(),
                    hard: false,
                },
            ),
            TierReport::new(StrategyKind::AlternateEngine, TierStatus::Empty),
        ];
        let result = substitute.substitute(&trail);
        assert_eq!(result.confidence, 0.7);
        let confidences: Vec<f32> = result.candidates.iter().map(|c| c.confidence).collect();
        assert_eq!(confidences, vec![0.7, 0.65, 0.6, 0.55, 0.5]);
    }

    #[test]
    fn test_confidence_when_engine_missing_or_failed() {
        assert_eq!(DeterministicSubstitute::confidence_for(&[]), 0.6);
        let failed = vec![TierReport::new(
            StrategyKind::AlternateEngine,
            TierStatus::Failed {
                message: "timeout".to_string(),
                hard: false,
            },
        )];
        assert_eq!(DeterministicSubstitute::confidence_for(&failed), 0.6);
        let unavailable = vec![TierReport::new(
            StrategyKind::AlternateEngine,
            TierStatus::Unavailable,
        )];
        assert_eq!(DeterministicSubstitute::confidence_for(&unavailable), 0.6);
    }

    #[test]
    fn test_substitute_candidates_are_unique() {
        let substitute = DeterministicSubstitute::new(pool());
        for _ in 0..20 {
            let result = substitute.substitute(&[]);
            let unique: HashSet<Glyph> = result.candidates.iter().map(|c| c.glyph).collect();
            assert_eq!(unique.len(), CANDIDATE_COUNT);
        }
    }

    #[test]
    fn test_pad_candidates_skips_present_glyphs() {
        let pool = FallbackVocabulary::new("一二三四五").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut candidates = vec![
            PredictionCandidate::new('一', 0.9),
            PredictionCandidate::new('二', 0.85),
        ];
        pad_candidates(&mut candidates, &pool, &mut rng, |len| 0.7 - 0.02 * len as f32);
        assert_eq!(candidates.len(), CANDIDATE_COUNT);
        let padded: HashSet<Glyph> = candidates[2..].iter().map(|c| c.glyph).collect();
        assert_eq!(padded, HashSet::from(['三', '四', '五']));
    }

    #[test]
    fn test_pad_candidates_clamps_at_zero() {
        let pool = FallbackVocabulary::new("一二三四五").unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut candidates = vec![PredictionCandidate::new('一', 0.05)];
        pad_candidates(&mut candidates, &pool, &mut rng, |len| 0.05 - 0.05 * len as f32);
        assert!(candidates.iter().all(|c| c.confidence >= 0.0));
    }
}
