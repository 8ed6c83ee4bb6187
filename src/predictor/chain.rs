//! Ordered fallback over recognition strategies.

use super::strategy::{GlyphRequest, RecognitionStrategy, StrategyKind, TierReport, TierStatus};
use super::substitute::DeterministicSubstitute;
use crate::core::errors::{OCRError, OcrResult, ProcessingStage, SimpleError};
use crate::domain::PredictionResult;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use crate::core::constants::DEFAULT_MAX_ATTEMPT_WORKERS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn panicked(name: &str, message: impl Into<String>) -> OCRError {
    OCRError::processing_error(
        ProcessingStage::Generic,
        format!("strategy '{}' panicked", name),
        SimpleError::new(message),
    )
}

/// Holds one place in a boundary's worker count until dropped.
struct WorkerSlot(Arc<AtomicUsize>);

impl WorkerSlot {
    fn claim(live: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < limit).then_some(n + 1)
        })
        .ok()
        .map(|_| Self(Arc::clone(live)))
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs a unit of work under a time limit, turning timeouts and panics into
/// errors.
///
/// With a timeout the work runs on its own thread; when the limit passes the
/// caller gets [`OCRError::AttemptTimeout`] and the thread is left to finish
/// in the background with its result discarded. At most `max_workers` such
/// threads are alive at once across clones of the boundary; past that, work
/// is refused with [`OCRError::AttemptsSaturated`] without being started.
/// Without a timeout the work runs inline and only panics are caught.
#[derive(Debug, Clone)]
pub struct AttemptBoundary {
    timeout: Option<Duration>,
    max_workers: usize,
    live: Arc<AtomicUsize>,
}

impl Default for AttemptBoundary {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AttemptBoundary {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            max_workers: DEFAULT_MAX_ATTEMPT_WORKERS,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_millis(timeout_ms: Option<u64>) -> Self {
        Self::new(timeout_ms.map(Duration::from_millis))
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Worker threads currently running, including abandoned ones.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn run<T, F>(&self, name: &str, work: F) -> OcrResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> OcrResult<T> + Send + 'static,
    {
        let Some(timeout) = self.timeout else {
            return panic::catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|payload| Err(panicked(name, panic_message(payload.as_ref()))));
        };

        let Some(slot) = WorkerSlot::claim(&self.live, self.max_workers) else {
            tracing::warn!(
                strategy = name,
                limit = self.max_workers,
                "attempt workers saturated"
            );
            return Err(OCRError::AttemptsSaturated {
                strategy: name.to_string(),
                limit: self.max_workers,
            });
        };

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("attempt-{}", name))
            .spawn(move || {
                let _slot = slot;
                // The receiver is gone once the caller timed out.
                let _ = tx.send(work());
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(OCRError::AttemptTimeout {
                strategy: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(panicked(name, "worker exited without a result"))
            }
        }
    }
}

/// What the chain produced for one request.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub prediction: PredictionResult,
    pub tier: StrategyKind,
    /// Reports of every tier that did not answer, in order.
    pub trail: Vec<TierReport>,
}

/// Tries each strategy in order and ends with the substitute, so it always
/// produces a result.
///
/// Results from any tier are checked before they are returned; a result that
/// breaks the candidate invariants counts as a failure of that tier.
pub struct FallbackChain {
    strategies: Vec<Arc<dyn RecognitionStrategy>>,
    terminal: DeterministicSubstitute,
    boundary: AttemptBoundary,
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<StrategyKind> = self.strategies.iter().map(|s| s.kind()).collect();
        f.debug_struct("FallbackChain")
            .field("strategies", &kinds)
            .field("terminal", &self.terminal)
            .field("boundary", &self.boundary)
            .finish()
    }
}

impl FallbackChain {
    pub fn new(
        strategies: Vec<Arc<dyn RecognitionStrategy>>,
        terminal: DeterministicSubstitute,
        boundary: AttemptBoundary,
    ) -> Self {
        Self {
            strategies,
            terminal,
            boundary,
        }
    }

    pub fn boundary(&self) -> &AttemptBoundary {
        &self.boundary
    }

    pub fn tiers(&self) -> Vec<StrategyKind> {
        self.strategies
            .iter()
            .map(|s| s.kind())
            .chain(std::iter::once(self.terminal.kind()))
            .collect()
    }

    pub fn run(&self, request: Arc<GlyphRequest>) -> ChainOutcome {
        self.run_from(request, Vec::new(), 0)
    }

    /// Continues the chain at strategy `start` with an existing trail.
    ///
    /// Used when an earlier tier already ran outside the chain, as in batch
    /// prediction.
    pub fn run_from(
        &self,
        request: Arc<GlyphRequest>,
        mut trail: Vec<TierReport>,
        start: usize,
    ) -> ChainOutcome {
        for strategy in self.strategies.iter().skip(start) {
            let kind = strategy.kind();
            if !strategy.is_available(&request) {
                tracing::debug!(tier = %kind, "tier unavailable for this request");
                trail.push(TierReport::new(kind, TierStatus::Unavailable));
                continue;
            }

            let attempt = if strategy.is_bounded() {
                let strategy = Arc::clone(strategy);
                let request = Arc::clone(&request);
                let earlier = trail.clone();
                self.boundary
                    .run(kind.as_str(), move || strategy.attempt(&request, &earlier))
            } else {
                strategy.attempt(&request, &trail)
            };
            let attempt = attempt.and_then(|prediction| match prediction {
                Some(prediction) => prediction.check_invariants().map(|_| Some(prediction)),
                None => Ok(None),
            });

            match attempt {
                Ok(Some(prediction)) => {
                    tracing::debug!(tier = %kind, result = %prediction.result, "tier answered");
                    return ChainOutcome {
                        prediction,
                        tier: kind,
                        trail,
                    };
                }
                Ok(None) => {
                    tracing::info!(tier = %kind, "tier recognized nothing, falling back");
                    trail.push(TierReport::new(kind, TierStatus::Empty));
                }
                Err(e) => {
                    trail.push(Self::failure_report(kind, &e));
                }
            }
        }

        let prediction = self.terminal.substitute(&trail);
        ChainOutcome {
            prediction,
            tier: self.terminal.kind(),
            trail,
        }
    }

    /// Logs a tier failure and turns it into a trail entry.
    pub fn failure_report(kind: StrategyKind, error: &OCRError) -> TierReport {
        let hard = error.is_dimension_mismatch();
        if hard {
            tracing::error!(tier = %kind, error = %error, "layer shape conflict, falling back");
        } else {
            tracing::warn!(tier = %kind, error = %error, "tier failed, falling back");
        }
        TierReport::new(
            kind,
            TierStatus::Failed {
                message: error.to_string(),
                hard,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::CANDIDATE_COUNT;
    use crate::domain::{FallbackVocabulary, PredictionCandidate};
    use crate::predictor::substitute::tests::FixedClock;
    use std::time::Instant;

    fn terminal() -> DeterministicSubstitute {
        let pool = Arc::new(FallbackVocabulary::new("的一是了在人有我").unwrap());
        DeterministicSubstitute::with_clock(pool, Arc::new(FixedClock(1)))
    }

    fn ranked(glyphs: &str) -> PredictionResult {
        let candidates = glyphs
            .chars()
            .enumerate()
            .map(|(i, g)| PredictionCandidate::new(g, 0.5 - 0.1 * i as f32))
            .collect();
        PredictionResult::from_candidates(candidates).unwrap()
    }

    enum Behavior {
        Answer(&'static str),
        Nothing,
        Fail,
        Mismatch,
        Panic,
        Sleep(Duration),
        Malformed,
    }

    struct Scripted {
        kind: StrategyKind,
        behavior: Behavior,
        calls: AtomicUsize,
        available: bool,
    }

    impl Scripted {
        fn new(kind: StrategyKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior,
                calls: AtomicUsize::new(0),
                available: true,
            })
        }

        fn unavailable(kind: StrategyKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior: Behavior::Nothing,
                calls: AtomicUsize::new(0),
                available: false,
            })
        }
    }

    impl RecognitionStrategy for Scripted {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn is_available(&self, _request: &GlyphRequest) -> bool {
            self.available
        }

        fn attempt(
            &self,
            _request: &GlyphRequest,
            _trail: &[TierReport],
        ) -> OcrResult<Option<PredictionResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Answer(glyphs) => Ok(Some(ranked(glyphs))),
                Behavior::Nothing => Ok(None),
                Behavior::Fail => Err(OCRError::invalid_input("scripted failure")),
                Behavior::Mismatch => Err(OCRError::dimension_mismatch("lstm1", 1536, 2560)),
                Behavior::Panic => panic!("scripted panic"),
                Behavior::Sleep(d) => {
                    thread::sleep(*d);
                    Ok(Some(ranked("一二三四五")))
                }
                Behavior::Malformed => {
                    let mut result = ranked("一二三四五");
                    result.candidates.pop();
                    Ok(Some(result))
                }
            }
        }
    }

    fn chain(strategies: Vec<Arc<dyn RecognitionStrategy>>, timeout_ms: Option<u64>) -> FallbackChain {
        FallbackChain::new(strategies, terminal(), AttemptBoundary::from_millis(timeout_ms))
    }

    fn request() -> Arc<GlyphRequest> {
        Arc::new(GlyphRequest::default())
    }

    #[test]
    fn test_first_answer_wins() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Answer("人大天太犬"));
        let engine = Scripted::new(StrategyKind::AlternateEngine, Behavior::Answer("一二三四五"));
        let chain = chain(vec![model.clone(), engine.clone()], Some(1_000));
        let outcome = chain.run(request());
        assert_eq!(outcome.tier, StrategyKind::Model);
        assert_eq!(outcome.prediction.result, '人');
        assert!(outcome.trail.is_empty());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_moves_to_next_tier() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Fail);
        let engine = Scripted::new(StrategyKind::AlternateEngine, Behavior::Answer("一二三四五"));
        let outcome = chain(vec![model, engine], None).run(request());
        assert_eq!(outcome.tier, StrategyKind::AlternateEngine);
        assert_eq!(outcome.trail.len(), 1);
        assert!(matches!(
            outcome.trail[0].status,
            TierStatus::Failed { hard: false, .. }
        ));
    }

    #[test]
    fn test_exhaustion_uses_substitute() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Fail);
        let engine = Scripted::new(StrategyKind::AlternateEngine, Behavior::Nothing);
        let outcome = chain(vec![model, engine], Some(1_000)).run(request());
        assert_eq!(outcome.tier, StrategyKind::Substitute);
        assert_eq!(outcome.prediction.confidence, 0.7);
        assert!((0.6..=0.7).contains(&outcome.prediction.confidence));
        assert_eq!(outcome.prediction.candidates.len(), CANDIDATE_COUNT);
        assert!(outcome.prediction.check_invariants().is_ok());
    }

    #[test]
    fn test_unavailable_engine_lowers_substitute_confidence() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Nothing);
        let engine = Scripted::unavailable(StrategyKind::AlternateEngine);
        let outcome = chain(vec![model, engine.clone()], None).run(request());
        assert_eq!(outcome.prediction.confidence, 0.6);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.trail[1].status, TierStatus::Unavailable);
    }

    #[test]
    fn test_dimension_mismatch_is_reported_hard() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Mismatch);
        let outcome = chain(vec![model], None).run(request());
        assert_eq!(outcome.tier, StrategyKind::Substitute);
        assert!(outcome.trail[0].is_hard_failure());
    }

    #[test]
    fn test_panic_is_a_failure_inline_and_bounded() {
        for timeout in [None, Some(1_000)] {
            let model = Scripted::new(StrategyKind::Model, Behavior::Panic);
            let engine = Scripted::new(StrategyKind::AlternateEngine, Behavior::Answer("一二三四五"));
            let outcome = chain(vec![model, engine], timeout).run(request());
            assert_eq!(outcome.tier, StrategyKind::AlternateEngine);
            assert!(matches!(outcome.trail[0].status, TierStatus::Failed { .. }));
        }
    }

    #[test]
    fn test_timeout_is_a_failure() {
        let model = Scripted::new(
            StrategyKind::Model,
            Behavior::Sleep(Duration::from_millis(500)),
        );
        let started = Instant::now();
        let outcome = chain(vec![model], Some(20)).run(request());
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(outcome.tier, StrategyKind::Substitute);
        match &outcome.trail[0].status {
            TierStatus::Failed { message, hard } => {
                assert!(!hard);
                assert!(message.contains("attempt boundary"));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_malformed_result_counts_as_failure() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Malformed);
        let outcome = chain(vec![model], None).run(request());
        assert_eq!(outcome.tier, StrategyKind::Substitute);
        assert!(outcome.prediction.check_invariants().is_ok());
    }

    #[test]
    fn test_run_from_skips_earlier_tiers() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Answer("人大天太犬"));
        let engine = Scripted::new(StrategyKind::AlternateEngine, Behavior::Answer("一二三四五"));
        let trail = vec![TierReport::new(StrategyKind::Model, TierStatus::Empty)];
        let outcome = chain(vec![model.clone(), engine], None).run_from(request(), trail, 1);
        assert_eq!(outcome.tier, StrategyKind::AlternateEngine);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.trail.len(), 1);
    }

    #[test]
    fn test_boundary_passes_results_through() {
        let boundary = AttemptBoundary::from_millis(Some(1_000));
        assert_eq!(boundary.run("ok", || Ok(7)).unwrap(), 7);
        let err = boundary
            .run::<(), _>("err", || Err(OCRError::invalid_input("bad")))
            .unwrap_err();
        assert!(matches!(err, OCRError::InvalidInput { .. }));
    }

    fn wait_for_idle(boundary: &AttemptBoundary) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while boundary.live_workers() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_hung_workers_stay_capped() {
        let boundary = AttemptBoundary::from_millis(Some(10)).with_max_workers(2);
        let mut gates = Vec::new();
        for i in 0..6 {
            let (gate, held) = mpsc::channel::<()>();
            gates.push(gate);
            let err = boundary
                .run::<(), _>("hung", move || {
                    let _ = held.recv();
                    Ok(())
                })
                .unwrap_err();
            if i < 2 {
                assert!(matches!(err, OCRError::AttemptTimeout { .. }));
            } else {
                assert!(matches!(err, OCRError::AttemptsSaturated { limit: 2, .. }));
            }
            assert!(boundary.live_workers() <= 2);
        }
        assert_eq!(boundary.live_workers(), 2);

        drop(gates);
        wait_for_idle(&boundary);
        assert_eq!(boundary.live_workers(), 0);
        assert_eq!(boundary.run("recovered", || Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_panicking_worker_releases_its_slot() {
        let boundary = AttemptBoundary::from_millis(Some(1_000)).with_max_workers(1);
        assert!(boundary.run::<(), _>("boom", || panic!("worker panic")).is_err());
        wait_for_idle(&boundary);
        assert_eq!(boundary.live_workers(), 0);
        assert_eq!(boundary.run("next", || Ok(1)).unwrap(), 1);
    }

    #[test]
    fn test_saturated_tier_falls_through() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Sleep(Duration::from_millis(300)));
        let boundary = AttemptBoundary::from_millis(Some(10)).with_max_workers(1);
        let chain = FallbackChain::new(vec![model.clone()], terminal(), boundary);

        let first = chain.run(request());
        let second = chain.run(request());
        assert_eq!(second.tier, StrategyKind::Substitute);
        assert!(second.prediction.check_invariants().is_ok());
        match (&first.trail[0].status, &second.trail[0].status) {
            (TierStatus::Failed { message: timed_out, .. }, TierStatus::Failed { message, hard }) => {
                assert!(timed_out.contains("attempt boundary"));
                assert!(message.contains("attempt workers"));
                assert!(!hard);
            }
            other => panic!("unexpected statuses {:?}", other),
        }
        wait_for_idle(chain.boundary());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tiers_end_with_substitute() {
        let model = Scripted::new(StrategyKind::Model, Behavior::Nothing);
        assert_eq!(
            chain(vec![model], None).tiers(),
            vec![StrategyKind::Model, StrategyKind::Substitute]
        );
    }
}
