//! Causal backtest replay.
//!
//! Replays a window of historical draws through the prediction pipeline.
//! For every step the candidates are ranked from a snapshot holding only
//! the draws before it; the actual draw is compared against the ranking
//! and only then applied to the model state.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::summary::BacktestSummary;
use crate::engine::pipeline::{Pipeline, PipelineSettings, PredictionSet};
use crate::generator::CandidateFilters;
use crate::scoring::{ScoredCandidate, ScoringWeights};
use crate::storage::DrawStore;
use crate::tracking::ModelState;
use crate::types::{Draw, EngineError, ErrorKind, GameSpec, HitType};

pub const DEFAULT_TOP_K: usize = 20;
pub const DEFAULT_PROGRESS_EVERY: usize = 50;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag checked once per replay step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Store positions to evaluate: `start..end`, `end` defaulting to the
/// store length. Draws before `start` are applied as warm-up only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestWindow {
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: Option<usize>,
}

impl BacktestWindow {
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    /// Every draw in the store.
    pub fn full() -> Self {
        Self::default()
    }

    /// Concrete `(start, end)` positions for a store of `len` draws.
    pub fn resolve(&self, len: usize) -> Result<(usize, usize), EngineError> {
        let end = self.end.unwrap_or(len);
        if end > len {
            return Err(EngineError::Validation(format!(
                "backtest window ends at {end} but the store holds {len} draws"
            )));
        }
        if self.start > end {
            return Err(EngineError::Validation(format!(
                "backtest window {}..{end} is reversed",
                self.start
            )));
        }
        Ok((self.start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestConfig {
    /// Size of the predicted set each step is judged against.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Steps between progress callbacks.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_progress_every() -> usize {
    DEFAULT_PROGRESS_EVERY
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            progress_every: default_progress_every(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.top_k == 0 {
            return Err(EngineError::Validation("top_k must be at least 1".into()));
        }
        if self.progress_every == 0 {
            return Err(EngineError::Validation("progress_every must be at least 1".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub label: String,
    /// Steps evaluated so far, including any before a resume.
    pub completed: usize,
    pub total: usize,
    pub last_index: u64,
    pub hits: usize,
}

/// Outcome of one replay step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub draw_index: u64,
    pub actual: Vec<u8>,
    /// 1-based position of the actual straight in the full ranking.
    pub rank_of_actual: Option<usize>,
    pub top_k: Vec<ScoredCandidate>,
    pub hit_type: HitType,
    /// Generation hit its candidate bound this step.
    pub truncated: bool,
    pub candidates_scored: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReplayState {
    Uninitialized,
    Replaying { position: usize, index: u64 },
    Completed,
    Cancelled { resume_from: usize },
    Aborted { index: Option<u64>, kind: ErrorKind },
}

/// Everything needed to continue a cancelled run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// First store position not yet evaluated.
    pub next_position: usize,
    pub window: BacktestWindow,
    /// Settings `records` were produced under. A resume must match them.
    pub settings: PipelineSettings,
    pub weights: ScoringWeights,
    pub filters: CandidateFilters,
    pub config: BacktestConfig,
    /// Model state holding exactly the draws before `next_position`.
    pub state: ModelState,
    pub records: Vec<BacktestRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub label: String,
    pub game: GameSpec,
    pub weights: ScoringWeights,
    pub config: BacktestConfig,
    pub window: BacktestWindow,
    pub records: Vec<BacktestRecord>,
    pub summary: BacktestSummary,
    /// Present when the run was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
}

impl BacktestReport {
    pub fn is_complete(&self) -> bool {
        self.summary.complete
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Backtest aborted at draw {index:?} (position {position}): {kind}: {message}")]
pub struct BacktestError {
    /// Draw being evaluated, if the failure is tied to one.
    pub index: Option<u64>,
    pub position: usize,
    pub kind: ErrorKind,
    pub message: String,
}

impl BacktestError {
    fn new(index: Option<u64>, position: usize, err: EngineError) -> Self {
        Self {
            index,
            position,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Backtester
// ---------------------------------------------------------------------------

type ProgressFn<'a> = Option<&'a mut dyn FnMut(&Progress)>;

pub struct Backtester {
    label: String,
    pipeline: Pipeline,
    weights: ScoringWeights,
    filters: CandidateFilters,
    config: BacktestConfig,
    replay: ReplayState,
}

impl Backtester {
    pub fn new(
        label: impl Into<String>,
        pipeline: Pipeline,
        weights: ScoringWeights,
        filters: CandidateFilters,
        config: BacktestConfig,
    ) -> Result<Self, EngineError> {
        weights.validate()?;
        filters.validate(pipeline.game())?;
        config.validate()?;
        Ok(Self {
            label: label.into(),
            pipeline,
            weights,
            filters,
            config,
            replay: ReplayState::Uninitialized,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn state(&self) -> &ReplayState {
        &self.replay
    }

    /// Replay `window` of `store` from an empty model.
    pub fn run<S: DrawStore + ?Sized>(
        &mut self,
        store: &S,
        window: BacktestWindow,
        cancel: &CancelToken,
        progress: ProgressFn<'_>,
    ) -> Result<BacktestReport, BacktestError> {
        let (start, end) = window
            .resolve(store.len())
            .map_err(|e| self.abort(None, window.start, e))?;
        let mut state = self.pipeline.fresh_state().map_err(|e| self.abort(None, 0, e))?;

        for position in 0..start {
            let draw = self.draw_at(store, position)?;
            state
                .apply(draw)
                .map_err(|e| self.abort(Some(draw.index), position, e))?;
        }
        debug!(label = %self.label, warm_up = start, "Warm-up applied");

        self.replay(store, window, start, end, state, Vec::new(), cancel, progress)
    }

    /// Continue a cancelled run from its checkpoint.
    pub fn resume<S: DrawStore + ?Sized>(
        &mut self,
        store: &S,
        checkpoint: Checkpoint,
        cancel: &CancelToken,
        progress: ProgressFn<'_>,
    ) -> Result<BacktestReport, BacktestError> {
        if let Some(setting) = self.setting_mismatch(&checkpoint) {
            let err = EngineError::StateIntegrity {
                index: checkpoint.state.last_applied(),
                message: format!("checkpoint was recorded with different {setting}"),
            };
            return Err(self.abort(None, checkpoint.next_position, err));
        }
        let Checkpoint {
            next_position,
            window,
            state,
            records,
            ..
        } = checkpoint;
        let (start, end) = window
            .resolve(store.len())
            .map_err(|e| self.abort(None, next_position, e))?;

        if state.game() != self.pipeline.game() {
            let err = EngineError::Validation(format!(
                "checkpoint is for {}, backtester is for {}",
                state.game(),
                self.pipeline.game()
            ));
            return Err(self.abort(None, next_position, err));
        }
        state
            .check_integrity()
            .map_err(|e| self.abort(None, next_position, e))?;
        if next_position < start || next_position > end || records.len() != next_position - start {
            let err = EngineError::StateIntegrity {
                index: state.last_applied(),
                message: format!(
                    "checkpoint at position {next_position} with {} records \
                     does not fit window {start}..{end}",
                    records.len()
                ),
            };
            return Err(self.abort(None, next_position, err));
        }
        let expected_last = match next_position {
            0 => None,
            p => Some(self.draw_at(store, p - 1)?.index),
        };
        if state.last_applied() != expected_last {
            let err = EngineError::StateIntegrity {
                index: state.last_applied(),
                message: format!(
                    "checkpoint state ends at {:?} but the store has {expected_last:?} \
                     before position {next_position}",
                    state.last_applied()
                ),
            };
            return Err(self.abort(None, next_position, err));
        }

        info!(label = %self.label, next_position, "Resuming backtest");
        self.replay(store, window, next_position, end, state, records, cancel, progress)
    }

    /// First run setting that differs from the checkpoint's. `progress_every`
    /// is not compared.
    fn setting_mismatch(&self, checkpoint: &Checkpoint) -> Option<&'static str> {
        if checkpoint.settings != self.pipeline.settings() {
            Some("pipeline settings")
        } else if checkpoint.weights != self.weights {
            Some("scoring weights")
        } else if checkpoint.filters != self.filters {
            Some("candidate filters")
        } else if checkpoint.config.top_k != self.config.top_k {
            Some("top_k")
        } else {
            None
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn replay<S: DrawStore + ?Sized>(
        &mut self,
        store: &S,
        window: BacktestWindow,
        from: usize,
        end: usize,
        mut state: ModelState,
        mut records: Vec<BacktestRecord>,
        cancel: &CancelToken,
        mut progress: ProgressFn<'_>,
    ) -> Result<BacktestReport, BacktestError> {
        let total = end - window.start;
        let mut hits = records.iter().filter(|r| r.hit_type.is_hit()).count();
        info!(label = %self.label, from, end, top_k = self.config.top_k, "Backtest started");

        for position in from..end {
            if cancel.is_cancelled() {
                self.replay = ReplayState::Cancelled { resume_from: position };
                warn!(
                    label = %self.label,
                    position,
                    evaluated = records.len(),
                    "Backtest cancelled"
                );
                let checkpoint = Checkpoint {
                    next_position: position,
                    window,
                    settings: self.pipeline.settings(),
                    weights: self.weights,
                    filters: self.filters.clone(),
                    config: self.config.clone(),
                    state,
                    records: records.clone(),
                };
                return Ok(self.report(window, records, false, Some(checkpoint)));
            }

            let draw = self.draw_at(store, position)?;
            self.replay = ReplayState::Replaying {
                position,
                index: draw.index,
            };

            let ranked = self
                .predict(&state, draw.index)
                .map_err(|e| self.abort(Some(draw.index), position, e))?;
            let record = self.evaluate(ranked, draw);
            if record.hit_type.is_hit() {
                hits += 1;
            }
            debug!(
                index = draw.index,
                rank = ?record.rank_of_actual,
                hit = %record.hit_type,
                "Backtest step"
            );
            records.push(record);

            state
                .apply(draw)
                .map_err(|e| self.abort(Some(draw.index), position, e))?;

            let completed = records.len();
            if completed % self.config.progress_every == 0 && completed < total {
                self.emit(&mut progress, completed, total, draw.index, hits);
            }
        }

        let last_index = state.last_applied().unwrap_or_default();
        self.emit(&mut progress, records.len(), total, last_index, hits);
        self.replay = ReplayState::Completed;

        let report = self.report(window, records, true, None);
        info!(
            label = %self.label,
            steps = report.summary.total_steps,
            containment = report.summary.containment_rate,
            mean_rank = ?report.summary.mean_rank,
            "Backtest completed"
        );
        Ok(report)
    }

    /// Rank candidates for draw `index` from a snapshot of the draws before it.
    fn predict(&self, state: &ModelState, index: u64) -> Result<PredictionSet, EngineError> {
        let snapshot = state.snapshot();
        snapshot.ensure_before(index)?;
        self.pipeline.rank(&snapshot, &self.weights, &self.filters)
    }

    fn evaluate(&self, ranked: PredictionSet, draw: &Draw) -> BacktestRecord {
        let rank_of_actual = ranked.rank_of(&draw.symbols);
        let truncated = ranked.truncation.is_some();
        let candidates_scored = ranked.candidates.len();
        let top_k = ranked.into_top(self.config.top_k).candidates;
        let hit_type = HitType::classify(&draw.symbols, top_k.iter().map(|c| c.symbols.as_slice()));
        BacktestRecord {
            draw_index: draw.index,
            actual: draw.symbols.clone(),
            rank_of_actual,
            top_k,
            hit_type,
            truncated,
            candidates_scored,
        }
    }

    fn emit(
        &self,
        progress: &mut ProgressFn<'_>,
        completed: usize,
        total: usize,
        last_index: u64,
        hits: usize,
    ) {
        if let Some(report) = progress.as_deref_mut() {
            report(&Progress {
                label: self.label.clone(),
                completed,
                total,
                last_index,
                hits,
            });
        }
    }

    fn draw_at<'s, S: DrawStore + ?Sized>(
        &mut self,
        store: &'s S,
        position: usize,
    ) -> Result<&'s Draw, BacktestError> {
        match store.get(position) {
            Some(draw) => Ok(draw),
            None => {
                let err = EngineError::StateIntegrity {
                    index: None,
                    message: format!("draw store has no draw at position {position}"),
                };
                Err(self.abort(None, position, err))
            }
        }
    }

    fn abort(&mut self, index: Option<u64>, position: usize, err: EngineError) -> BacktestError {
        let error = BacktestError::new(index, position, err);
        warn!(
            label = %self.label,
            position,
            kind = %error.kind,
            error = %error.message,
            "Backtest aborted"
        );
        self.replay = ReplayState::Aborted {
            index,
            kind: error.kind,
        };
        error
    }

    fn report(
        &self,
        window: BacktestWindow,
        records: Vec<BacktestRecord>,
        complete: bool,
        checkpoint: Option<Checkpoint>,
    ) -> BacktestReport {
        let summary = BacktestSummary::from_records(
            &records,
            self.config.top_k,
            self.pipeline.game().space_size(),
            complete,
        );
        BacktestReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            label: self.label.clone(),
            game: self.pipeline.game().clone(),
            weights: self.weights,
            config: self.config.clone(),
            window,
            records,
            summary,
            checkpoint,
        }
    }
}

/// Run independent backtests over the same history in parallel.
/// Each job owns its own model state; results come back in job order.
pub fn run_parallel<S: DrawStore + Sync + ?Sized>(
    jobs: &mut [Backtester],
    store: &S,
    window: BacktestWindow,
    cancel: &CancelToken,
) -> Vec<Result<BacktestReport, BacktestError>> {
    info!(jobs = jobs.len(), "Running parallel backtests");
    jobs.par_iter_mut()
        .map(|job| job.run(store, window, cancel, None))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pipeline::PipelineSettings;
    use crate::scoring::Factor;
    use crate::storage::MemoryDrawStore;

    /// Deterministic pseudo-random pick-3 history.
    fn history(n: usize) -> MemoryDrawStore {
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let draws = (0..n).map(|i| {
            let symbols = (0..3)
                .map(|_| {
                    seed = seed
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407);
                    ((seed >> 33) % 10) as u8
                })
                .collect();
            Draw::new(1000 + i as u64, symbols)
        });
        MemoryDrawStore::from_draws(Some(GameSpec::pick3()), draws).unwrap()
    }

    fn backtester_with(label: &str, weights: ScoringWeights, config: BacktestConfig) -> Backtester {
        let pipeline = Pipeline::new(PipelineSettings::new(GameSpec::pick3())).unwrap();
        Backtester::new(label, pipeline, weights, CandidateFilters::default(), config).unwrap()
    }

    fn backtester(label: &str, weights: ScoringWeights) -> Backtester {
        backtester_with(label, weights, BacktestConfig::default())
    }

    fn cancelled_checkpoint(store: &MemoryDrawStore, bt: &mut Backtester) -> Checkpoint {
        let cancel = CancelToken::new();
        cancel.cancel();
        bt.run(store, BacktestWindow::new(5, None), &cancel, None)
            .unwrap()
            .checkpoint
            .unwrap()
    }

    /// Store whose reported length runs past the draws it can return.
    struct ShortStore {
        inner: MemoryDrawStore,
        claimed: usize,
    }

    impl DrawStore for ShortStore {
        fn len(&self) -> usize {
            self.claimed
        }

        fn get(&self, position: usize) -> Option<&Draw> {
            self.inner.get(position)
        }
    }

    #[test]
    fn test_window_resolution() {
        assert_eq!(BacktestWindow::full().resolve(10).unwrap(), (0, 10));
        assert_eq!(BacktestWindow::new(3, Some(7)).resolve(10).unwrap(), (3, 7));
        assert!(BacktestWindow::new(0, Some(11)).resolve(10).is_err());
        assert!(BacktestWindow::new(8, Some(5)).resolve(10).is_err());
    }

    #[test]
    fn test_run_produces_one_record_per_step() {
        let store = history(40);
        let mut bt = backtester("uniform", ScoringWeights::uniform());
        let report = bt
            .run(&store, BacktestWindow::new(10, None), &CancelToken::new(), None)
            .unwrap();

        assert_eq!(report.records.len(), 30);
        assert_eq!(report.records[0].draw_index, 1010);
        assert_eq!(report.records[29].draw_index, 1039);
        for record in &report.records {
            assert_eq!(record.top_k.len(), 20);
            assert_eq!(record.candidates_scored, 1000);
            let rank = record.rank_of_actual.unwrap();
            assert!((1..=1000).contains(&rank));
            assert_eq!(record.hit_type == HitType::Straight, rank <= 20);
        }
        assert!(report.is_complete());
        assert!(report.checkpoint.is_none());
        assert_eq!(bt.state(), &ReplayState::Completed);
    }

    #[test]
    fn test_empty_window_completes() {
        let store = history(5);
        let mut bt = backtester("empty", ScoringWeights::uniform());
        let report = bt
            .run(&store, BacktestWindow::new(5, None), &CancelToken::new(), None)
            .unwrap();
        assert!(report.records.is_empty());
        assert!(report.is_complete());
    }

    #[test]
    fn test_progress_reported() {
        let store = history(12);
        let config = BacktestConfig {
            top_k: 5,
            progress_every: 4,
        };
        let mut bt = backtester_with("progress", ScoringWeights::uniform(), config);
        let mut seen = Vec::new();
        let mut on_progress = |p: &Progress| seen.push((p.completed, p.total));
        bt.run(&store, BacktestWindow::new(2, None), &CancelToken::new(), Some(&mut on_progress))
            .unwrap();
        assert_eq!(seen, vec![(4, 10), (8, 10), (10, 10)]);
    }

    #[test]
    fn test_cancel_and_resume_matches_uninterrupted_run() {
        let store = history(30);
        let window = BacktestWindow::new(5, None);
        let weights = ScoringWeights::only(Factor::SkipPressure);

        let mut straight_through = backtester("a", weights);
        let expected = straight_through.run(&store, window, &CancelToken::new(), None).unwrap();

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut on_progress = |p: &Progress| {
            if p.completed == 10 {
                trigger.cancel();
            }
        };
        let config = BacktestConfig {
            top_k: DEFAULT_TOP_K,
            progress_every: 5,
        };
        let mut interrupted = backtester_with("b", weights, config);
        let partial = interrupted.run(&store, window, &cancel, Some(&mut on_progress)).unwrap();

        assert!(!partial.is_complete());
        assert_eq!(partial.records.len(), 10);
        assert_eq!(interrupted.state(), &ReplayState::Cancelled { resume_from: 15 });
        let checkpoint = partial.checkpoint.unwrap();
        assert_eq!(checkpoint.next_position, 15);
        assert_eq!(checkpoint.state.last_applied(), Some(1014));

        let resumed = interrupted
            .resume(&store, checkpoint, &CancelToken::new(), None)
            .unwrap();
        assert!(resumed.is_complete());
        assert_eq!(resumed.records, expected.records);
    }

    #[test]
    fn test_cancel_before_first_step() {
        let store = history(10);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut bt = backtester("cancelled", ScoringWeights::uniform());
        let report = bt.run(&store, BacktestWindow::new(3, None), &cancel, None).unwrap();
        assert!(report.records.is_empty());
        let checkpoint = report.checkpoint.unwrap();
        assert_eq!(checkpoint.next_position, 3);
        assert_eq!(checkpoint.state.draws_applied(), 3);
    }

    #[test]
    fn test_resume_rejects_foreign_store() {
        let store = history(20);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut bt = backtester("a", ScoringWeights::uniform());
        let checkpoint = bt
            .run(&store, BacktestWindow::new(5, None), &cancel, None)
            .unwrap()
            .checkpoint
            .unwrap();

        let shifted = MemoryDrawStore::from_draws(
            None,
            store.iter().map(|d| Draw::new(d.index + 500, d.symbols.clone())),
        )
        .unwrap();
        let err = bt.resume(&shifted, checkpoint, &CancelToken::new(), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateIntegrity);
        assert!(matches!(bt.state(), ReplayState::Aborted { .. }));
    }

    #[test]
    fn test_invalid_window_aborts() {
        let store = history(5);
        let mut bt = backtester("a", ScoringWeights::uniform());
        let err = bt
            .run(&store, BacktestWindow::new(0, Some(9)), &CancelToken::new(), None)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.index, None);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let pipeline = Pipeline::new(PipelineSettings::new(GameSpec::pick3())).unwrap();
        let config = BacktestConfig {
            top_k: 0,
            progress_every: 1,
        };
        let (weights, filters) = (ScoringWeights::uniform(), CandidateFilters::default());
        assert!(Backtester::new("bad", pipeline, weights, filters, config).is_err());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let store = history(25);
        let window = BacktestWindow::new(5, None);
        let mut jobs = vec![
            backtester("uniform", ScoringWeights::uniform()),
            backtester("skip", ScoringWeights::only(Factor::SkipPressure)),
            backtester("columns", ScoringWeights::only(Factor::ColumnRouting)),
        ];
        let parallel = run_parallel(&mut jobs, &store, window, &CancelToken::new());

        for (job, result) in jobs.iter().zip(&parallel) {
            let mut solo = backtester(job.label(), *job.weights());
            let sequential = solo.run(&store, window, &CancelToken::new(), None).unwrap();
            let report = result.as_ref().unwrap();
            assert_eq!(report.label, job.label());
            assert_eq!(report.records, sequential.records);
        }
    }

    #[test]
    fn test_resume_rejects_changed_weights() {
        let store = history(20);
        let mut original = backtester("skip", ScoringWeights::only(Factor::SkipPressure));
        let checkpoint = cancelled_checkpoint(&store, &mut original);

        let mut other = backtester("columns", ScoringWeights::only(Factor::ColumnRouting));
        let err = other.resume(&store, checkpoint, &CancelToken::new(), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateIntegrity);
        assert!(err.message.contains("scoring weights"), "{}", err.message);
    }

    #[test]
    fn test_resume_rejects_changed_pipeline_and_top_k() {
        let store = history(20);
        let mut original = backtester("a", ScoringWeights::uniform());
        let checkpoint = cancelled_checkpoint(&store, &mut original);

        let mut settings = PipelineSettings::new(GameSpec::pick3());
        settings.generator.max_candidates = 500;
        let pipeline = Pipeline::new(settings).unwrap();
        let mut narrower = Backtester::new(
            "a",
            pipeline,
            ScoringWeights::uniform(),
            CandidateFilters::default(),
            BacktestConfig::default(),
        )
        .unwrap();
        let err = narrower
            .resume(&store, checkpoint.clone(), &CancelToken::new(), None)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateIntegrity);
        assert!(err.message.contains("pipeline settings"), "{}", err.message);

        let config = BacktestConfig {
            top_k: 5,
            ..BacktestConfig::default()
        };
        let mut smaller = backtester_with("a", ScoringWeights::uniform(), config);
        let err = smaller
            .resume(&store, checkpoint.clone(), &CancelToken::new(), None)
            .unwrap_err();
        assert!(err.message.contains("top_k"), "{}", err.message);

        // Progress cadence alone does not block a resume.
        let config = BacktestConfig {
            progress_every: 3,
            ..BacktestConfig::default()
        };
        let mut chattier = backtester_with("a", ScoringWeights::uniform(), config);
        assert!(chattier.resume(&store, checkpoint, &CancelToken::new(), None).is_ok());
    }

    #[test]
    fn test_resume_rejects_malformed_state_without_panicking() {
        let store = history(20);
        let mut bt = backtester("a", ScoringWeights::uniform());
        let checkpoint = cancelled_checkpoint(&store, &mut bt);

        let mut json = serde_json::to_value(&checkpoint).unwrap();
        json["state"]["transitions"]["tables"][0]["counts"] = serde_json::json!([1, 2, 3]);
        let malformed: Checkpoint = serde_json::from_value(json).unwrap();
        let err = bt.resume(&store, malformed, &CancelToken::new(), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateIntegrity);

        let mut json = serde_json::to_value(&checkpoint).unwrap();
        json["state"]["skips"]["first_index"] = serde_json::json!(1_104);
        let inverted: Checkpoint = serde_json::from_value(json).unwrap();
        let err = bt.resume(&store, inverted, &CancelToken::new(), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateIntegrity);
        assert!(matches!(bt.state(), ReplayState::Aborted { .. }));
    }

    #[test]
    fn test_missing_store_draw_is_not_tied_to_a_draw_index() {
        let store = ShortStore {
            inner: history(10),
            claimed: 12,
        };
        let mut bt = backtester("short", ScoringWeights::uniform());
        let err = bt
            .run(&store, BacktestWindow::new(3, None), &CancelToken::new(), None)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateIntegrity);
        assert_eq!(err.position, 10);
        assert_eq!(err.index, None);
        assert_eq!(
            err.message,
            "State integrity error: draw store has no draw at position 10"
        );
    }
}
