//! Prediction engine: the collaborator-facing facade.
//!
//! Owns the live model state. History flows in through `ingest`; ranked
//! predictions, skip lookups and column distributions are read from the
//! current state without mutating it. Backtests replay a store on their
//! own state and never touch the live one.

pub mod pipeline;

use tracing::{debug, info};

use crate::backtest::{
    BacktestConfig, BacktestError, BacktestReport, BacktestWindow, Backtester, CancelToken,
    Progress,
};
use crate::features::FeatureKey;
use crate::generator::CandidateFilters;
use crate::scoring::ScoringWeights;
use crate::storage::DrawStore;
use crate::tracking::skip::SkipLookup;
use crate::tracking::transition::{Distribution, PartialPrediction};
use crate::tracking::{ModelSnapshot, ModelState};
use crate::types::{Draw, EngineError, GameSpec};
use pipeline::{Pipeline, PipelineSettings, PredictionSet};

pub struct PredictionEngine {
    pipeline: Pipeline,
    state: ModelState,
    backtest: BacktestConfig,
}

impl PredictionEngine {
    pub fn new(settings: PipelineSettings) -> Result<Self, EngineError> {
        let pipeline = Pipeline::new(settings)?;
        let state = pipeline.fresh_state()?;
        Ok(Self {
            pipeline,
            state,
            backtest: BacktestConfig::default(),
        })
    }

    pub fn with_backtest_config(mut self, config: BacktestConfig) -> Result<Self, EngineError> {
        config.validate()?;
        self.backtest = config;
        Ok(self)
    }

    pub fn game(&self) -> &GameSpec {
        self.pipeline.game()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        self.state.snapshot()
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Apply the next draw to the live state.
    pub fn ingest(&mut self, draw: &Draw) -> Result<(), EngineError> {
        self.state.apply(draw)?;
        debug!(index = draw.index, "Draw ingested");
        Ok(())
    }

    /// Apply every draw in `store` after the last one ingested.
    /// Returns how many draws were applied.
    pub fn ingest_store<S: DrawStore + ?Sized>(&mut self, store: &S) -> Result<usize, EngineError> {
        let last = self.state.last_applied();
        let mut applied = 0;
        for draw in store.iter() {
            if last.is_some_and(|last| draw.index <= last) {
                continue;
            }
            self.state.apply(draw)?;
            applied += 1;
        }
        info!(
            applied,
            total = self.state.draws_applied(),
            last = ?self.state.last_applied(),
            "Draw history ingested"
        );
        Ok(applied)
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The `k` best candidates for the next draw.
    pub fn top_predictions(
        &self,
        k: usize,
        weights: &ScoringWeights,
        filters: &CandidateFilters,
    ) -> Result<PredictionSet, EngineError> {
        if k == 0 {
            return Err(EngineError::Validation("k must be at least 1".into()));
        }
        let snapshot = self.state.snapshot();
        Ok(self.pipeline.rank(&snapshot, weights, filters)?.into_top(k))
    }

    pub fn feature_skip_info(&self, key: &FeatureKey) -> SkipLookup {
        self.state.skips().query(key)
    }

    pub fn column_prediction(&self, position: usize) -> Result<Distribution, EngineError> {
        self.state.transitions().predict(position)
    }

    pub fn partial_prediction(&self, k: usize) -> PartialPrediction {
        self.state.transitions().predict_partial(k)
    }

    // -----------------------------------------------------------------------
    // Backtesting
    // -----------------------------------------------------------------------

    /// A backtester sharing this engine's pipeline and backtest settings.
    pub fn backtester(
        &self,
        label: impl Into<String>,
        weights: ScoringWeights,
        filters: CandidateFilters,
    ) -> Result<Backtester, EngineError> {
        Backtester::new(label, self.pipeline.clone(), weights, filters, self.backtest.clone())
    }

    /// Replay `window` of `store` on a fresh model state.
    pub fn run_backtest<S: DrawStore + ?Sized>(
        &self,
        store: &S,
        window: BacktestWindow,
        weights: ScoringWeights,
        filters: CandidateFilters,
        cancel: &CancelToken,
        progress: Option<&mut dyn FnMut(&Progress)>,
    ) -> Result<BacktestReport, BacktestError> {
        let mut backtester = self
            .backtester("backtest", weights, filters)
            .map_err(|e| BacktestError {
                index: None,
                position: window.start,
                kind: e.kind(),
                message: e.to_string(),
            })?;
        backtester.run(store, window, cancel, progress)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
