//! Generation → scoring pipeline shared by live prediction and backtests.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::generator::{CandidateFilters, CandidateGenerator, GeneratorConfig};
use crate::scoring::{CompositeScorer, ScoredCandidate, ScorerConfig, ScoringWeights};
use crate::tracking::{ModelState, TrackingConfig};
use crate::types::{CapacityExceeded, EngineError, GameSpec};

/// Everything needed to build a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub game: GameSpec,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl PipelineSettings {
    pub fn new(game: GameSpec) -> Self {
        Self {
            game,
            tracking: TrackingConfig::default(),
            scorer: ScorerConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

/// Ranked candidates for one model state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    /// Best first.
    pub candidates: Vec<ScoredCandidate>,
    /// Set when generation hit its bound.
    pub truncation: Option<CapacityExceeded>,
}

impl PredictionSet {
    pub fn top(&self, k: usize) -> &[ScoredCandidate] {
        &self.candidates[..k.min(self.candidates.len())]
    }

    /// Keep only the best `k`.
    pub fn into_top(mut self, k: usize) -> Self {
        self.candidates.truncate(k);
        self
    }

    /// 1-based rank of an exact symbol sequence, if it was generated.
    pub fn rank_of(&self, symbols: &[u8]) -> Option<usize> {
        self.candidates
            .iter()
            .position(|c| c.symbols == symbols)
            .map(|p| p + 1)
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    game: GameSpec,
    tracking: TrackingConfig,
    generator: CandidateGenerator,
    scorer: CompositeScorer,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> Result<Self, EngineError> {
        // Surface tracking errors (alpha, window, lateness) at construction.
        ModelState::new(settings.game.clone(), &settings.tracking)?;
        Ok(Self {
            generator: CandidateGenerator::new(settings.generator)?,
            scorer: CompositeScorer::new(settings.scorer)?,
            game: settings.game,
            tracking: settings.tracking,
        })
    }

    pub fn game(&self) -> &GameSpec {
        &self.game
    }

    /// The settings this pipeline was built from.
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            game: self.game.clone(),
            tracking: self.tracking.clone(),
            scorer: self.scorer.config().clone(),
            generator: self.generator.config().clone(),
        }
    }

    pub fn generator(&self) -> &CandidateGenerator {
        &self.generator
    }

    pub fn scorer(&self) -> &CompositeScorer {
        &self.scorer
    }

    /// Empty model state configured for this pipeline.
    pub fn fresh_state(&self) -> Result<ModelState, EngineError> {
        ModelState::new(self.game.clone(), &self.tracking)
    }

    /// Generate and rank every candidate for `state`.
    pub fn rank(
        &self,
        state: &ModelState,
        weights: &ScoringWeights,
        filters: &CandidateFilters,
    ) -> Result<PredictionSet, EngineError> {
        if state.game() != &self.game {
            return Err(EngineError::Validation(format!(
                "model state is for {}, pipeline is for {}",
                state.game(),
                self.game
            )));
        }
        let generated = self.generator.generate(state, filters)?;
        let candidates = self.scorer.rank(&generated.candidates, state, weights)?;
        debug!(
            ranked = candidates.len(),
            truncated = generated.truncation.is_some(),
            "Candidates ranked"
        );
        Ok(PredictionSet {
            candidates,
            truncation: generated.truncation,
        })
    }
}
