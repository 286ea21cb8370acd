//! Composite scoring: turns model state into one ranked score per candidate.
//!
//! Each factor produces a sub-score in `[0, 1]`; the composite is the
//! weighted mean rescaled to `0–100`. Per-pass inputs (column distributions,
//! pattern posteriors, the sum band) are computed once in a
//! [`ScoringPass`] and reused for every candidate.

pub mod weights;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use crate::features::{sum_distribution, ClassScheme, FeatureKey};
use crate::tracking::skip::SkipInfo;
use crate::tracking::transition::Distribution;
use crate::tracking::ModelState;
use crate::types::{format_symbols, sorted_symbols, symbol_sum, EngineError};
pub use weights::{Factor, ScoringWeights};

/// Composite scores are reported on `0..=COMPOSITE_SCALE`.
pub const COMPOSITE_SCALE: f64 = 100.0;

/// Beta(1, 1) prior for the type-score posterior.
const BETA_ALPHA: f64 = 1.0;
const BETA_BETA: f64 = 1.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScorerConfig {
    /// Class schemes averaged into the type score.
    #[serde(default = "default_schemes")]
    pub type_schemes: Vec<ClassScheme>,
    /// Width of the sum band, in sum values.
    #[serde(default = "default_band_width")]
    pub sum_band_width: u16,
    /// Pseudo-draws of theoretical sum probability mixed into observed sum hits.
    #[serde(default = "default_prior_strength")]
    pub sum_prior_strength: f64,
}

fn default_schemes() -> Vec<ClassScheme> {
    vec![ClassScheme::Parity, ClassScheme::HighLow]
}

fn default_band_width() -> u16 {
    3
}

fn default_prior_strength() -> f64 {
    10.0
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            type_schemes: default_schemes(),
            sum_band_width: default_band_width(),
            sum_prior_strength: default_prior_strength(),
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.type_schemes.is_empty() {
            return Err(EngineError::Validation(
                "type_schemes must name at least one scheme".into(),
            ));
        }
        if self.sum_band_width == 0 {
            return Err(EngineError::Validation("sum_band_width must be at least 1".into()));
        }
        if !self.sum_prior_strength.is_finite() || self.sum_prior_strength < 0.0 {
            return Err(EngineError::Validation(format!(
                "sum_prior_strength must be finite and non-negative, got {}",
                self.sum_prior_strength
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scored candidates
// ---------------------------------------------------------------------------

/// Per-factor sub-scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub type_score: f64,
    pub skip_pressure: f64,
    pub column_routing: f64,
    pub pair_coverage: f64,
    pub sum_proximity: f64,
}

impl FactorScores {
    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::TypeScore => self.type_score,
            Factor::SkipPressure => self.skip_pressure,
            Factor::ColumnRouting => self.column_routing,
            Factor::PairCoverage => self.pair_coverage,
            Factor::SumProximity => self.sum_proximity,
        }
    }

    fn composite(&self, weights: &ScoringWeights) -> f64 {
        let weighted: f64 = Factor::ALL
            .iter()
            .map(|f| weights.get(*f) * self.get(*f))
            .sum();
        weighted / weights.total() * COMPOSITE_SCALE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub symbols: Vec<u8>,
    pub scores: FactorScores,
    pub composite: f64,
}

impl ScoredCandidate {
    pub fn label(&self) -> String {
        format_symbols(&self.symbols)
    }
}

/// Total ranking order: composite desc, skip pressure desc, symbols asc.
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.composite
        .total_cmp(&a.composite)
        .then_with(|| b.scores.skip_pressure.total_cmp(&a.scores.skip_pressure))
        .then_with(|| a.symbols.cmp(&b.symbols))
}

/// Sort in ranking order.
pub fn sort_ranked(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(rank_order);
}

// ---------------------------------------------------------------------------
// Sum band
// ---------------------------------------------------------------------------

/// Inclusive range of sums with the highest smoothed mass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumBand {
    pub low: u16,
    pub high: u16,
}

impl SumBand {
    pub fn distance(&self, sum: u16) -> u16 {
        if sum < self.low {
            self.low - sum
        } else if sum > self.high {
            sum - self.high
        } else {
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CompositeScorer {
    config: ScorerConfig,
}

impl CompositeScorer {
    pub fn new(config: ScorerConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Precompute the per-pass inputs for `state`.
    pub fn prepare<'a>(
        &'a self,
        state: &'a ModelState,
        weights: &ScoringWeights,
    ) -> Result<ScoringPass<'a>, EngineError> {
        weights.validate()?;

        let columns = state.transitions().predict_all();

        let window = state.patterns().len() as f64;
        let type_posteriors = self
            .config
            .type_schemes
            .iter()
            .map(|scheme| {
                PatternPosteriors::new(*scheme, state.patterns().pattern_counts(*scheme), window)
            })
            .collect();

        let sum_band = self.sum_band(state)?;
        debug!(
            draws = state.draws_applied(),
            band_low = sum_band.low,
            band_high = sum_band.high,
            "Scoring pass prepared"
        );

        Ok(ScoringPass {
            state,
            weights: *weights,
            columns,
            type_posteriors,
            sum_band,
        })
    }

    /// Score a single candidate.
    pub fn score(
        &self,
        symbols: &[u8],
        state: &ModelState,
        weights: &ScoringWeights,
    ) -> Result<ScoredCandidate, EngineError> {
        self.prepare(state, weights)?.score(symbols)
    }

    /// Score every candidate and return them in ranking order.
    pub fn rank<I>(
        &self,
        candidates: I,
        state: &ModelState,
        weights: &ScoringWeights,
    ) -> Result<Vec<ScoredCandidate>, EngineError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let pass = self.prepare(state, weights)?;
        let mut scored = candidates
            .into_iter()
            .map(|c| pass.score(c.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        sort_ranked(&mut scored);
        Ok(scored)
    }

    /// Band of `sum_band_width` consecutive sums with the most mass, where
    /// mass is observed hits plus `sum_prior_strength` pseudo-draws of the
    /// theoretical distribution. Ties go to the lowest band.
    fn sum_band(&self, state: &ModelState) -> Result<SumBand, EngineError> {
        let game = state.game();
        let theoretical = sum_distribution(game);
        let masses = theoretical
            .iter()
            .enumerate()
            .map(|(value, p)| {
                let hits = state
                    .skips()
                    .counter(&FeatureKey::Sum { value: value as u16 })?
                    .hit_count;
                Ok(hits as f64 + self.config.sum_prior_strength * p)
            })
            .collect::<Result<Vec<f64>, EngineError>>()?;

        let width = (self.config.sum_band_width as usize).min(masses.len());
        let mut best_low = 0usize;
        let mut best_mass = f64::NEG_INFINITY;
        for (low, band) in masses.windows(width).enumerate() {
            let mass: f64 = band.iter().sum();
            if mass > best_mass {
                best_mass = mass;
                best_low = low;
            }
        }
        Ok(SumBand {
            low: best_low as u16,
            high: (best_low + width - 1) as u16,
        })
    }
}

/// Beta posterior over one scheme's patterns in the recent window. Only
/// observed patterns are stored; every unseen pattern shares the prior floor.
struct PatternPosteriors {
    scheme: ClassScheme,
    counts: HashMap<Vec<u8>, u32>,
    window: f64,
    best: f64,
}

impl PatternPosteriors {
    fn new(scheme: ClassScheme, counts: HashMap<Vec<u8>, u32>, window: f64) -> Self {
        let top = counts.values().copied().max().unwrap_or(0);
        let mut posteriors = Self {
            scheme,
            counts,
            window,
            best: 1.0,
        };
        posteriors.best = posteriors.posterior(top);
        posteriors
    }

    fn posterior(&self, count: u32) -> f64 {
        (count as f64 + BETA_ALPHA) / (self.window + BETA_ALPHA + BETA_BETA)
    }

    /// Posterior of `pattern` relative to the most likely pattern, in `(0, 1]`.
    fn relative(&self, pattern: &[u8]) -> f64 {
        let count = self.counts.get(pattern).copied().unwrap_or(0);
        self.posterior(count) / self.best
    }
}

/// Per-pass cache bound to one model state and one weight set.
pub struct ScoringPass<'a> {
    state: &'a ModelState,
    weights: ScoringWeights,
    columns: Vec<Distribution>,
    type_posteriors: Vec<PatternPosteriors>,
    sum_band: SumBand,
}

impl ScoringPass<'_> {
    pub fn sum_band(&self) -> SumBand {
        self.sum_band
    }

    pub fn columns(&self) -> &[Distribution] {
        &self.columns
    }

    /// Score one candidate. Malformed candidates are rejected, never scored as zero.
    pub fn score(&self, symbols: &[u8]) -> Result<ScoredCandidate, EngineError> {
        self.state.game().validate_symbols(symbols)?;

        let scores = FactorScores {
            type_score: self.type_score(symbols),
            skip_pressure: self.skip_pressure(symbols)?,
            column_routing: self.column_routing(symbols),
            pair_coverage: self.pair_coverage(symbols)?,
            sum_proximity: self.sum_proximity(symbols),
        };
        Ok(ScoredCandidate {
            symbols: symbols.to_vec(),
            composite: scores.composite(&self.weights),
            scores,
        })
    }

    fn type_score(&self, symbols: &[u8]) -> f64 {
        let game = self.state.game();
        let total: f64 = self
            .type_posteriors
            .iter()
            .map(|posteriors| posteriors.relative(&posteriors.scheme.pattern(game, symbols)))
            .sum();
        total / self.type_posteriors.len() as f64
    }

    fn skip_pressure(&self, symbols: &[u8]) -> Result<f64, EngineError> {
        let skips = self.state.skips();
        let mut digits = symbols.to_vec();
        digits.sort_unstable();
        digits.dedup();

        let mut total = 0.0;
        let mut count = 0usize;
        for symbol in digits {
            total += pressure(&skips.info(&FeatureKey::Digit { symbol })?);
            count += 1;
        }
        total += pressure(&skips.info(&FeatureKey::Box {
            symbols: sorted_symbols(symbols),
        })?);
        count += 1;
        Ok(total / count as f64)
    }

    fn column_routing(&self, symbols: &[u8]) -> f64 {
        let mut weighted = 0.0;
        let mut confidence = 0.0;
        for (dist, &symbol) in self.columns.iter().zip(symbols) {
            weighted += dist.confidence * dist.relative(symbol);
            confidence += dist.confidence;
        }
        if confidence <= 0.0 {
            0.0
        } else {
            weighted / confidence
        }
    }

    fn pair_coverage(&self, symbols: &[u8]) -> Result<f64, EngineError> {
        let skips = self.state.skips();
        let draws = skips.draws_applied() as f64;
        let mut total = 0.0;
        let mut count = 0usize;
        for first in 0..symbols.len() {
            for second in first + 1..symbols.len() {
                let key = FeatureKey::PositionalPair {
                    first: first as u8,
                    second: second as u8,
                    a: symbols[first],
                    b: symbols[second],
                };
                let info = skips.info(&key)?;
                let expected_hits = draws * key.probability(self.state.game());
                let ratio = (info.hit_count as f64 + 1.0) / (expected_hits + 1.0);
                let frequency = ratio / (1.0 + ratio);
                total += frequency * (0.5 + 0.5 * pressure(&info));
                count += 1;
            }
        }
        Ok(if count == 0 { 0.5 } else { total / count as f64 })
    }

    fn sum_proximity(&self, symbols: &[u8]) -> f64 {
        1.0 / (1.0 + self.sum_band.distance(symbol_sum(symbols)) as f64)
    }
}

/// Saturating lateness in `(0, 1)`; 0.5 when exactly on expectation.
fn pressure(info: &SkipInfo) -> f64 {
    let ratio = info.lateness_ratio();
    if ratio.is_infinite() {
        return 1.0;
    }
    ratio / (1.0 + ratio)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
