//! Scoring factors and their weights.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::EngineError;

// ---------------------------------------------------------------------------
// Factors
// ---------------------------------------------------------------------------

/// Every factor the composite scorer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    /// Posterior that the candidate's class pattern matches recent draws.
    TypeScore,
    /// Lateness of the candidate's digits and box combination.
    SkipPressure,
    /// Agreement with the per-position transition distributions.
    ColumnRouting,
    /// Skip-adjusted historical frequency of the candidate's positional pairs.
    PairCoverage,
    /// Closeness of the candidate's sum to the most probable sum band.
    SumProximity,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::TypeScore,
        Factor::SkipPressure,
        Factor::ColumnRouting,
        Factor::PairCoverage,
        Factor::SumProximity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Factor::TypeScore => "type_score",
            Factor::SkipPressure => "skip_pressure",
            Factor::ColumnRouting => "column_routing",
            Factor::PairCoverage => "pair_coverage",
            Factor::SumProximity => "sum_proximity",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Factor {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Factor::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s.trim().to_lowercase())
            .ok_or_else(|| EngineError::Validation(format!("unknown scoring factor: {s:?}")))
    }
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Non-negative weight per factor. They need not sum to one; the scorer
/// divides by their total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringWeights {
    #[serde(default = "one")]
    pub type_score: f64,
    #[serde(default = "one")]
    pub skip_pressure: f64,
    #[serde(default = "one")]
    pub column_routing: f64,
    #[serde(default = "one")]
    pub pair_coverage: f64,
    #[serde(default = "one")]
    pub sum_proximity: f64,
}

fn one() -> f64 {
    1.0
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::uniform()
    }
}

impl ScoringWeights {
    /// Every factor weighted 1.
    pub fn uniform() -> Self {
        Self {
            type_score: 1.0,
            skip_pressure: 1.0,
            column_routing: 1.0,
            pair_coverage: 1.0,
            sum_proximity: 1.0,
        }
    }

    fn zero() -> Self {
        Self {
            type_score: 0.0,
            skip_pressure: 0.0,
            column_routing: 0.0,
            pair_coverage: 0.0,
            sum_proximity: 0.0,
        }
    }

    /// All factors zero except `factor`.
    pub fn only(factor: Factor) -> Self {
        Self::zero().with(factor, 1.0)
    }

    /// Build from `(name, weight)` pairs. Unnamed factors get weight 0;
    /// unknown names are rejected.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<Self, EngineError> {
        let mut weights = Self::zero();
        for (name, weight) in pairs {
            let factor: Factor = name.parse()?;
            *weights.slot(factor) = weight;
        }
        weights.validate()?;
        Ok(weights)
    }

    fn slot(&mut self, factor: Factor) -> &mut f64 {
        match factor {
            Factor::TypeScore => &mut self.type_score,
            Factor::SkipPressure => &mut self.skip_pressure,
            Factor::ColumnRouting => &mut self.column_routing,
            Factor::PairCoverage => &mut self.pair_coverage,
            Factor::SumProximity => &mut self.sum_proximity,
        }
    }

    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::TypeScore => self.type_score,
            Factor::SkipPressure => self.skip_pressure,
            Factor::ColumnRouting => self.column_routing,
            Factor::PairCoverage => self.pair_coverage,
            Factor::SumProximity => self.sum_proximity,
        }
    }

    pub fn with(mut self, factor: Factor, weight: f64) -> Self {
        *self.slot(factor) = weight;
        self
    }

    pub fn total(&self) -> f64 {
        Factor::ALL.iter().map(|f| self.get(*f)).sum()
    }

    /// Weights must be finite, non-negative, and not all zero.
    pub fn validate(&self) -> Result<(), EngineError> {
        for factor in Factor::ALL {
            let w = self.get(factor);
            if !w.is_finite() || w < 0.0 {
                return Err(EngineError::Validation(format!(
                    "weight for {factor} must be finite and non-negative, got {w}"
                )));
            }
        }
        if self.total() <= 0.0 {
            return Err(EngineError::Validation(
                "at least one scoring weight must be positive".into(),
            ));
        }
        Ok(())
    }
}
