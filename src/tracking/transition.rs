//! Per-position order-2 Markov transition model.
//!
//! For every position the model counts how often symbol `v` followed the
//! context `(s[t-2], s[t-1])` observed at that same position, and turns the
//! counts into a smoothed next-value distribution:
//!
//! ```text
//! P(v) = (count(ctx, v) + α) / (Σ count(ctx, ·) + α·A)
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

use crate::types::{Draw, EngineError, GameSpec};

/// Default additive (Laplace) smoothing constant.
pub const DEFAULT_ALPHA: f64 = 1.0;

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Counts for one position. Dense `A × A × A` layout indexed by
/// `(prev2 · A + prev1) · A + next`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTable {
    alphabet: usize,
    counts: Vec<u32>,
    prev2: Option<u8>,
    prev1: Option<u8>,
    observations: u64,
}

impl TransitionTable {
    fn new(alphabet: usize) -> Self {
        Self {
            alphabet,
            counts: vec![0; alphabet * alphabet * alphabet],
            prev2: None,
            prev1: None,
            observations: 0,
        }
    }

    fn row(&self, context: (u8, u8)) -> &[u32] {
        let start = (context.0 as usize * self.alphabet + context.1 as usize) * self.alphabet;
        &self.counts[start..start + self.alphabet]
    }

    fn observe(&mut self, symbol: u8) {
        if let (Some(p2), Some(p1)) = (self.prev2, self.prev1) {
            let idx = (p2 as usize * self.alphabet + p1 as usize) * self.alphabet + symbol as usize;
            self.counts[idx] += 1;
        }
        self.prev2 = self.prev1;
        self.prev1 = Some(symbol);
        self.observations += 1;
    }

    /// Describe the first way this table disagrees with an `alphabet`-symbol game.
    fn integrity_fault(&self, alphabet: usize) -> Option<String> {
        if self.alphabet != alphabet {
            return Some(format!(
                "table alphabet {} differs from game alphabet {alphabet}",
                self.alphabet
            ));
        }
        let expected = alphabet * alphabet * alphabet;
        if self.counts.len() != expected {
            return Some(format!(
                "table holds {} counts, expected {expected}",
                self.counts.len()
            ));
        }
        if self.prev2.is_some() && self.prev1.is_none() {
            return Some("table context has prev2 without prev1".into());
        }
        [self.prev2, self.prev1]
            .into_iter()
            .flatten()
            .find(|&s| s as usize >= alphabet)
            .map(|symbol| format!("table context symbol {symbol} out of range"))
    }

    /// The context the next symbol will be conditioned on.
    pub fn current_context(&self) -> Option<(u8, u8)> {
        Some((self.prev2?, self.prev1?))
    }

    pub fn count(&self, context: (u8, u8), next: u8) -> u32 {
        self.row(context)[next as usize]
    }

    pub fn context_total(&self, context: (u8, u8)) -> u64 {
        self.row(context).iter().map(|&c| c as u64).sum()
    }

    /// Number of recorded transitions.
    pub fn transitions(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }
}

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

/// Smoothed next-value distribution for one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub position: usize,
    pub probabilities: Vec<f64>,
    /// Most likely symbol (lowest symbol on ties).
    pub argmax: u8,
    /// Probability of `argmax`.
    pub confidence: f64,
    /// `None` until two symbols have been observed at this position.
    pub context: Option<(u8, u8)>,
    pub context_total: u64,
}

impl Distribution {
    fn uniform(position: usize, alphabet: usize) -> Self {
        let p = 1.0 / alphabet as f64;
        Self {
            position,
            probabilities: vec![p; alphabet],
            argmax: 0,
            confidence: p,
            context: None,
            context_total: 0,
        }
    }

    pub fn probability(&self, symbol: u8) -> f64 {
        self.probabilities.get(symbol as usize).copied().unwrap_or(0.0)
    }

    /// Probability of `symbol` relative to the most likely symbol, in `[0, 1]`.
    pub fn relative(&self, symbol: u8) -> f64 {
        if self.confidence <= 0.0 {
            0.0
        } else {
            self.probability(symbol) / self.confidence
        }
    }

    /// Symbols ordered by probability desc, then symbol asc.
    pub fn ranked_symbols(&self) -> Vec<u8> {
        let mut symbols: Vec<u8> = (0..self.probabilities.len() as u8).collect();
        symbols.sort_by(|a, b| {
            self.probability(*b)
                .total_cmp(&self.probability(*a))
                .then(a.cmp(b))
        });
        symbols
    }
}

/// High-confidence positions only; weak positions stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialPrediction {
    pub values: Vec<Option<u8>>,
    pub confidences: Vec<f64>,
}

impl PartialPrediction {
    pub fn predicted_positions(&self) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|_| i))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionModel {
    game: GameSpec,
    alpha: f64,
    tables: Arc<Vec<TransitionTable>>,
    last_applied: Option<u64>,
}

impl TransitionModel {
    pub fn new(game: GameSpec, alpha: f64) -> Result<Self, EngineError> {
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(EngineError::Validation(format!(
                "smoothing alpha must be positive and finite, got {alpha}"
            )));
        }
        let tables = vec![TransitionTable::new(game.alphabet()); game.length];
        Ok(Self {
            game,
            alpha,
            tables: Arc::new(tables),
            last_applied: None,
        })
    }

    pub fn game(&self) -> &GameSpec {
        &self.game
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn table(&self, position: usize) -> Result<&TransitionTable, EngineError> {
        self.tables.get(position).ok_or_else(|| {
            EngineError::Validation(format!(
                "position {position} out of range for {}",
                self.game
            ))
        })
    }

    pub fn check(&self, draw: &Draw) -> Result<(), EngineError> {
        self.game.validate_draw(draw)?;
        EngineError::check_sequence("transition model", self.last_applied, draw.index)
    }

    /// Error if the tables cannot belong to this model's game, e.g. after
    /// loading a hand-edited or truncated checkpoint.
    pub fn check_integrity(&self) -> Result<(), EngineError> {
        let fault = if !self.alpha.is_finite() || self.alpha <= 0.0 {
            Some(format!("smoothing alpha {} is not positive and finite", self.alpha))
        } else if self.tables.len() != self.game.length {
            Some(format!(
                "{} transition tables for {} positions",
                self.tables.len(),
                self.game.length
            ))
        } else {
            self.tables
                .iter()
                .enumerate()
                .find_map(|(position, table)| {
                    table
                        .integrity_fault(self.game.alphabet())
                        .map(|fault| format!("position {position}: {fault}"))
                })
        };
        match fault {
            Some(message) => Err(EngineError::integrity(self.last_applied, message)),
            None => Ok(()),
        }
    }

    /// Record one draw at every position.
    pub fn apply(&mut self, draw: &Draw) -> Result<(), EngineError> {
        self.check(draw)?;
        let tables = Arc::make_mut(&mut self.tables);
        for (table, &symbol) in tables.iter_mut().zip(&draw.symbols) {
            table.observe(symbol);
        }
        self.last_applied = Some(draw.index);
        trace!(index = draw.index, "Transition tables updated");
        Ok(())
    }

    /// Clear every table and context.
    pub fn reset(&mut self) {
        self.tables = Arc::new(vec![TransitionTable::new(self.game.alphabet()); self.game.length]);
        self.last_applied = None;
    }

    /// Next-value distribution for `position` given its current context.
    pub fn predict(&self, position: usize) -> Result<Distribution, EngineError> {
        let table = self.table(position)?;
        let alphabet = self.game.alphabet();
        let Some(context) = table.current_context() else {
            return Ok(Distribution::uniform(position, alphabet));
        };

        let row = table.row(context);
        let total: u64 = row.iter().map(|&c| c as u64).sum();
        let denominator = total as f64 + self.alpha * alphabet as f64;
        let probabilities: Vec<f64> = row
            .iter()
            .map(|&c| (c as f64 + self.alpha) / denominator)
            .collect();

        let mut argmax = 0usize;
        for (symbol, p) in probabilities.iter().enumerate() {
            if *p > probabilities[argmax] {
                argmax = symbol;
            }
        }

        Ok(Distribution {
            position,
            confidence: probabilities[argmax],
            argmax: argmax as u8,
            probabilities,
            context: Some(context),
            context_total: total,
        })
    }

    /// Distributions for every position.
    pub fn predict_all(&self) -> Vec<Distribution> {
        (0..self.game.length)
            .filter_map(|p| self.predict(p).ok())
            .collect()
    }

    /// Commit only to the `k` most confident positions.
    pub fn predict_partial(&self, k: usize) -> PartialPrediction {
        let distributions = self.predict_all();
        let mut order: Vec<usize> = (0..distributions.len()).collect();
        order.sort_by(|a, b| {
            distributions[*b]
                .confidence
                .total_cmp(&distributions[*a].confidence)
                .then(a.cmp(b))
        });

        let mut values = vec![None; distributions.len()];
        for &position in order.iter().take(k) {
            values[position] = Some(distributions[position].argmax);
        }
        PartialPrediction {
            values,
            confidences: distributions.iter().map(|d| d.confidence).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
