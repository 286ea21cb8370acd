//! Candidate generation.
//!
//! Produces the combinations to be scored, either by a pruned lexicographic
//! walk of the whole space or by a beam search over the per-position
//! transition distributions. Output is a pure function of the model state
//! and the configuration, so rankings and backtests are reproducible.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::features::{ClassScheme, FeatureKey};
use crate::tracking::ModelState;
use crate::types::{
    format_symbols, sorted_symbols, symbol_sum, CapacityBound, CapacityExceeded, EngineError,
    GameSpec,
};

pub const DEFAULT_MAX_CANDIDATES: usize = 10_000;
pub const DEFAULT_MAX_EXAMINED: usize = 1_000_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationStrategy {
    /// Every sequence the filters allow, in lexicographic order.
    Exhaustive,
    /// Keep the `width` most probable prefixes at each position.
    Beam { width: usize },
}

/// What to do when more candidates pass the filters than `max_candidates`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the first `max_candidates` and report a [`CapacityExceeded`] warning.
    #[default]
    Truncate,
    /// Fail with [`EngineError::CapacityExceeded`].
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    #[serde(default = "default_strategy")]
    pub strategy: GenerationStrategy,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Prefixes the exhaustive walk may test before it stops.
    #[serde(default = "default_max_examined")]
    pub max_examined: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

fn default_strategy() -> GenerationStrategy {
    GenerationStrategy::Exhaustive
}

fn default_max_candidates() -> usize {
    DEFAULT_MAX_CANDIDATES
}

fn default_max_examined() -> usize {
    DEFAULT_MAX_EXAMINED
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_candidates: default_max_candidates(),
            max_examined: default_max_examined(),
            overflow: OverflowPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFilter {
    pub scheme: ClassScheme,
    pub classes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumRange {
    pub min: u16,
    pub max: u16,
}

/// Bounds on the current skip of a candidate's box combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipWindow {
    #[serde(default)]
    pub min: u64,
    #[serde(default)]
    pub max: Option<u64>,
}

impl SkipWindow {
    fn contains(&self, skip: u64) -> bool {
        skip >= self.min && self.max.map_or(true, |max| skip <= max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateFilters {
    #[serde(default)]
    pub pattern: Option<PatternFilter>,
    #[serde(default)]
    pub sum_range: Option<SumRange>,
    #[serde(default)]
    pub box_skip: Option<SkipWindow>,
    /// Emit only the first straight of every box.
    #[serde(default)]
    pub distinct_boxes: bool,
}

impl CandidateFilters {
    pub fn validate(&self, game: &GameSpec) -> Result<(), EngineError> {
        if let Some(pattern) = &self.pattern {
            FeatureKey::Pattern {
                scheme: pattern.scheme,
                classes: pattern.classes.clone(),
            }
            .validate(game)?;
        }
        if let Some(range) = &self.sum_range {
            if range.min > range.max {
                return Err(EngineError::Validation(format!(
                    "sum range {}..={} is empty",
                    range.min, range.max
                )));
            }
        }
        if let Some(window) = &self.box_skip {
            if window.max.is_some_and(|max| max < window.min) {
                return Err(EngineError::Validation("box skip window is empty".into()));
            }
        }
        Ok(())
    }

    /// Whether a prefix can still be extended into a passing candidate.
    fn prefix_viable(&self, game: &GameSpec, prefix: &[u8]) -> bool {
        if let Some(pattern) = &self.pattern {
            let matches = prefix
                .iter()
                .zip(&pattern.classes)
                .all(|(&s, &c)| pattern.scheme.classify(game, s) == c);
            if !matches {
                return false;
            }
        }
        if let Some(range) = &self.sum_range {
            let sum = symbol_sum(prefix);
            let open = (game.length - prefix.len()) as u16 * (game.alphabet_size as u16 - 1);
            if sum > range.max || sum + open < range.min {
                return false;
            }
        }
        true
    }

    /// Checks left once a full sequence is known to be prefix-viable.
    fn box_skip_allows(&self, state: &ModelState, symbols: &[u8]) -> Result<bool, EngineError> {
        if let Some(window) = &self.box_skip {
            let counter = state.skips().counter(&FeatureKey::Box {
                symbols: sorted_symbols(symbols),
            })?;
            if !window.contains(counter.current_skip) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Generated candidates plus a warning when the bound was hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub candidates: Vec<Vec<u8>>,
    pub truncation: Option<CapacityExceeded>,
}

#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    config: GeneratorConfig,
}

impl CandidateGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, EngineError> {
        if config.max_candidates == 0 {
            return Err(EngineError::Validation("max_candidates must be at least 1".into()));
        }
        if config.max_examined == 0 {
            return Err(EngineError::Validation("max_examined must be at least 1".into()));
        }
        if let GenerationStrategy::Beam { width: 0 } = config.strategy {
            return Err(EngineError::Validation("beam width must be at least 1".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn generate(
        &self,
        state: &ModelState,
        filters: &CandidateFilters,
    ) -> Result<CandidateSet, EngineError> {
        filters.validate(state.game())?;

        let (candidates, truncation) = match self.config.strategy {
            GenerationStrategy::Exhaustive => self.walk(state, filters)?,
            GenerationStrategy::Beam { width } => self.from_beam(state, filters, width)?,
        };

        if let Some(capacity) = truncation {
            if self.config.overflow == OverflowPolicy::Reject {
                return Err(EngineError::CapacityExceeded(capacity));
            }
            warn!(
                bound = ?capacity.bound,
                limit = capacity.limit,
                remaining = capacity.remaining,
                first_dropped = %format_symbols(&capacity.first_dropped),
                "Candidate bound reached, truncating"
            );
            return Ok(CandidateSet {
                candidates,
                truncation: Some(capacity),
            });
        }

        debug!(count = candidates.len(), "Candidates generated");
        Ok(CandidateSet {
            candidates,
            truncation: None,
        })
    }

    /// Lexicographic walk that skips every subtree the prefix filters rule
    /// out. Stops at whichever of `max_candidates` or `max_examined` comes first.
    fn walk(
        &self,
        state: &ModelState,
        filters: &CandidateFilters,
    ) -> Result<(Vec<Vec<u8>>, Option<CapacityExceeded>), EngineError> {
        let game = state.game();
        let limit = self.config.max_candidates;
        let mut walk = PrunedWalk::new(game, filters, self.config.max_examined);
        let mut candidates = Vec::new();

        for symbols in walk.by_ref() {
            if !filters.box_skip_allows(state, &symbols)? {
                continue;
            }
            if candidates.len() == limit {
                let capacity = CapacityExceeded {
                    bound: CapacityBound::Candidates,
                    limit,
                    remaining: game.space_size() - lex_rank(game, &symbols),
                    first_dropped: symbols,
                };
                return Ok((candidates, Some(capacity)));
            }
            candidates.push(symbols);
        }

        debug!(examined = walk.examined, kept = candidates.len(), "Sequence walk finished");
        let truncation = walk.unexamined().map(|first| CapacityExceeded {
            bound: CapacityBound::Examined,
            limit: self.config.max_examined,
            remaining: game.space_size() - lex_rank(game, &first),
            first_dropped: first,
        });
        Ok((candidates, truncation))
    }

    fn from_beam(
        &self,
        state: &ModelState,
        filters: &CandidateFilters,
        width: usize,
    ) -> Result<(Vec<Vec<u8>>, Option<CapacityExceeded>), EngineError> {
        let beam = beam_search(state, filters, width);
        let total = beam.len() as u64;
        let limit = self.config.max_candidates;
        let mut candidates = Vec::new();
        let mut seen_boxes = HashSet::new();

        for (examined, symbols) in beam.into_iter().enumerate() {
            if !filters.box_skip_allows(state, &symbols)? {
                continue;
            }
            if filters.distinct_boxes && !seen_boxes.insert(sorted_symbols(&symbols)) {
                continue;
            }
            if candidates.len() == limit {
                let capacity = CapacityExceeded {
                    bound: CapacityBound::Candidates,
                    limit,
                    remaining: total - examined as u64,
                    first_dropped: symbols,
                };
                return Ok((candidates, Some(capacity)));
            }
            candidates.push(symbols);
        }
        Ok((candidates, None))
    }
}

/// Zero-based position of `symbols` in lexicographic order.
fn lex_rank(game: &GameSpec, symbols: &[u8]) -> u64 {
    let base = game.alphabet_size as u64;
    symbols.iter().fold(0, |rank, &s| rank * base + s as u64)
}

/// Depth-first, lexicographic walk over a game's sequences. A prefix that
/// fails [`CandidateFilters::prefix_viable`] is never extended. Every prefix
/// tested counts against `budget`. With `distinct_boxes` only non-decreasing
/// sequences are visited, one straight per box.
struct PrunedWalk<'a> {
    game: &'a GameSpec,
    filters: &'a CandidateFilters,
    prefix: Vec<u8>,
    /// Next symbol to try after `prefix`; `None` once the space is exhausted.
    cursor: Option<u8>,
    examined: usize,
    budget: usize,
}

impl<'a> PrunedWalk<'a> {
    fn new(game: &'a GameSpec, filters: &'a CandidateFilters, budget: usize) -> Self {
        Self {
            game,
            filters,
            prefix: Vec::with_capacity(game.length),
            cursor: Some(0),
            examined: 0,
            budget,
        }
    }

    /// Lowest symbol worth trying after the current prefix.
    fn floor(&self) -> u8 {
        match self.prefix.last() {
            Some(&last) if self.filters.distinct_boxes => last,
            _ => 0,
        }
    }

    /// Move past `symbol`, climbing out of exhausted levels.
    fn advance(&mut self, mut symbol: u8) {
        loop {
            if symbol + 1 < self.game.alphabet_size {
                self.cursor = Some(symbol + 1);
                return;
            }
            match self.prefix.pop() {
                Some(parent) => symbol = parent,
                None => {
                    self.cursor = None;
                    return;
                }
            }
        }
    }

    /// First sequence, lexicographically, the walk never reached. `None`
    /// when the walk covered the whole space within its budget.
    fn unexamined(&self) -> Option<Vec<u8>> {
        let cursor = self.cursor?;
        let mut first = self.prefix.clone();
        first.push(cursor);
        first.resize(self.game.length, 0);
        Some(first)
    }
}

impl Iterator for PrunedWalk<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        while let Some(symbol) = self.cursor {
            if self.examined == self.budget {
                return None;
            }
            self.examined += 1;
            self.prefix.push(symbol);
            let viable = self.filters.prefix_viable(self.game, &self.prefix);
            if viable && self.prefix.len() < self.game.length {
                self.cursor = Some(self.floor());
                continue;
            }
            let leaf = viable.then(|| self.prefix.clone());
            self.prefix.pop();
            self.advance(symbol);
            if leaf.is_some() {
                return leaf;
            }
        }
        None
    }
}

/// Position-by-position beam over log-probabilities of the column
/// distributions. Ties break lexicographically, so the output is
/// deterministic. Returned most probable first.
fn beam_search(state: &ModelState, filters: &CandidateFilters, width: usize) -> Vec<Vec<u8>> {
    let game = state.game();
    let columns = state.transitions().predict_all();
    let mut beam: Vec<(f64, Vec<u8>)> = vec![(0.0, Vec::with_capacity(game.length))];

    for column in &columns {
        let mut expanded: Vec<(f64, Vec<u8>)> = Vec::with_capacity(beam.len() * game.alphabet());
        for (score, prefix) in &beam {
            for symbol in 0..game.alphabet_size {
                let mut next = prefix.clone();
                next.push(symbol);
                if !filters.prefix_viable(game, &next) {
                    continue;
                }
                expanded.push((score + column.probability(symbol).ln(), next));
            }
        }
        expanded.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        expanded.truncate(width);
        beam = expanded;
    }

    beam.into_iter().map(|(_, symbols)| symbols).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
