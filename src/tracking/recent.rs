//! Rolling window of recent draws, used for pattern-level statistics.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::features::ClassScheme;
use crate::types::{Draw, EngineError, GameSpec};

pub const DEFAULT_WINDOW: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternWindow {
    game: GameSpec,
    capacity: usize,
    recent: Arc<VecDeque<Vec<u8>>>,
    last_applied: Option<u64>,
}

impl PatternWindow {
    pub fn new(game: GameSpec, capacity: usize) -> Result<Self, EngineError> {
        if capacity == 0 {
            return Err(EngineError::Validation(
                "pattern window must hold at least one draw".into(),
            ));
        }
        Ok(Self {
            game,
            capacity,
            recent: Arc::new(VecDeque::with_capacity(capacity)),
            last_applied: None,
        })
    }

    pub fn game(&self) -> &GameSpec {
        &self.game
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn check(&self, draw: &Draw) -> Result<(), EngineError> {
        self.game.validate_draw(draw)?;
        EngineError::check_sequence("pattern window", self.last_applied, draw.index)
    }

    pub fn apply(&mut self, draw: &Draw) -> Result<(), EngineError> {
        self.check(draw)?;
        let recent = Arc::make_mut(&mut self.recent);
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(draw.symbols.clone());
        self.last_applied = Some(draw.index);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.recent = Arc::new(VecDeque::with_capacity(self.capacity));
        self.last_applied = None;
    }

    /// Error if the window cannot have been filled from this game's draws.
    pub fn check_integrity(&self) -> Result<(), EngineError> {
        let fault = |message: String| Err(EngineError::integrity(self.last_applied, message));
        if self.capacity == 0 || self.recent.len() > self.capacity {
            return fault(format!(
                "pattern window holds {} draws with capacity {}",
                self.recent.len(),
                self.capacity
            ));
        }
        if self.last_applied.is_none() && !self.recent.is_empty() {
            return fault("pattern window holds draws but none were applied".into());
        }
        for symbols in self.recent.iter() {
            if let Err(e) = self.game.validate_symbols(symbols) {
                return fault(e.to_string());
            }
        }
        Ok(())
    }

    /// How often each pattern of `scheme` occurred in the window. Patterns
    /// that never occurred are absent, so the map never outgrows the window.
    pub fn pattern_counts(&self, scheme: ClassScheme) -> HashMap<Vec<u8>, u32> {
        let mut counts = HashMap::new();
        for symbols in self.recent.iter() {
            *counts.entry(scheme.pattern(&self.game, symbols)).or_insert(0) += 1;
        }
        counts
    }

    /// Oldest first.
    pub fn draws(&self) -> impl Iterator<Item = &[u8]> {
        self.recent.iter().map(|s| s.as_slice())
    }
}
