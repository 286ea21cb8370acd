//! Incrementally maintained model state.
//!
//! [`ModelState`] bundles the skip tracker, the transition model and the
//! recent pattern window. It has a single writer (whoever calls `apply`);
//! readers get a [`ModelSnapshot`], an immutable copy-on-write view that
//! is unaffected by later applies.

pub mod recent;
pub mod skip;
pub mod transition;

use serde::{Deserialize, Serialize};
use std::ops::Deref;

use crate::types::{Draw, EngineError, GameSpec};
use recent::PatternWindow;
use skip::{LatenessThresholds, SkipTracker};
use transition::TransitionModel;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingConfig {
    /// Additive smoothing for transition probabilities.
    #[serde(default = "default_alpha")]
    pub smoothing_alpha: f64,
    #[serde(default)]
    pub lateness: LatenessThresholds,
    /// Number of recent draws feeding the type score.
    #[serde(default = "default_window")]
    pub pattern_window: usize,
}

fn default_alpha() -> f64 {
    transition::DEFAULT_ALPHA
}

fn default_window() -> usize {
    recent::DEFAULT_WINDOW
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: default_alpha(),
            lateness: LatenessThresholds::default(),
            pattern_window: default_window(),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    game: GameSpec,
    skips: SkipTracker,
    transitions: TransitionModel,
    patterns: PatternWindow,
}

impl ModelState {
    pub fn new(game: GameSpec, config: &TrackingConfig) -> Result<Self, EngineError> {
        Ok(Self {
            skips: SkipTracker::new(game.clone(), config.lateness)?,
            transitions: TransitionModel::new(game.clone(), config.smoothing_alpha)?,
            patterns: PatternWindow::new(game.clone(), config.pattern_window)?,
            game,
        })
    }

    pub fn game(&self) -> &GameSpec {
        &self.game
    }

    pub fn skips(&self) -> &SkipTracker {
        &self.skips
    }

    pub fn transitions(&self) -> &TransitionModel {
        &self.transitions
    }

    pub fn patterns(&self) -> &PatternWindow {
        &self.patterns
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.skips.last_applied()
    }

    pub fn draws_applied(&self) -> u64 {
        self.skips.draws_applied()
    }

    /// Apply a draw to every component, or to none of them.
    pub fn apply(&mut self, draw: &Draw) -> Result<(), EngineError> {
        self.skips.check(draw)?;
        self.transitions.check(draw)?;
        self.patterns.check(draw)?;

        self.skips.apply(draw)?;
        self.transitions.apply(draw)?;
        self.patterns.apply(draw)?;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.skips.reset();
        self.transitions.reset();
        self.patterns.reset();
    }

    /// Error unless every component has seen exactly the same draws.
    pub fn check_consistent(&self) -> Result<(), EngineError> {
        let skip = self.skips.last_applied();
        let transition = self.transitions.last_applied();
        let pattern = self.patterns.last_applied();
        if skip != transition || skip != pattern {
            return Err(EngineError::StateIntegrity {
                index: skip,
                message: format!(
                    "components disagree on last applied draw: \
                     skips={skip:?} transitions={transition:?} patterns={pattern:?}"
                ),
            });
        }
        Ok(())
    }

    /// Full structural check for a state that did not come from `apply`,
    /// such as one read back from a checkpoint.
    pub fn check_integrity(&self) -> Result<(), EngineError> {
        let last = self.last_applied();
        let games = [self.skips.game(), self.transitions.game(), self.patterns.game()];
        if let Some(other) = games.into_iter().find(|g| **g != self.game) {
            return Err(EngineError::integrity(
                last,
                format!("component tracks {other}, state tracks {}", self.game),
            ));
        }
        self.check_consistent()?;
        self.skips.check_integrity()?;
        self.transitions.check_integrity()?;
        self.patterns.check_integrity()?;
        if self.patterns.len() as u64 > self.draws_applied() {
            return Err(EngineError::integrity(
                last,
                format!(
                    "pattern window holds {} draws but only {} were applied",
                    self.patterns.len(),
                    self.draws_applied()
                ),
            ));
        }
        Ok(())
    }

    /// Immutable view reflecting every draw applied so far and nothing after.
    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot { inner: self.clone() }
    }
}

/// Read-only view of a [`ModelState`]. Cheap to take: the heavy tables are
/// shared until the live state next mutates them.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    inner: ModelState,
}

impl ModelSnapshot {
    /// Verify this snapshot reflects exactly the draws before `index`.
    pub fn ensure_before(&self, index: u64) -> Result<(), EngineError> {
        self.inner.check_consistent()?;
        let valid = match self.inner.last_applied() {
            Some(last) => last + 1 == index,
            None => true,
        };
        if !valid {
            return Err(EngineError::StateIntegrity {
                index: Some(index),
                message: format!(
                    "snapshot reflects draws up to {:?}, expected state as of draw {index}",
                    self.inner.last_applied()
                ),
            });
        }
        Ok(())
    }

    /// Turn the snapshot back into an owned, mutable state.
    pub fn into_state(self) -> ModelState {
        self.inner
    }
}

impl Deref for ModelSnapshot {
    type Target = ModelState;

    fn deref(&self) -> &ModelState {
        &self.inner
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
