//! Synthetic draw store for integration testing.
//!
//! Provides a deterministic `DrawStore` implementation whose history is
//! generated from a seed, so tests can build long histories and "alternate
//! futures" that share an exact prefix.

use drawcast::storage::DrawStore;
use drawcast::types::{Draw, GameSpec};

/// A seeded, in-memory draw history.
pub struct SyntheticStore {
    game: GameSpec,
    draws: Vec<Draw>,
}

impl SyntheticStore {
    /// `len` draws starting at `first_index`, generated from `seed`.
    pub fn new(game: GameSpec, first_index: u64, len: usize, seed: u64) -> Self {
        let mut store = Self { game, draws: Vec::new() };
        store.extend(first_index, len, seed);
        store
    }

    pub fn pick3(len: usize, seed: u64) -> Self {
        Self::new(GameSpec::pick3(), 5000, len, seed)
    }

    pub fn game(&self) -> &GameSpec {
        &self.game
    }

    pub fn draws(&self) -> &[Draw] {
        &self.draws
    }

    /// Same draws before `position`, a different history from it onward.
    /// The draw at `position` is guaranteed to differ.
    pub fn fork_at(&self, position: usize, seed: u64) -> Self {
        let mut fork = self.truncated(position);
        let first_index = self.draws[position].index;
        fork.extend(first_index, self.draws.len() - position, seed);
        if fork.draws[position].symbols == self.draws[position].symbols {
            let first = &mut fork.draws[position].symbols[0];
            *first = (*first + 1) % self.game.alphabet_size;
        }
        fork
    }

    /// Only the first `len` draws.
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            game: self.game.clone(),
            draws: self.draws[..len].to_vec(),
        }
    }

    fn extend(&mut self, first_index: u64, len: usize, seed: u64) {
        let mut state = seed ^ 0x9e37_79b9_7f4a_7c15;
        for i in 0..len {
            let symbols = (0..self.game.length)
                .map(|_| {
                    state = state
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407);
                    ((state >> 33) % self.game.alphabet_size as u64) as u8
                })
                .collect();
            self.draws.push(Draw::new(first_index + i as u64, symbols));
        }
    }
}

impl DrawStore for SyntheticStore {
    fn len(&self) -> usize {
        self.draws.len()
    }

    fn get(&self, position: usize) -> Option<&Draw> {
        self.draws.get(position)
    }
}
