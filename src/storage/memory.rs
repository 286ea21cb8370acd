//! Read interface over draw history, plus an in-memory implementation.

use crate::types::{Draw, EngineError, GameSpec};

/// Ordered, gapless, read-only access to historical draws.
///
/// Position `p` holds the `p`-th draw; indices increase by exactly one
/// from one position to the next.
pub trait DrawStore {
    fn len(&self) -> usize;

    fn get(&self, position: usize) -> Option<&Draw>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> DrawIter<'_, Self> {
        DrawIter {
            store: self,
            position: 0,
        }
    }
}

pub struct DrawIter<'a, S: ?Sized> {
    store: &'a S,
    position: usize,
}

impl<'a, S: DrawStore + ?Sized> Iterator for DrawIter<'a, S> {
    type Item = &'a Draw;

    fn next(&mut self) -> Option<&'a Draw> {
        let draw = self.store.get(self.position)?;
        self.position += 1;
        Some(draw)
    }
}

/// Append-only draw history held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryDrawStore {
    game: Option<GameSpec>,
    draws: Vec<Draw>,
}

impl MemoryDrawStore {
    /// Store that accepts any well-sequenced draws.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that also validates every draw against `game`.
    pub fn for_game(game: GameSpec) -> Self {
        Self {
            game: Some(game),
            draws: Vec::new(),
        }
    }

    /// Build from draws already in order.
    pub fn from_draws(
        game: Option<GameSpec>,
        draws: impl IntoIterator<Item = Draw>,
    ) -> Result<Self, EngineError> {
        let mut store = Self { game, draws: Vec::new() };
        for draw in draws {
            store.append(draw)?;
        }
        Ok(store)
    }

    /// Build from compact digit strings, indexed from `first_index`.
    pub fn from_digit_strings(first_index: u64, rows: &[&str]) -> Result<Self, EngineError> {
        let draws = rows
            .iter()
            .enumerate()
            .map(|(i, row)| Draw::from_digits(first_index + i as u64, row))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_draws(None, draws)
    }

    /// Append the next draw. It must directly follow the last one.
    pub fn append(&mut self, draw: Draw) -> Result<(), EngineError> {
        if let Some(game) = &self.game {
            game.validate_draw(&draw)?;
        }
        EngineError::check_sequence("draw store", self.draws.last().map(|d| d.index), draw.index)?;
        self.draws.push(draw);
        Ok(())
    }

    pub fn draws(&self) -> &[Draw] {
        &self.draws
    }
}

impl DrawStore for MemoryDrawStore {
    fn len(&self) -> usize {
        self.draws.len()
    }

    fn get(&self, position: usize) -> Option<&Draw> {
        self.draws.get(position)
    }
}
