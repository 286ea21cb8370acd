//! Shared types for DRAWCAST.
//!
//! These types form the data model used across all modules. They are
//! kept free of tracker/scorer logic so that every component can depend
//! on them without circular references.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// Longest draw supported. Keeps `A^L` and per-draw feature counts sane.
pub const MAX_LENGTH: usize = 8;
/// Largest alphabet supported.
pub const MAX_ALPHABET: u8 = 100;

/// Shape of a digit game: `length` symbols, each in `0..alphabet_size`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameSpec {
    pub name: String,
    pub length: usize,
    pub alphabet_size: u8,
}

impl GameSpec {
    /// Build a validated game description.
    pub fn new(
        name: impl Into<String>,
        length: usize,
        alphabet_size: u8,
    ) -> Result<Self, EngineError> {
        if length == 0 || length > MAX_LENGTH {
            return Err(EngineError::Validation(format!(
                "game length must be within 1..={MAX_LENGTH}, got {length}"
            )));
        }
        if !(2..=MAX_ALPHABET).contains(&alphabet_size) {
            return Err(EngineError::Validation(format!(
                "alphabet size must be within 2..={MAX_ALPHABET}, got {alphabet_size}"
            )));
        }
        Ok(Self {
            name: name.into(),
            length,
            alphabet_size,
        })
    }

    /// Classic 3-digit game (000–999).
    pub fn pick3() -> Self {
        Self {
            name: "Pick 3".to_string(),
            length: 3,
            alphabet_size: 10,
        }
    }

    /// Classic 4-digit game (0000–9999).
    pub fn pick4() -> Self {
        Self {
            name: "Pick 4".to_string(),
            length: 4,
            alphabet_size: 10,
        }
    }

    pub fn alphabet(&self) -> usize {
        self.alphabet_size as usize
    }

    /// Number of distinct straight combinations (`A^L`).
    pub fn space_size(&self) -> u64 {
        (self.alphabet_size as u64).pow(self.length as u32)
    }

    /// Largest possible symbol sum.
    pub fn max_sum(&self) -> u16 {
        (self.alphabet_size as u16 - 1) * self.length as u16
    }

    /// Symbols `>= high_threshold` count as "high".
    pub fn high_threshold(&self) -> u8 {
        self.alphabet_size / 2
    }

    pub fn contains_symbol(&self, symbol: u8) -> bool {
        symbol < self.alphabet_size
    }

    /// Reject a symbol sequence that does not fit this game.
    pub fn validate_symbols(&self, symbols: &[u8]) -> Result<(), EngineError> {
        if symbols.len() != self.length {
            return Err(EngineError::Validation(format!(
                "expected {} symbols for {}, got {}",
                self.length,
                self.name,
                symbols.len()
            )));
        }
        if let Some(bad) = symbols.iter().find(|s| !self.contains_symbol(**s)) {
            return Err(EngineError::Validation(format!(
                "symbol {bad} is outside the alphabet 0..{}",
                self.alphabet_size
            )));
        }
        Ok(())
    }

    pub fn validate_draw(&self, draw: &Draw) -> Result<(), EngineError> {
        self.validate_symbols(&draw.symbols)
    }
}

impl fmt::Display for GameSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} of 0..{})", self.name, self.length, self.alphabet_size)
    }
}

// ---------------------------------------------------------------------------
// Draw
// ---------------------------------------------------------------------------

/// One historical outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Draw {
    /// Strictly increasing, gapless sequence index.
    pub index: u64,
    pub symbols: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl Draw {
    pub fn new(index: u64, symbols: Vec<u8>) -> Self {
        Self {
            index,
            symbols,
            date: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Parse a compact digit string such as `"042"`.
    /// Only meaningful for alphabets of size 10 or less.
    pub fn from_digits(index: u64, digits: &str) -> Result<Self, EngineError> {
        let symbols = digits
            .chars()
            .map(|c| {
                c.to_digit(10)
                    .map(|d| d as u8)
                    .ok_or_else(|| {
                        EngineError::Validation(format!("not a digit: {c:?} in {digits:?}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(index, symbols))
    }

    pub fn sum(&self) -> u16 {
        symbol_sum(&self.symbols)
    }

    /// Symbols in ascending order (the "box" form).
    pub fn sorted(&self) -> Vec<u8> {
        sorted_symbols(&self.symbols)
    }
}

impl fmt::Display for Draw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, format_symbols(&self.symbols))
    }
}

pub fn symbol_sum(symbols: &[u8]) -> u16 {
    symbols.iter().map(|&s| s as u16).sum()
}

pub fn sorted_symbols(symbols: &[u8]) -> Vec<u8> {
    let mut sorted = symbols.to_vec();
    sorted.sort_unstable();
    sorted
}

/// Render symbols compactly (`"042"`) when every symbol is a single digit,
/// dash-separated (`"04-17-33"`) otherwise.
pub fn format_symbols(symbols: &[u8]) -> String {
    if symbols.iter().all(|&s| s < 10) {
        symbols.iter().map(|s| char::from(b'0' + s)).collect()
    } else {
        symbols
            .iter()
            .map(|s| format!("{s:02}"))
            .collect::<Vec<_>>()
            .join("-")
    }
}

// ---------------------------------------------------------------------------
// Hit classification
// ---------------------------------------------------------------------------

/// How an actual draw matched a predicted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitType {
    None,
    /// Same multiset of symbols, any order.
    Box,
    /// Exact ordered match.
    Straight,
}

impl HitType {
    /// Classify `actual` against a set of predicted straights.
    pub fn classify<'a>(actual: &[u8], predictions: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let actual_box = sorted_symbols(actual);
        let mut best = HitType::None;
        for predicted in predictions {
            if predicted == actual {
                return HitType::Straight;
            }
            if best == HitType::None && sorted_symbols(predicted) == actual_box {
                best = HitType::Box;
            }
        }
        best
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, HitType::None)
    }
}

impl fmt::Display for HitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitType::None => write!(f, "none"),
            HitType::Box => write!(f, "box"),
            HitType::Straight => write!(f, "straight"),
        }
    }
}

// ---------------------------------------------------------------------------
// Capacity warning
// ---------------------------------------------------------------------------

/// Which generation bound stopped the scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityBound {
    /// `max_candidates` candidates already passed the filters.
    #[default]
    Candidates,
    /// `max_examined` sequences or prefixes were examined.
    Examined,
}

/// Reported when candidate generation hit its bound. Candidates are kept in
/// generation order; `first_dropped` and everything after it was never scored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityExceeded {
    #[serde(default)]
    pub bound: CapacityBound,
    pub limit: usize,
    /// First sequence (in generation order) that was discarded or never reached.
    pub first_dropped: Vec<u8>,
    /// Sequences from `first_dropped` onward that were never examined,
    /// counted before filtering.
    pub remaining: u64,
}

impl fmt::Display for CapacityExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bound {
            CapacityBound::Candidates => write!(
                f,
                "kept the first {} candidates; {} sequences from {} onward were not scored",
                self.limit,
                self.remaining,
                format_symbols(&self.first_dropped)
            ),
            CapacityBound::Examined => write!(
                f,
                "stopped after examining {} sequences; \
                 {} sequences from {} onward were not examined",
                self.limit,
                self.remaining,
                format_symbols(&self.first_dropped)
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Broad error category, used for structured reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Sequencing,
    Validation,
    StateIntegrity,
    CapacityExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Sequencing => write!(f, "sequencing"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::StateIntegrity => write!(f, "state_integrity"),
            ErrorKind::CapacityExceeded => write!(f, "capacity_exceeded"),
        }
    }
}

/// Domain-specific error types for DRAWCAST.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Sequencing error ({component}): draw {got} cannot follow draw {last_applied}")]
    Sequencing {
        component: &'static str,
        last_applied: u64,
        got: u64,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("State integrity error{}: {message}", at_draw(.index))]
    StateIntegrity { index: Option<u64>, message: String },

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(CapacityExceeded),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Sequencing { .. } => ErrorKind::Sequencing,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::StateIntegrity { .. } => ErrorKind::StateIntegrity,
            EngineError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
        }
    }

    pub(crate) fn integrity(index: Option<u64>, message: impl Into<String>) -> Self {
        EngineError::StateIntegrity {
            index,
            message: message.into(),
        }
    }

    /// Check that `got` is the immediate successor of `last_applied`.
    pub(crate) fn check_sequence(
        component: &'static str,
        last_applied: Option<u64>,
        got: u64,
    ) -> Result<(), EngineError> {
        match last_applied {
            Some(last) if got != last + 1 => Err(EngineError::Sequencing {
                component,
                last_applied: last,
                got,
            }),
            _ => Ok(()),
        }
    }
}

/// Display suffix naming the draw an integrity error is tied to, if any.
fn at_draw(index: &Option<u64>) -> String {
    index.map(|i| format!(" at draw {i}")).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
