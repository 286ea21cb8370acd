//! Feature keys derived from draws.
//!
//! Every trackable property of a draw (a digit, a positional pair, a sum,
//! a full combination, a symbol-class pattern) is a variant of the closed
//! [`FeatureKey`] enum. Keys are validated against a [`GameSpec`]; a key
//! that cannot occur in the game is "unknown".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{format_symbols, sorted_symbols, symbol_sum, EngineError, GameSpec};

/// Upper bound on the number of keys [`FeatureKind::enumerate`] will build.
pub const ENUMERATION_LIMIT: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Symbol classes
// ---------------------------------------------------------------------------

/// Many-to-one grouping of symbols for pattern-level analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassScheme {
    /// Even = 0, odd = 1.
    Parity,
    /// Low = 0, high = 1 (split at `A / 2`).
    HighLow,
    /// Symbol mod ⌈A/2⌉: pairs 0/5, 1/6, 2/7 … share a class for A = 10.
    #[serde(rename = "vtrac")]
    VTrac,
}

impl ClassScheme {
    pub const ALL: [ClassScheme; 3] =
        [ClassScheme::Parity, ClassScheme::HighLow, ClassScheme::VTrac];

    pub fn class_count(&self, game: &GameSpec) -> u8 {
        match self {
            ClassScheme::Parity | ClassScheme::HighLow => 2,
            ClassScheme::VTrac => vtrac_modulus(game),
        }
    }

    pub fn classify(&self, game: &GameSpec, symbol: u8) -> u8 {
        match self {
            ClassScheme::Parity => symbol % 2,
            ClassScheme::HighLow => u8::from(symbol >= game.high_threshold()),
            ClassScheme::VTrac => symbol % vtrac_modulus(game),
        }
    }

    /// Number of alphabet symbols falling into `class`.
    pub fn class_size(&self, game: &GameSpec, class: u8) -> usize {
        (0..game.alphabet_size)
            .filter(|&s| self.classify(game, s) == class)
            .count()
    }

    pub fn pattern(&self, game: &GameSpec, symbols: &[u8]) -> Vec<u8> {
        symbols.iter().map(|&s| self.classify(game, s)).collect()
    }

    /// Number of distinct patterns (`class_count ^ L`), saturating at `u64::MAX`.
    pub fn pattern_count(&self, game: &GameSpec) -> u64 {
        (self.class_count(game) as u64).saturating_pow(game.length as u32)
    }

    /// Probability that a uniformly random draw has this pattern.
    pub fn pattern_probability(&self, game: &GameSpec, classes: &[u8]) -> f64 {
        let a = game.alphabet() as f64;
        classes
            .iter()
            .map(|&c| self.class_size(game, c) as f64 / a)
            .product()
    }
}

fn vtrac_modulus(game: &GameSpec) -> u8 {
    game.alphabet_size.div_ceil(2)
}

impl fmt::Display for ClassScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassScheme::Parity => write!(f, "parity"),
            ClassScheme::HighLow => write!(f, "high_low"),
            ClassScheme::VTrac => write!(f, "vtrac"),
        }
    }
}

// ---------------------------------------------------------------------------
// Feature kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Digit,
    PositionalDigit,
    PositionalPair,
    UnorderedPair,
    Sum,
    Straight,
    Box,
    Pattern(ClassScheme),
}

impl FeatureKind {
    pub fn all() -> Vec<FeatureKind> {
        let mut kinds = vec![
            FeatureKind::Digit,
            FeatureKind::PositionalDigit,
            FeatureKind::PositionalPair,
            FeatureKind::UnorderedPair,
            FeatureKind::Sum,
            FeatureKind::Straight,
            FeatureKind::Box,
        ];
        kinds.extend(ClassScheme::ALL.iter().map(|s| FeatureKind::Pattern(*s)));
        kinds
    }

    /// Every key of this kind that can occur in `game`, in ascending order.
    pub fn enumerate(&self, game: &GameSpec) -> Result<Vec<FeatureKey>, EngineError> {
        let a = game.alphabet_size;
        let l = game.length as u8;
        let keys = match self {
            FeatureKind::Digit => (0..a).map(|symbol| FeatureKey::Digit { symbol }).collect(),
            FeatureKind::PositionalDigit => (0..l)
                .flat_map(|position| {
                    (0..a).map(move |symbol| FeatureKey::PositionalDigit { position, symbol })
                })
                .collect(),
            FeatureKind::PositionalPair => {
                let mut keys = Vec::new();
                for first in 0..l {
                    for second in first + 1..l {
                        for x in 0..a {
                            for y in 0..a {
                                keys.push(FeatureKey::PositionalPair { first, second, a: x, b: y });
                            }
                        }
                    }
                }
                keys
            }
            FeatureKind::UnorderedPair => {
                if game.length < 2 {
                    Vec::new()
                } else {
                    (0..a)
                        .flat_map(|low| {
                            (low..a).map(move |high| FeatureKey::UnorderedPair { low, high })
                        })
                        .collect()
                }
            }
            FeatureKind::Sum => (0..=game.max_sum())
                .map(|value| FeatureKey::Sum { value })
                .collect(),
            FeatureKind::Straight => {
                check_enumeration_size(game.space_size())?;
                Odometer::new(game)
                    .map(|symbols| FeatureKey::Straight { symbols })
                    .collect()
            }
            FeatureKind::Box => {
                check_enumeration_size(game.space_size())?;
                Odometer::new(game)
                    .filter(|s| s.windows(2).all(|w| w[0] <= w[1]))
                    .map(|symbols| FeatureKey::Box { symbols })
                    .collect()
            }
            FeatureKind::Pattern(scheme) => {
                check_enumeration_size(scheme.pattern_count(game))?;
                let classes = GameSpec {
                    name: String::new(),
                    length: game.length,
                    alphabet_size: scheme.class_count(game),
                };
                Odometer::new(&classes)
                    .map(|classes| FeatureKey::Pattern { scheme: *scheme, classes })
                    .collect()
            }
        };
        Ok(keys)
    }
}

fn check_enumeration_size(size: u64) -> Result<(), EngineError> {
    if size > ENUMERATION_LIMIT {
        return Err(EngineError::Validation(format!(
            "refusing to enumerate {size} keys (limit {ENUMERATION_LIMIT})"
        )));
    }
    Ok(())
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Digit => write!(f, "digit"),
            FeatureKind::PositionalDigit => write!(f, "positional_digit"),
            FeatureKind::PositionalPair => write!(f, "positional_pair"),
            FeatureKind::UnorderedPair => write!(f, "unordered_pair"),
            FeatureKind::Sum => write!(f, "sum"),
            FeatureKind::Straight => write!(f, "straight"),
            FeatureKind::Box => write!(f, "box"),
            FeatureKind::Pattern(scheme) => write!(f, "pattern:{scheme}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Feature keys
// ---------------------------------------------------------------------------

/// A trackable property of a draw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKey {
    /// Symbol present at any position.
    Digit { symbol: u8 },
    /// Symbol at a specific position ("column").
    PositionalDigit { position: u8, symbol: u8 },
    /// Ordered symbols at two positions (front/split/back pairs for L = 3).
    PositionalPair { first: u8, second: u8, a: u8, b: u8 },
    /// Two symbols present at any two positions. `low == high` is a double.
    UnorderedPair { low: u8, high: u8 },
    Sum { value: u16 },
    Straight { symbols: Vec<u8> },
    /// Sorted symbols.
    Box { symbols: Vec<u8> },
    Pattern { scheme: ClassScheme, classes: Vec<u8> },
}

impl FeatureKey {
    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureKey::Digit { .. } => FeatureKind::Digit,
            FeatureKey::PositionalDigit { .. } => FeatureKind::PositionalDigit,
            FeatureKey::PositionalPair { .. } => FeatureKind::PositionalPair,
            FeatureKey::UnorderedPair { .. } => FeatureKind::UnorderedPair,
            FeatureKey::Sum { .. } => FeatureKind::Sum,
            FeatureKey::Straight { .. } => FeatureKind::Straight,
            FeatureKey::Box { .. } => FeatureKind::Box,
            FeatureKey::Pattern { scheme, .. } => FeatureKind::Pattern(*scheme),
        }
    }

    /// All distinct features present in `symbols`, sorted.
    ///
    /// `symbols` must already be valid for `game`.
    pub fn extract(game: &GameSpec, symbols: &[u8]) -> Vec<FeatureKey> {
        let len = symbols.len();
        let mut keys = Vec::with_capacity(3 * len + len * len + 8);

        for (position, &symbol) in symbols.iter().enumerate() {
            keys.push(FeatureKey::Digit { symbol });
            keys.push(FeatureKey::PositionalDigit {
                position: position as u8,
                symbol,
            });
        }
        for first in 0..len {
            for second in first + 1..len {
                let (a, b) = (symbols[first], symbols[second]);
                keys.push(FeatureKey::PositionalPair {
                    first: first as u8,
                    second: second as u8,
                    a,
                    b,
                });
                keys.push(FeatureKey::UnorderedPair {
                    low: a.min(b),
                    high: a.max(b),
                });
            }
        }
        keys.push(FeatureKey::Sum {
            value: symbol_sum(symbols),
        });
        keys.push(FeatureKey::Straight {
            symbols: symbols.to_vec(),
        });
        keys.push(FeatureKey::Box {
            symbols: sorted_symbols(symbols),
        });
        for scheme in ClassScheme::ALL {
            keys.push(FeatureKey::Pattern {
                scheme,
                classes: scheme.pattern(game, symbols),
            });
        }

        keys.sort();
        keys.dedup();
        keys
    }

    /// Reject keys that cannot occur in `game`.
    pub fn validate(&self, game: &GameSpec) -> Result<(), EngineError> {
        let l = game.length;
        let ok = match self {
            FeatureKey::Digit { symbol } => game.contains_symbol(*symbol),
            FeatureKey::PositionalDigit { position, symbol } => {
                (*position as usize) < l && game.contains_symbol(*symbol)
            }
            FeatureKey::PositionalPair { first, second, a, b } => {
                first < second
                    && (*second as usize) < l
                    && game.contains_symbol(*a)
                    && game.contains_symbol(*b)
            }
            FeatureKey::UnorderedPair { low, high } => {
                l >= 2 && low <= high && game.contains_symbol(*high)
            }
            FeatureKey::Sum { value } => *value <= game.max_sum(),
            FeatureKey::Straight { symbols } => game.validate_symbols(symbols).is_ok(),
            FeatureKey::Box { symbols } => {
                game.validate_symbols(symbols).is_ok() && symbols.windows(2).all(|w| w[0] <= w[1])
            }
            FeatureKey::Pattern { scheme, classes } => {
                classes.len() == l && classes.iter().all(|&c| c < scheme.class_count(game))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::Validation(format!("unknown feature {self} for {game}")))
        }
    }

    /// Probability that a uniformly random draw of `game` contains this key.
    /// Assumes the key is valid for the game.
    pub fn probability(&self, game: &GameSpec) -> f64 {
        let a = game.alphabet() as f64;
        let l = game.length as i32;
        let miss_one = (a - 1.0) / a;
        match self {
            FeatureKey::Digit { .. } => 1.0 - miss_one.powi(l),
            FeatureKey::PositionalDigit { .. } => 1.0 / a,
            FeatureKey::PositionalPair { .. } => 1.0 / (a * a),
            FeatureKey::UnorderedPair { low, high } if low == high => {
                // At least two occurrences of the symbol.
                1.0 - miss_one.powi(l) - l as f64 * (1.0 / a) * miss_one.powi(l - 1)
            }
            FeatureKey::UnorderedPair { .. } => {
                let miss_two = (a - 2.0) / a;
                1.0 - 2.0 * miss_one.powi(l) + miss_two.powi(l)
            }
            FeatureKey::Sum { value } => sum_distribution(game)
                .get(*value as usize)
                .copied()
                .unwrap_or(0.0),
            FeatureKey::Straight { .. } => 1.0 / a.powi(l),
            FeatureKey::Box { symbols } => {
                let arrangements = arrangements(symbols) as f64;
                arrangements / a.powi(l)
            }
            FeatureKey::Pattern { scheme, classes } => scheme.pattern_probability(game, classes),
        }
    }

    /// Expected gap between hits, `1/p − 1`.
    pub fn expected_skip(&self, game: &GameSpec) -> f64 {
        let p = self.probability(game);
        if p <= 0.0 {
            f64::INFINITY
        } else {
            1.0 / p - 1.0
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKey::Digit { symbol } => write!(f, "digit {symbol}"),
            FeatureKey::PositionalDigit { position, symbol } => {
                write!(f, "position {position} = {symbol}")
            }
            FeatureKey::PositionalPair { first, second, a, b } => {
                write!(f, "pair p{first}p{second} = {a}{b}")
            }
            FeatureKey::UnorderedPair { low, high } => write!(f, "any pair {low}{high}"),
            FeatureKey::Sum { value } => write!(f, "sum {value}"),
            FeatureKey::Straight { symbols } => write!(f, "straight {}", format_symbols(symbols)),
            FeatureKey::Box { symbols } => write!(f, "box {}", format_symbols(symbols)),
            // VTrac groups are conventionally numbered from 1.
            FeatureKey::Pattern { scheme: ClassScheme::VTrac, classes } => {
                let shown: Vec<u8> = classes.iter().map(|c| c + 1).collect();
                write!(f, "vtrac pattern {}", format_symbols(&shown))
            }
            FeatureKey::Pattern { scheme, classes } => {
                write!(f, "{scheme} pattern {}", format_symbols(classes))
            }
        }
    }
}

/// Distinct orderings of a multiset: `L! / ∏ mult!`.
pub fn arrangements(symbols: &[u8]) -> u64 {
    let sorted = sorted_symbols(symbols);
    let mut result = factorial(sorted.len() as u64);
    for run in sorted.chunk_by(|x, y| x == y) {
        result /= factorial(run.len() as u64);
    }
    result
}

fn factorial(n: u64) -> u64 {
    (1..=n).product()
}

/// Probability of each sum `0..=max_sum` for a uniformly random draw.
pub fn sum_distribution(game: &GameSpec) -> Vec<f64> {
    let a = game.alphabet();
    let max = game.max_sum() as usize;
    let mut ways = vec![0.0_f64; max + 1];
    ways[0] = 1.0;
    for pos in 0..game.length {
        let reach = pos * (a - 1);
        let mut next = vec![0.0_f64; max + 1];
        for (s, &w) in ways.iter().enumerate().take(reach + 1) {
            if w == 0.0 {
                continue;
            }
            for v in 0..a {
                next[s + v] += w;
            }
        }
        ways = next;
    }
    let total = (a as f64).powi(game.length as i32);
    ways.into_iter().map(|w| w / total).collect()
}

// ---------------------------------------------------------------------------
// Odometer
// ---------------------------------------------------------------------------

/// Lexicographic enumeration of every symbol sequence of a game
/// (`00…0`, `00…1`, …, `(A−1)…(A−1)`).
#[derive(Debug, Clone)]
pub struct Odometer {
    current: Option<Vec<u8>>,
    alphabet_size: u8,
}

impl Odometer {
    pub fn new(game: &GameSpec) -> Self {
        Self {
            current: Some(vec![0; game.length]),
            alphabet_size: game.alphabet_size,
        }
    }
}

impl Iterator for Odometer {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let current = self.current.take()?;
        let mut next = current.clone();
        let mut rolled_over = true;
        for digit in next.iter_mut().rev() {
            if *digit + 1 < self.alphabet_size {
                *digit += 1;
                rolled_over = false;
                break;
            }
            *digit = 0;
        }
        if !rolled_over {
            self.current = Some(next);
        }
        Some(current)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
