//! Skip tracking.
//!
//! Counts, for every feature, how many draws have passed since it last
//! occurred. Only features that actually hit are touched on `apply`; the
//! current skip of every other feature is derived from the last applied
//! index, so an absent feature's skip grows by one per draw for free.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::features::{FeatureKey, FeatureKind};
use crate::types::{Draw, EngineError, GameSpec};

// ---------------------------------------------------------------------------
// Lateness classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lateness {
    OnTime,
    Late,
    VeryLate,
}

impl fmt::Display for Lateness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lateness::OnTime => write!(f, "on-time"),
            Lateness::Late => write!(f, "late"),
            Lateness::VeryLate => write!(f, "very-late"),
        }
    }
}

/// Tier boundaries as multiples of the expected skip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatenessThresholds {
    #[serde(default = "default_on_time")]
    pub on_time_multiplier: f64,
    #[serde(default = "default_late")]
    pub late_multiplier: f64,
}

fn default_on_time() -> f64 {
    1.0
}

fn default_late() -> f64 {
    2.0
}

impl Default for LatenessThresholds {
    fn default() -> Self {
        Self {
            on_time_multiplier: default_on_time(),
            late_multiplier: default_late(),
        }
    }
}

impl LatenessThresholds {
    pub fn validate(&self) -> Result<(), EngineError> {
        let finite = self.on_time_multiplier.is_finite() && self.late_multiplier.is_finite();
        if !finite
            || self.on_time_multiplier <= 0.0
            || self.late_multiplier < self.on_time_multiplier
        {
            return Err(EngineError::Validation(format!(
                "lateness multipliers must satisfy 0 < on_time <= late, got {} / {}",
                self.on_time_multiplier, self.late_multiplier
            )));
        }
        Ok(())
    }

    pub fn classify(&self, current_skip: u64, expected_skip: f64) -> Lateness {
        let skip = current_skip as f64;
        if skip <= expected_skip * self.on_time_multiplier {
            Lateness::OnTime
        } else if skip <= expected_skip * self.late_multiplier {
            Lateness::Late
        } else {
            Lateness::VeryLate
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Stored per feature that has hit at least once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct HitRecord {
    last_seen: Option<u64>,
    total_skip: u64,
    hits: u64,
}

/// Point-in-time view of one feature's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounter {
    /// `None` if the feature has never occurred.
    pub last_seen_index: Option<u64>,
    pub current_skip: u64,
    pub total_skip_accumulated: u64,
    pub hit_count: u64,
}

/// Diagnostic answer for one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipInfo {
    pub key: FeatureKey,
    pub current_skip: u64,
    pub average_skip: f64,
    pub hit_count: u64,
    pub last_seen_index: Option<u64>,
    pub expected_skip: f64,
    pub lateness: Lateness,
}

impl SkipInfo {
    /// `current_skip` relative to expectation, smoothed so that a feature
    /// sitting exactly on its expected skip reads 1.0.
    pub fn lateness_ratio(&self) -> f64 {
        (self.current_skip as f64 + 1.0) / (self.expected_skip + 1.0)
    }
}

/// Result of a read-path lookup. Unknown keys are reported, not fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SkipLookup {
    Known(SkipInfo),
    Unknown { key: FeatureKey, reason: String },
}

impl SkipLookup {
    pub fn known(&self) -> Option<&SkipInfo> {
        match self {
            SkipLookup::Known(info) => Some(info),
            SkipLookup::Unknown { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Per-feature skip counters, updated strictly in draw order.
///
/// Cloning is cheap: counters sit behind an `Arc` and are copied only when
/// a shared tracker is mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipTracker {
    game: GameSpec,
    thresholds: LatenessThresholds,
    #[serde(with = "counter_entries")]
    counters: Arc<HashMap<FeatureKey, HitRecord>>,
    first_index: Option<u64>,
    last_applied: Option<u64>,
}

impl SkipTracker {
    pub fn new(game: GameSpec, thresholds: LatenessThresholds) -> Result<Self, EngineError> {
        thresholds.validate()?;
        Ok(Self {
            game,
            thresholds,
            counters: Arc::new(HashMap::new()),
            first_index: None,
            last_applied: None,
        })
    }

    pub fn game(&self) -> &GameSpec {
        &self.game
    }

    pub fn thresholds(&self) -> &LatenessThresholds {
        &self.thresholds
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn draws_applied(&self) -> u64 {
        match (self.first_index, self.last_applied) {
            (Some(first), Some(last)) => last - first + 1,
            _ => 0,
        }
    }

    /// Error if the counters cannot have come from applying draws to this
    /// game in order.
    pub fn check_integrity(&self) -> Result<(), EngineError> {
        let fault = |message: String| Err(EngineError::integrity(self.last_applied, message));
        if let Err(e) = self.thresholds.validate() {
            return fault(e.to_string());
        }
        let (first, last) = match (self.first_index, self.last_applied) {
            (Some(first), Some(last)) if first <= last => (first, last),
            (None, None) if self.counters.is_empty() => return Ok(()),
            (first, last) => {
                return fault(format!(
                    "skip tracker range is inconsistent: \
                     first={first:?} last={last:?} with {} counters",
                    self.counters.len()
                ))
            }
        };
        for (key, record) in self.counters.iter() {
            if let Err(e) = key.validate(&self.game) {
                return fault(e.to_string());
            }
            match record.last_seen {
                Some(seen) if seen < first || seen > last || record.hits == 0 => {
                    return fault(format!(
                        "{key} last seen at {seen}, outside draws {first}..={last}"
                    ))
                }
                None if record.hits > 0 => {
                    return fault(format!("{key} has {} hits but no last sighting", record.hits))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate a draw without touching state.
    pub fn check(&self, draw: &Draw) -> Result<(), EngineError> {
        self.game.validate_draw(draw)?;
        EngineError::check_sequence("skip tracker", self.last_applied, draw.index)
    }

    /// Record a draw. Rejected draws leave every counter unchanged.
    pub fn apply(&mut self, draw: &Draw) -> Result<(), EngineError> {
        self.check(draw)?;

        let keys = FeatureKey::extract(&self.game, &draw.symbols);
        let skips_before: Vec<u64> = keys
            .iter()
            .map(|key| self.skip_of(self.counters.get(key)))
            .collect();

        let counters = Arc::make_mut(&mut self.counters);
        for (key, skip_before) in keys.into_iter().zip(skips_before) {
            let record = counters.entry(key).or_default();
            record.total_skip += skip_before;
            record.hits += 1;
            record.last_seen = Some(draw.index);
        }

        self.first_index.get_or_insert(draw.index);
        self.last_applied = Some(draw.index);
        trace!(index = draw.index, tracked = self.counters.len(), "Skip counters updated");
        Ok(())
    }

    /// Drop all history.
    pub fn reset(&mut self) {
        self.counters = Arc::new(HashMap::new());
        self.first_index = None;
        self.last_applied = None;
    }

    fn skip_of(&self, record: Option<&HitRecord>) -> u64 {
        match (record.and_then(|r| r.last_seen), self.last_applied) {
            (Some(seen), Some(last)) => last - seen,
            _ => self.draws_applied(),
        }
    }

    /// Raw counter for a key valid in this game.
    pub fn counter(&self, key: &FeatureKey) -> Result<SkipCounter, EngineError> {
        key.validate(&self.game)?;
        let record = self.counters.get(key);
        Ok(SkipCounter {
            last_seen_index: record.and_then(|r| r.last_seen),
            current_skip: self.skip_of(record),
            total_skip_accumulated: record.map_or(0, |r| r.total_skip),
            hit_count: record.map_or(0, |r| r.hits),
        })
    }

    /// Skip statistics for a key; an unknown key is a validation error.
    pub fn info(&self, key: &FeatureKey) -> Result<SkipInfo, EngineError> {
        let counter = self.counter(key)?;
        let expected_skip = key.expected_skip(&self.game);
        Ok(SkipInfo {
            key: key.clone(),
            current_skip: counter.current_skip,
            average_skip: counter.total_skip_accumulated as f64 / counter.hit_count.max(1) as f64,
            hit_count: counter.hit_count,
            last_seen_index: counter.last_seen_index,
            expected_skip,
            lateness: self.thresholds.classify(counter.current_skip, expected_skip),
        })
    }

    /// Read-path query: never fails, reports unknown keys explicitly.
    pub fn query(&self, key: &FeatureKey) -> SkipLookup {
        match self.info(key) {
            Ok(info) => SkipLookup::Known(info),
            Err(e) => SkipLookup::Unknown {
                key: key.clone(),
                reason: e.to_string(),
            },
        }
    }

    /// Skip info for every key of a kind, in key order.
    pub fn counters(&self, kind: FeatureKind) -> Result<Vec<SkipInfo>, EngineError> {
        kind.enumerate(&self.game)?
            .iter()
            .map(|key| self.info(key))
            .collect()
    }
}

/// JSON maps need string keys, so counters travel as a sorted entry list.
mod counter_entries {
    use super::*;

    pub fn serialize<S: Serializer>(
        map: &Arc<HashMap<FeatureKey, HitRecord>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&FeatureKey, &HitRecord)> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Arc<HashMap<FeatureKey, HitRecord>>, D::Error> {
        let entries: Vec<(FeatureKey, HitRecord)> = Vec::deserialize(deserializer)?;
        Ok(Arc::new(entries.into_iter().collect()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    fn tracker() -> SkipTracker {
        SkipTracker::new(GameSpec::pick3(), LatenessThresholds::default()).unwrap()
    }

    fn apply_all(tracker: &mut SkipTracker, draws: &[&str]) {
        for (i, digits) in draws.iter().enumerate() {
            tracker.apply(&Draw::from_digits(i as u64, digits).unwrap()).unwrap();
        }
    }

    fn digit(symbol: u8) -> FeatureKey {
        FeatureKey::Digit { symbol }
    }

    #[test]
    fn test_worked_example_digit_zero() {
        let mut t = tracker();
        apply_all(&mut t, &["012", "345", "678", "901", "234"]);

        let zero = t.counter(&digit(0)).unwrap();
        assert_eq!(zero.last_seen_index, Some(3));
        assert_eq!(zero.current_skip, 1);
        assert_eq!(zero.hit_count, 2);
        // Gap between the hits at 0 and 3 is two draws.
        assert_eq!(zero.total_skip_accumulated, 2);
    }

    #[test]
    fn test_current_skip_matches_brute_force() {
        let draws = ["012", "345", "678", "901", "234", "555", "089", "123"];
        let mut t = tracker();
        for (i, digits) in draws.iter().enumerate() {
            t.apply(&Draw::from_digits(i as u64, digits).unwrap()).unwrap();
            for symbol in 0..10u8 {
                let c = char::from(b'0' + symbol);
                let brute = draws[..=i].iter().rev().take_while(|d| !d.contains(c)).count() as u64;
                let skip = t.counter(&digit(symbol)).unwrap().current_skip;
                assert_eq!(skip, brute, "digit {symbol} after {i}");
            }
        }
    }

    #[test]
    fn test_never_seen_feature_skip_counts_all_draws() {
        let mut t = tracker();
        apply_all(&mut t, &["111", "222", "333"]);
        let nine = t.counter(&digit(9)).unwrap();
        assert_eq!(nine.last_seen_index, None);
        assert_eq!(nine.current_skip, 3);
        assert_eq!(nine.hit_count, 0);
    }

    #[test]
    fn test_duplicate_index_rejected_without_mutation() {
        let mut t = tracker();
        apply_all(&mut t, &["012", "345"]);
        let before = t.counter(&digit(3)).unwrap();

        let err = t.apply(&Draw::from_digits(1, "333").unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sequencing);
        assert_eq!(t.counter(&digit(3)).unwrap(), before);
        assert_eq!(t.last_applied(), Some(1));
    }

    #[test]
    fn test_gap_rejected() {
        let mut t = tracker();
        apply_all(&mut t, &["012"]);
        let err = t.apply(&Draw::from_digits(2, "345").unwrap()).unwrap_err();
        assert!(matches!(err, EngineError::Sequencing { last_applied: 0, got: 2, .. }));
        assert_eq!(t.draws_applied(), 1);
    }

    #[test]
    fn test_invalid_draw_rejected_before_mutation() {
        let mut t = tracker();
        let err = t.apply(&Draw::new(0, vec![1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(t.last_applied(), None);
    }

    #[test]
    fn test_first_draw_may_start_anywhere() {
        let mut t = tracker();
        t.apply(&Draw::from_digits(500, "123").unwrap()).unwrap();
        t.apply(&Draw::from_digits(501, "456").unwrap()).unwrap();
        assert_eq!(t.draws_applied(), 2);
        assert_eq!(t.counter(&digit(1)).unwrap().current_skip, 1);
        assert_eq!(t.counter(&digit(0)).unwrap().current_skip, 2);
    }

    #[test]
    fn test_average_skip_and_lateness() {
        let mut t = tracker();
        // Digit 7 hits at 0, 3, 6 → gaps of 2 and 2 after the first hit.
        apply_all(&mut t, &["700", "111", "222", "777", "333", "444", "007", "555"]);
        let info = t.info(&digit(7)).unwrap();
        assert_eq!(info.hit_count, 3);
        assert!((info.average_skip - 4.0 / 3.0).abs() < 1e-9);
        assert_eq!(info.current_skip, 1);
        assert_eq!(info.lateness, Lateness::OnTime);

        // Position 0 = 9 never seen in 8 draws; expected skip 9 → on time.
        let pos = t.info(&FeatureKey::PositionalDigit { position: 0, symbol: 9 }).unwrap();
        assert_eq!(pos.lateness, Lateness::OnTime);
    }

    #[test]
    fn test_lateness_tiers() {
        let th = LatenessThresholds::default();
        assert_eq!(th.classify(9, 9.0), Lateness::OnTime);
        assert_eq!(th.classify(10, 9.0), Lateness::Late);
        assert_eq!(th.classify(18, 9.0), Lateness::Late);
        assert_eq!(th.classify(19, 9.0), Lateness::VeryLate);
        let inverted = LatenessThresholds { on_time_multiplier: 2.0, late_multiplier: 1.0 };
        assert!(inverted.validate().is_err());
        let undefined = LatenessThresholds { on_time_multiplier: f64::NAN, late_multiplier: 1.0 };
        assert!(undefined.validate().is_err());
    }

    #[test]
    fn test_query_unknown_feature() {
        let t = tracker();
        let lookup = t.query(&digit(12));
        assert!(matches!(lookup, SkipLookup::Unknown { .. }));
        assert!(lookup.known().is_none());
        assert!(t.info(&digit(12)).is_err());
    }

    #[test]
    fn test_clone_is_isolated_from_later_applies() {
        let mut t = tracker();
        apply_all(&mut t, &["012"]);
        let frozen = t.clone();
        t.apply(&Draw::from_digits(1, "999").unwrap()).unwrap();

        assert_eq!(frozen.counter(&digit(9)).unwrap().hit_count, 0);
        assert_eq!(frozen.counter(&digit(0)).unwrap().current_skip, 0);
        assert_eq!(t.counter(&digit(0)).unwrap().current_skip, 1);
    }

    #[test]
    fn test_counters_listing() {
        let mut t = tracker();
        apply_all(&mut t, &["012", "345"]);
        let sums = t.counters(FeatureKind::Sum).unwrap();
        assert_eq!(sums.len(), 28);
        assert_eq!(sums[3].hit_count, 1);
        assert_eq!(sums[12].hit_count, 1);
    }

    #[test]
    fn test_json_roundtrip_preserves_counters() {
        let mut t = tracker();
        apply_all(&mut t, &["012", "345", "678"]);
        let json = serde_json::to_string(&t).unwrap();
        let back: SkipTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(back.counter(&digit(4)).unwrap(), t.counter(&digit(4)).unwrap());
        assert_eq!(back.last_applied(), Some(2));
    }

    #[test]
    fn test_integrity_rejects_inverted_range() {
        let mut t = tracker();
        apply_all(&mut t, &["012", "345", "678"]);
        assert!(t.check_integrity().is_ok());
        assert!(tracker().check_integrity().is_ok());

        let mut json = serde_json::to_value(&t).unwrap();
        json["first_index"] = serde_json::json!(9);
        let inverted: SkipTracker = serde_json::from_value(json).unwrap();
        let err = inverted.check_integrity().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateIntegrity);
        assert!(matches!(err, EngineError::StateIntegrity { index: Some(2), .. }));
    }

    #[test]
    fn test_integrity_rejects_sighting_after_last_draw() {
        let mut t = tracker();
        apply_all(&mut t, &["012", "345"]);
        let mut json = serde_json::to_value(&t).unwrap();
        // Entries are (key, record) pairs sorted by key.
        json["counters"][0][1]["last_seen"] = serde_json::json!(50);
        let future: SkipTracker = serde_json::from_value(json).unwrap();
        assert_eq!(future.check_integrity().unwrap_err().kind(), ErrorKind::StateIntegrity);
    }

    #[test]
    fn test_reset() {
        let mut t = tracker();
        apply_all(&mut t, &["012"]);
        t.reset();
        assert_eq!(t.draws_applied(), 0);
        t.apply(&Draw::from_digits(0, "012").unwrap()).unwrap();
    }
}
