//! Prediction engine facade: ingestion, skip lookups, column predictions
//! and ranked output.

use drawcast::engine::pipeline::PipelineSettings;
use drawcast::engine::PredictionEngine;
use drawcast::features::{ClassScheme, FeatureKey, FeatureKind};
use drawcast::generator::{CandidateFilters, PatternFilter, SumRange};
use drawcast::scoring::{Factor, ScoringWeights};
use drawcast::storage::MemoryDrawStore;
use drawcast::tracking::skip::{Lateness, SkipLookup};
use drawcast::types::{Draw, ErrorKind, GameSpec};

use super::mock_store::SyntheticStore;

fn pick3_engine() -> PredictionEngine {
    PredictionEngine::new(PipelineSettings::new(GameSpec::pick3())).unwrap()
}

#[test]
fn test_worked_example_skip_counters() {
    let store =
        MemoryDrawStore::from_digit_strings(0, &["012", "345", "678", "901", "234"]).unwrap();
    let mut engine = pick3_engine();
    engine.ingest_store(&store).unwrap();

    let zero = engine.feature_skip_info(&FeatureKey::Digit { symbol: 0 });
    let info = zero.known().unwrap();
    assert_eq!(info.last_seen_index, Some(3));
    assert_eq!(info.current_skip, 1);
    assert_eq!(info.hit_count, 2);

    // Digit 5 appeared once, at draw 1.
    let five = engine.feature_skip_info(&FeatureKey::Digit { symbol: 5 });
    let info = five.known().unwrap();
    assert_eq!(info.current_skip, 3);
    assert_eq!(info.hit_count, 1);
    assert_eq!(info.lateness, Lateness::Late);

    // A box never drawn has skipped every draw.
    let never = engine.feature_skip_info(&FeatureKey::Box { symbols: vec![9, 9, 9] });
    let info = never.known().unwrap();
    assert_eq!(info.hit_count, 0);
    assert_eq!(info.current_skip, 5);
    assert!(info.last_seen_index.is_none());
}

#[test]
fn test_unknown_features_are_reported() {
    let engine = pick3_engine();
    for key in [
        FeatureKey::Digit { symbol: 10 },
        FeatureKey::PositionalDigit { position: 3, symbol: 1 },
        FeatureKey::Straight { symbols: vec![1, 2] },
        FeatureKey::Sum { value: 28 },
    ] {
        assert!(matches!(engine.feature_skip_info(&key), SkipLookup::Unknown { .. }), "{key:?}");
    }
}

#[test]
fn test_transition_example() {
    // Single-position game over {0, 1, 2} fed 0, 1, 2, 1, 2.
    let game = GameSpec::new("tri", 1, 3).unwrap();
    let mut engine = PredictionEngine::new(PipelineSettings::new(game)).unwrap();
    for (i, symbol) in [0u8, 1, 2, 1, 2].into_iter().enumerate() {
        engine.ingest(&Draw::new(i as u64, vec![symbol])).unwrap();
    }

    let column = engine.column_prediction(0).unwrap();
    assert_eq!(column.context, Some((1, 2)));
    assert_eq!(column.context_total, 1);
    assert_eq!(column.argmax, 1);
    assert!((column.probability(0) - 0.25).abs() < 1e-12);
    assert!((column.probability(1) - 0.5).abs() < 1e-12);
    assert!((column.probability(2) - 0.25).abs() < 1e-12);
    assert!((column.confidence - 0.5).abs() < 1e-12);
}

#[test]
fn test_sequencing_errors_leave_state_intact() {
    let mut engine = pick3_engine();
    engine.ingest(&Draw::from_digits(10, "123").unwrap()).unwrap();

    let duplicate = engine.ingest(&Draw::from_digits(10, "456").unwrap()).unwrap_err();
    let gap = engine.ingest(&Draw::from_digits(12, "456").unwrap()).unwrap_err();
    let malformed = engine.ingest(&Draw::new(11, vec![1, 2])).unwrap_err();
    assert_eq!(duplicate.kind(), ErrorKind::Sequencing);
    assert_eq!(gap.kind(), ErrorKind::Sequencing);
    assert_eq!(malformed.kind(), ErrorKind::Validation);

    assert_eq!(engine.state().draws_applied(), 1);
    assert_eq!(engine.state().last_applied(), Some(10));
    engine.ingest(&Draw::from_digits(11, "456").unwrap()).unwrap();
}

#[test]
fn test_top_predictions_ranked_and_deterministic() {
    let store = SyntheticStore::pick3(80, 17);
    let mut engine = pick3_engine();
    engine.ingest_store(&store).unwrap();

    let weights = ScoringWeights::uniform();
    let filters = CandidateFilters::default();
    let first = engine.top_predictions(25, &weights, &filters).unwrap();
    let second = engine.top_predictions(25, &weights, &filters).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.candidates.len(), 25);

    for pair in first.candidates.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.composite >= b.composite);
        if a.composite == b.composite {
            assert!(a.scores.skip_pressure >= b.scores.skip_pressure);
        }
    }
    for candidate in &first.candidates {
        assert!((0.0..=100.0).contains(&candidate.composite));
        for factor in Factor::ALL {
            assert!((0.0..=1.0).contains(&candidate.scores.get(factor)));
        }
    }
}

#[test]
fn test_filters_constrain_predictions() {
    let store = SyntheticStore::pick3(40, 2);
    let mut engine = pick3_engine();
    engine.ingest_store(&store).unwrap();

    let filters = CandidateFilters {
        pattern: Some(PatternFilter {
            scheme: ClassScheme::HighLow,
            classes: vec![1, 0, 1],
        }),
        sum_range: Some(SumRange { min: 12, max: 16 }),
        distinct_boxes: false,
        box_skip: None,
    };
    let set = engine
        .top_predictions(50, &ScoringWeights::uniform(), &filters)
        .unwrap();
    assert!(!set.candidates.is_empty());
    for candidate in &set.candidates {
        let s = &candidate.symbols;
        assert!(s[0] >= 5 && s[1] < 5 && s[2] >= 5);
        let sum: u16 = s.iter().map(|&d| d as u16).sum();
        assert!((12..=16).contains(&sum));
    }
}

#[test]
fn test_partial_prediction_and_diagnostics() {
    let store = SyntheticStore::pick3(60, 31);
    let mut engine = pick3_engine();
    engine.ingest_store(&store).unwrap();

    let partial = engine.partial_prediction(1);
    assert_eq!(partial.values.len(), 3);
    assert_eq!(partial.predicted_positions().len(), 1);

    let digits = engine.state().skips().counters(FeatureKind::Digit).unwrap();
    assert_eq!(digits.len(), 10);
    let total_hits: u64 = digits.iter().map(|i| i.hit_count).sum();
    // Every draw hits between one and three distinct digits.
    assert!((60..=180).contains(&total_hits));
}
