//! Causal replay: nothing computed for draw t may depend on draw t or later.

use drawcast::backtest::{BacktestConfig, BacktestReport, BacktestWindow, CancelToken};
use drawcast::engine::pipeline::PipelineSettings;
use drawcast::engine::PredictionEngine;
use drawcast::generator::CandidateFilters;
use drawcast::scoring::ScoringWeights;
use drawcast::storage::DrawStore;

use super::mock_store::SyntheticStore;

fn engine(store: &SyntheticStore) -> PredictionEngine {
    PredictionEngine::new(PipelineSettings::new(store.game().clone()))
        .unwrap()
        .with_backtest_config(BacktestConfig {
            top_k: 20,
            progress_every: 100,
        })
        .unwrap()
}

fn backtest(store: &SyntheticStore, window: BacktestWindow) -> BacktestReport {
    engine(store)
        .run_backtest(
            store,
            window,
            ScoringWeights::uniform(),
            CandidateFilters::default(),
            &CancelToken::new(),
            None,
        )
        .unwrap()
}

#[test]
fn test_alternate_future_leaves_past_records_unchanged() {
    let base = SyntheticStore::pick3(60, 7);
    let fork = base.fork_at(40, 99);
    assert_ne!(base.get(40).unwrap().symbols, fork.get(40).unwrap().symbols);

    let window = BacktestWindow::new(10, None);
    let a = backtest(&base, window);
    let b = backtest(&fork, window);

    // Positions 10..40 only ever see the shared prefix.
    assert_eq!(a.records[..30], b.records[..30]);

    // The prediction for draw 40 is made before draw 40 is seen, so the
    // top-K matches even though the actual outcome differs.
    assert_eq!(a.records[30].top_k, b.records[30].top_k);
    assert_ne!(a.records[30].actual, b.records[30].actual);
}

#[test]
fn test_truncated_history_gives_same_prefix() {
    let full = SyntheticStore::pick3(50, 3);
    let short = full.truncated(35);

    let window = BacktestWindow::new(5, None);
    let a = backtest(&full, window);
    let b = backtest(&short, window);

    assert_eq!(a.records.len(), 45);
    assert_eq!(b.records.len(), 30);
    assert_eq!(a.records[..30], b.records[..]);
}

#[test]
fn test_live_predictions_match_backtest_step() {
    // Predictions made live after ingesting draws 0..30 equal the top-K the
    // backtest recorded for the step at position 30.
    let store = SyntheticStore::pick3(40, 11);
    let report = backtest(&store, BacktestWindow::new(30, Some(31)));

    let mut live = engine(&store);
    live.ingest_store(&store.truncated(30)).unwrap();
    let set = live
        .top_predictions(20, &ScoringWeights::uniform(), &CandidateFilters::default())
        .unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].top_k, set.candidates);
}

#[test]
fn test_snapshot_unaffected_by_later_ingest() {
    let store = SyntheticStore::pick3(20, 5);
    let mut live = engine(&store);
    live.ingest_store(&store.truncated(10)).unwrap();

    let snapshot = live.snapshot();
    let before = live
        .pipeline()
        .rank(&snapshot, &ScoringWeights::uniform(), &CandidateFilters::default())
        .unwrap();

    live.ingest_store(&store).unwrap();
    assert_eq!(live.state().draws_applied(), 20);
    assert_eq!(snapshot.draws_applied(), 10);

    let after = live
        .pipeline()
        .rank(&snapshot, &ScoringWeights::uniform(), &CandidateFilters::default())
        .unwrap();
    assert_eq!(before, after);
    assert!(snapshot.ensure_before(store.get(10).unwrap().index).is_ok());
}
