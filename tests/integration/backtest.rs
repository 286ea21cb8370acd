//! Backtest replay end to end: full-space runs, cancellation with a
//! checkpoint on disk, parallel jobs and bounded generation.

use drawcast::backtest::{
    run_parallel, BacktestConfig, BacktestWindow, Backtester, CancelToken, Progress, ReplayState,
};
use drawcast::engine::pipeline::{Pipeline, PipelineSettings};
use drawcast::generator::{CandidateFilters, GenerationStrategy, GeneratorConfig, OverflowPolicy};
use drawcast::scoring::{Factor, ScoringWeights};
use drawcast::storage;
use drawcast::types::{ErrorKind, GameSpec, HitType};

use super::mock_store::SyntheticStore;

fn backtester(
    label: &str,
    settings: PipelineSettings,
    weights: ScoringWeights,
    config: BacktestConfig,
) -> Backtester {
    let pipeline = Pipeline::new(settings).unwrap();
    Backtester::new(label, pipeline, weights, CandidateFilters::default(), config).unwrap()
}

fn pick3(label: &str, weights: ScoringWeights) -> Backtester {
    backtester(label, PipelineSettings::new(GameSpec::pick3()), weights, BacktestConfig::default())
}

fn temp_path(kind: &str) -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("drawcast_it_{kind}_{}.json", uuid::Uuid::new_v4()));
    p.to_string_lossy().to_string()
}

#[test]
fn test_hundred_draws_full_space() {
    let store = SyntheticStore::pick3(100, 42);
    let mut bt = pick3("full", ScoringWeights::uniform());
    let report = bt.run(&store, BacktestWindow::full(), &CancelToken::new(), None).unwrap();

    assert_eq!(report.records.len(), 100);
    for (record, draw) in report.records.iter().zip(store.draws()) {
        assert_eq!(record.draw_index, draw.index);
        assert_eq!(record.actual, draw.symbols);
        assert_eq!(record.top_k.len(), 20);
        assert!(!record.truncated);
        let rank = record.rank_of_actual.unwrap();
        assert!((1..=1000).contains(&rank));
        if record.hit_type == HitType::Straight {
            assert!(rank <= 20);
        }
    }

    let summary = &report.summary;
    assert_eq!(summary.total_steps, 100);
    assert_eq!(summary.ranked_steps, 100);
    assert_eq!(summary.hits, summary.straight_hits + summary.box_hits);
    assert_eq!(
        summary.hits,
        report.records.iter().filter(|r| r.hit_type.is_hit()).count()
    );
    let mean = summary.mean_rank.unwrap();
    assert!((1.0..=1000.0).contains(&mean));
    assert_eq!(summary.rank_histogram.iter().map(|b| b.count).sum::<usize>(), 100);
    assert_eq!(summary.chance_rate, 0.02);
    assert!(summary.complete);
    assert_eq!(bt.state(), &ReplayState::Completed);
}

#[test]
fn test_cancel_checkpoint_on_disk_then_resume() {
    let store = SyntheticStore::pick3(45, 8);
    let window = BacktestWindow::new(15, None);
    let weights = ScoringWeights::only(Factor::PairCoverage);
    let config = BacktestConfig {
        top_k: 10,
        progress_every: 4,
    };

    let settings = PipelineSettings::new(GameSpec::pick3());
    let expected = backtester("a", settings, weights, config.clone())
        .run(&store, window, &CancelToken::new(), None)
        .unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let mut stop_at_twelve = |p: &Progress| {
        if p.completed >= 12 {
            trigger.cancel();
        }
    };
    let mut bt = backtester("b", PipelineSettings::new(GameSpec::pick3()), weights, config);
    let partial = bt.run(&store, window, &cancel, Some(&mut stop_at_twelve)).unwrap();
    assert!(!partial.is_complete());
    assert_eq!(partial.records.len(), 12);

    let path = temp_path("checkpoint");
    storage::save_checkpoint(partial.checkpoint.as_ref().unwrap(), Some(&path)).unwrap();
    let checkpoint = storage::load_checkpoint(Some(&path)).unwrap().unwrap();
    storage::delete_file(&path).unwrap();

    let resumed = bt.resume(&store, checkpoint, &CancelToken::new(), None).unwrap();
    assert!(resumed.is_complete());
    assert_eq!(resumed.records.len(), expected.records.len());
    for (a, b) in resumed.records.iter().zip(&expected.records) {
        assert_eq!(a.draw_index, b.draw_index);
        assert_eq!(a.rank_of_actual, b.rank_of_actual);
        assert_eq!(a.hit_type, b.hit_type);
    }
    assert_eq!(resumed.summary.hits, expected.summary.hits);
}

#[test]
fn test_parallel_jobs_match_sequential_runs() {
    let store = SyntheticStore::pick3(30, 21);
    let window = BacktestWindow::new(10, None);
    let weight_sets = [
        ("uniform", ScoringWeights::uniform()),
        ("type", ScoringWeights::only(Factor::TypeScore)),
        ("sum", ScoringWeights::only(Factor::SumProximity)),
        ("skip-heavy", ScoringWeights::uniform().with(Factor::SkipPressure, 4.0)),
    ];

    let mut jobs: Vec<Backtester> = weight_sets.iter().map(|(label, w)| pick3(label, *w)).collect();
    let results = run_parallel(&mut jobs, &store, window, &CancelToken::new());
    assert_eq!(results.len(), 4);

    for ((label, weights), result) in weight_sets.iter().zip(results) {
        let parallel = result.unwrap();
        let sequential = pick3(label, *weights)
            .run(&store, window, &CancelToken::new(), None)
            .unwrap();
        assert_eq!(&parallel.label, label);
        assert_eq!(parallel.records, sequential.records);
    }
    assert!(jobs.iter().all(|j| j.state() == &ReplayState::Completed));
}

#[test]
fn test_truncated_generation_is_flagged() {
    let store = SyntheticStore::pick3(20, 4);
    let mut settings = PipelineSettings::new(GameSpec::pick3());
    settings.generator = GeneratorConfig {
        strategy: GenerationStrategy::Exhaustive,
        max_candidates: 100,
        overflow: OverflowPolicy::Truncate,
        ..GeneratorConfig::default()
    };
    let config = BacktestConfig::default();
    let mut bt = backtester("bounded", settings, ScoringWeights::uniform(), config);
    let report = bt.run(&store, BacktestWindow::new(5, None), &CancelToken::new(), None).unwrap();

    assert_eq!(report.summary.truncated_steps, 15);
    for record in &report.records {
        assert!(record.truncated);
        assert_eq!(record.candidates_scored, 100);
        // Exhaustive order keeps 000..=099 only.
        assert_eq!(record.rank_of_actual.is_some(), record.actual[0] == 0);
    }
}

#[test]
fn test_reject_policy_aborts_run() {
    let store = SyntheticStore::pick3(10, 4);
    let mut settings = PipelineSettings::new(GameSpec::pick3());
    settings.generator.max_candidates = 50;
    settings.generator.overflow = OverflowPolicy::Reject;
    let config = BacktestConfig::default();
    let mut bt = backtester("strict", settings, ScoringWeights::uniform(), config);

    let err = bt.run(&store, BacktestWindow::new(3, None), &CancelToken::new(), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapacityExceeded);
    assert_eq!(err.position, 3);
    assert_eq!(err.index, Some(store.draws()[3].index));
    assert!(matches!(bt.state(), ReplayState::Aborted { .. }));
}

#[test]
fn test_beam_backtest() {
    let store = SyntheticStore::pick3(25, 13);
    let mut settings = PipelineSettings::new(GameSpec::pick3());
    settings.generator.strategy = GenerationStrategy::Beam { width: 100 };
    let mut bt = backtester("beam", settings, ScoringWeights::uniform(), BacktestConfig::default());
    let report = bt.run(&store, BacktestWindow::new(5, None), &CancelToken::new(), None).unwrap();

    assert_eq!(report.records.len(), 20);
    for record in &report.records {
        assert_eq!(record.candidates_scored, 100);
        assert!(!record.truncated);
        if let Some(rank) = record.rank_of_actual {
            assert!(rank <= 100);
        }
    }
}

#[test]
fn test_pick4_window() {
    let store = SyntheticStore::new(GameSpec::pick4(), 1, 12, 77);
    let mut settings = PipelineSettings::new(GameSpec::pick4());
    settings.generator.strategy = GenerationStrategy::Beam { width: 500 };
    let config = BacktestConfig::default();
    let mut bt = backtester("pick4", settings, ScoringWeights::uniform(), config);
    let report = bt
        .run(&store, BacktestWindow::new(8, Some(12)), &CancelToken::new(), None)
        .unwrap();

    assert_eq!(report.records.len(), 4);
    assert_eq!(report.summary.chance_rate, 20.0 / 10_000.0);
    assert_eq!(report.game, GameSpec::pick4());
}
