//! DRAWCAST — causal skip/transition scoring for digit lotteries
//!
//! Entry point. Loads configuration and draw history, initialises
//! structured logging, prints the ranked predictions for the next draw,
//! then runs the configured backtest with Ctrl+C wired to cancellation.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use drawcast::backtest::{
    run_parallel, BacktestError, BacktestReport, BacktestWindow, Backtester, CancelToken,
    Checkpoint, Progress,
};
use drawcast::config::AppConfig;
use drawcast::engine::PredictionEngine;
use drawcast::storage::{self, MemoryDrawStore};
use drawcast::types::{format_symbols, ErrorKind};

const BANNER: &str = r#"
     _                                    _
  __| |_ __ __ ___      _____ __ _ ___| |_
 / _` | '__/ _` \ \ /\ / / __/ _` / __| __|
| (_| | | | (_| |\ V  V / (_| (_| \__ \ |_
 \__,_|_|  \__,_| \_/\_/ \___\__,_|___/\__|

  Causal skip & transition scoring
  v0.1.0
"#;

/// Main backtest report plus the parallel job results.
struct BacktestOutcome {
    main: BacktestReport,
    jobs: Vec<Result<BacktestReport, BacktestError>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    let game = cfg.game()?;
    info!(config = %config_path, game = %game, "DRAWCAST starting up");

    // -- History -----------------------------------------------------------

    let store = Arc::new(storage::load_draws(&cfg.data.draws_path, &game)?);

    let mut engine = PredictionEngine::new(cfg.pipeline_settings()?)?
        .with_backtest_config(cfg.backtest.config())?;
    engine.ingest_store(store.as_ref())?;

    // -- Next-draw predictions ---------------------------------------------

    log_predictions(&engine, &cfg)?;

    if !cfg.backtest.enabled {
        info!("Backtest disabled, done.");
        return Ok(());
    }

    // -- Backtest ----------------------------------------------------------

    let checkpoint_path = cfg.data.checkpoint_path.as_deref();
    let checkpoint = storage::load_checkpoint(checkpoint_path)?;
    let main_job = engine.backtester("main", cfg.scoring.weights, cfg.filters.clone())?;
    let jobs = cfg
        .backtest
        .jobs
        .iter()
        .map(|job| engine.backtester(job.label.clone(), job.weights, cfg.filters.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let cancel = CancelToken::new();
    let window = cfg.backtest.window();
    let mut handle = {
        let cancel = cancel.clone();
        let store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || {
            run_backtests(main_job, jobs, checkpoint, &store, window, &cancel)
        })
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    info!(jobs = cfg.backtest.jobs.len() + 1, "Backtest running. Press Ctrl+C to stop.");

    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = &mut shutdown => {
            warn!("Shutdown signal received, cancelling backtest");
            cancel.cancel();
            handle.await
        }
    };
    let outcome = joined.context("Backtest task failed")??;

    // -- Persist -----------------------------------------------------------

    log_summary(&outcome.main);
    storage::save_report(&outcome.main, cfg.data.report_path.as_deref())?;
    match &outcome.main.checkpoint {
        Some(cp) => storage::save_checkpoint(cp, checkpoint_path)?,
        None => {
            if let Some(path) = checkpoint_path {
                storage::delete_file(path)?;
            }
        }
    }

    for result in &outcome.jobs {
        match result {
            Ok(report) => log_summary(report),
            Err(e) => warn!(error = %e, "Backtest job failed"),
        }
    }

    info!(run_id = %outcome.main.run_id, "DRAWCAST shut down cleanly.");
    Ok(())
}

/// Run the main backtest (resuming from a checkpoint if one exists), then
/// the extra weight sets in parallel if the main run completed.
fn run_backtests(
    mut main: Backtester,
    mut jobs: Vec<Backtester>,
    checkpoint: Option<Checkpoint>,
    store: &MemoryDrawStore,
    window: BacktestWindow,
    cancel: &CancelToken,
) -> Result<BacktestOutcome, BacktestError> {
    let mut log_progress = |p: &Progress| {
        info!(
            label = %p.label,
            completed = p.completed,
            total = p.total,
            last_index = p.last_index,
            hits = p.hits,
            "Backtest progress"
        );
    };

    let resumed = match checkpoint {
        Some(cp) => match main.resume(store, cp, cancel, Some(&mut log_progress)) {
            Err(e) if e.kind == ErrorKind::StateIntegrity => {
                warn!(error = %e, "Checkpoint does not match this run, starting fresh");
                None
            }
            other => Some(other?),
        },
        None => None,
    };
    let main_report = match resumed {
        Some(report) => report,
        None => main.run(store, window, cancel, Some(&mut log_progress))?,
    };

    let job_reports = if main_report.is_complete() && !jobs.is_empty() {
        run_parallel(&mut jobs, store, window, cancel)
    } else {
        Vec::new()
    };

    Ok(BacktestOutcome {
        main: main_report,
        jobs: job_reports,
    })
}

/// Log the top candidates and the column distributions for the next draw.
fn log_predictions(engine: &PredictionEngine, cfg: &AppConfig) -> Result<()> {
    let set = engine.top_predictions(cfg.predict.top_k, &cfg.scoring.weights, &cfg.filters)?;
    if let Some(capacity) = &set.truncation {
        warn!(%capacity, "Prediction candidates truncated");
    }
    for (rank, candidate) in set.candidates.iter().enumerate() {
        info!(
            rank = rank + 1,
            symbols = %candidate.label(),
            composite = format!("{:.2}", candidate.composite),
            skip_pressure = format!("{:.3}", candidate.scores.skip_pressure),
            column_routing = format!("{:.3}", candidate.scores.column_routing),
            "Prediction"
        );
    }

    for position in 0..engine.game().length {
        let column = engine.column_prediction(position)?;
        info!(
            position,
            argmax = column.argmax,
            confidence = format!("{:.3}", column.confidence),
            context_total = column.context_total,
            "Column prediction"
        );
    }

    let partial = engine.partial_prediction(cfg.predict.partial_positions);
    let pattern: String = partial
        .values
        .iter()
        .map(|v| v.map_or('-', |s| char::from_digit(s as u32, 36).unwrap_or('?')))
        .collect();
    info!(pattern = %pattern, positions = ?partial.predicted_positions(), "Partial prediction");
    Ok(())
}

fn log_summary(report: &BacktestReport) {
    let s = &report.summary;
    info!(
        label = %report.label,
        steps = s.total_steps,
        complete = s.complete,
        containment = format!("{:.2}%", s.containment_rate * 100.0),
        straight = format!("{:.2}%", s.straight_rate * 100.0),
        boxed = format!("{:.2}%", s.box_rate * 100.0),
        chance = format!("{:.2}%", s.chance_rate * 100.0),
        mean_rank = ?s.mean_rank,
        truncated = s.truncated_steps,
        diagnosis = ?s.diagnosis,
        "Backtest summary"
    );
    let best = report
        .records
        .iter()
        .filter_map(|r| r.rank_of_actual.map(|rank| (rank, r)))
        .min_by_key(|(rank, _)| *rank);
    if let Some((rank, record)) = best {
        info!(
            label = %report.label,
            rank,
            draw = record.draw_index,
            actual = %format_symbols(&record.actual),
            "Best-ranked actual draw"
        );
    }
}

/// Initialise the `tracing` subscriber.
///
/// Set `DRAWCAST_LOG_JSON=1` for JSON output; `RUST_LOG` overrides the
/// default `drawcast=info` filter.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("drawcast=info"));

    let json_logging = std::env::var("DRAWCAST_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
