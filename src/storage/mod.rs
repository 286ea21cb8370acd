//! Persistence layer.
//!
//! Draw history is read from a JSON array of draws. Backtest reports and
//! cancelled-run checkpoints are written as pretty JSON so a later run
//! can resume or compare against them.

pub mod memory;

pub use memory::{DrawIter, DrawStore, MemoryDrawStore};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::backtest::{BacktestReport, Checkpoint};
use crate::types::{Draw, GameSpec};

/// Default report file path.
const DEFAULT_REPORT_FILE: &str = "drawcast_report.json";

/// Default checkpoint file path.
const DEFAULT_CHECKPOINT_FILE: &str = "drawcast_checkpoint.json";

// ---------------------------------------------------------------------------
// Draw history
// ---------------------------------------------------------------------------

/// Load draw history, validating every draw against `game`.
pub fn load_draws(path: &str, game: &GameSpec) -> Result<MemoryDrawStore> {
    let json = std::fs::read_to_string(path).context(format!("Failed to read draws from {path}"))?;
    let draws: Vec<Draw> =
        serde_json::from_str(&json).context(format!("Failed to parse draws from {path}"))?;

    let store = MemoryDrawStore::from_draws(Some(game.clone()), draws)
        .context(format!("Invalid draw history in {path}"))?;

    info!(
        path,
        draws = store.len(),
        first = ?store.draws().first().map(|d| d.index),
        last = ?store.draws().last().map(|d| d.index),
        "Draw history loaded"
    );
    Ok(store)
}

/// Save draw history as a JSON array.
pub fn save_draws(store: &MemoryDrawStore, path: &str) -> Result<()> {
    write_json(store.draws(), path, "draws")?;
    debug!(path, draws = store.len(), "Draw history saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Reports and checkpoints
// ---------------------------------------------------------------------------

/// Save a backtest report.
pub fn save_report(report: &BacktestReport, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_REPORT_FILE);
    write_json(report, path, "backtest report")?;
    info!(
        path,
        run_id = %report.run_id,
        steps = report.summary.total_steps,
        complete = report.summary.complete,
        "Backtest report saved"
    );
    Ok(())
}

/// Load a backtest report. Returns None if the file doesn't exist.
pub fn load_report(path: Option<&str>) -> Result<Option<BacktestReport>> {
    let path = path.unwrap_or(DEFAULT_REPORT_FILE);
    let report: Option<BacktestReport> = read_json(path, "backtest report")?;
    if let Some(report) = &report {
        debug!(path, run_id = %report.run_id, "Backtest report loaded");
    }
    Ok(report)
}

/// Save the checkpoint of a cancelled backtest.
pub fn save_checkpoint(checkpoint: &Checkpoint, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_CHECKPOINT_FILE);
    write_json(checkpoint, path, "checkpoint")?;
    info!(
        path,
        next_position = checkpoint.next_position,
        records = checkpoint.records.len(),
        "Checkpoint saved"
    );
    Ok(())
}

/// Load a checkpoint. Returns None if there is nothing to resume.
pub fn load_checkpoint(path: Option<&str>) -> Result<Option<Checkpoint>> {
    let path = path.unwrap_or(DEFAULT_CHECKPOINT_FILE);
    let checkpoint: Option<Checkpoint> = read_json(path, "checkpoint")?;
    match &checkpoint {
        Some(cp) => info!(path, next_position = cp.next_position, "Checkpoint found, resuming"),
        None => info!(path, "No checkpoint found, starting fresh"),
    }
    Ok(checkpoint)
}

/// Delete a file if it exists.
pub fn delete_file(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete {path}"))?;
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(value: &T, path: &str, what: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context(format!("Failed to serialise {what}"))?;
    std::fs::write(path, &json).context(format!("Failed to write {what} to {path}"))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &str, what: &str) -> Result<Option<T>> {
    if !Path::new(path).exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path).context(format!("Failed to read {what} from {path}"))?;
    let value = serde_json::from_str(&json).context(format!("Failed to parse {what} from {path}"))?;
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
