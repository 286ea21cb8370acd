//! Backtest summary.
//!
//! Aggregates per-step records into hit rates and rank statistics, and
//! compares the straight hit rate against what an arbitrary top-K pick
//! would achieve on a uniform draw.

use serde::{Deserialize, Serialize};

use super::runner::BacktestRecord;
use crate::types::HitType;

/// Number of rank histogram buckets (deciles of the candidate space).
pub const HISTOGRAM_BUCKETS: u64 = 10;

/// Fewer steps than this yields [`Diagnosis::InsufficientData`].
pub const MIN_STEPS_FOR_DIAGNOSIS: usize = 30;

/// Standard errors the straight rate must sit away from chance.
const DIAGNOSIS_Z: f64 = 2.0;

// ---------------------------------------------------------------------------
// Summary types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    AboveChance,
    AtChance,
    BelowChance,
    InsufficientData,
}

/// Ranks `rank_start..=rank_end` and how many actual draws landed there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankBucket {
    pub rank_start: u64,
    pub rank_end: u64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub total_steps: usize,
    /// Steps with a straight or box hit in the top-K.
    pub hits: usize,
    pub straight_hits: usize,
    pub box_hits: usize,
    /// `hits / total_steps`.
    pub containment_rate: f64,
    pub straight_rate: f64,
    pub box_rate: f64,
    /// Steps where the actual draw appeared anywhere in the ranking.
    pub ranked_steps: usize,
    pub mean_rank: Option<f64>,
    /// Sample variance (n − 1); needs at least two ranked steps.
    pub rank_variance: Option<f64>,
    pub truncated_steps: usize,
    /// False when the run was cancelled or aborted before the window end.
    pub complete: bool,
    /// Straight rate of a random top-K pick.
    pub chance_rate: f64,
    pub diagnosis: Diagnosis,
    pub rank_histogram: Vec<RankBucket>,
}

impl BacktestSummary {
    pub fn from_records(
        records: &[BacktestRecord],
        top_k: usize,
        space_size: u64,
        complete: bool,
    ) -> Self {
        let total_steps = records.len();
        let straight_hits = records.iter().filter(|r| r.hit_type == HitType::Straight).count();
        let box_hits = records.iter().filter(|r| r.hit_type == HitType::Box).count();
        let hits = straight_hits + box_hits;
        let truncated_steps = records.iter().filter(|r| r.truncated).count();

        let ranks: Vec<f64> = records
            .iter()
            .filter_map(|r| r.rank_of_actual)
            .map(|r| r as f64)
            .collect();
        let (mean_rank, rank_variance) = mean_and_variance(&ranks);

        let chance_rate = if space_size == 0 {
            0.0
        } else {
            (top_k as u64).min(space_size) as f64 / space_size as f64
        };
        let straight_rate = rate(straight_hits, total_steps);

        Self {
            total_steps,
            hits,
            straight_hits,
            box_hits,
            containment_rate: rate(hits, total_steps),
            straight_rate,
            box_rate: rate(box_hits, total_steps),
            ranked_steps: ranks.len(),
            mean_rank,
            rank_variance,
            truncated_steps,
            complete,
            chance_rate,
            diagnosis: diagnose(straight_rate, chance_rate, total_steps),
            rank_histogram: rank_histogram(records, space_size),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn mean_and_variance(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (Some(mean), None);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (Some(mean), Some(variance))
}

/// Binomial test with a normal approximation.
fn diagnose(observed: f64, chance: f64, steps: usize) -> Diagnosis {
    if steps < MIN_STEPS_FOR_DIAGNOSIS || chance <= 0.0 || chance >= 1.0 {
        return Diagnosis::InsufficientData;
    }
    let std_err = (chance * (1.0 - chance) / steps as f64).sqrt();
    let z = (observed - chance) / std_err;
    if z > DIAGNOSIS_Z {
        Diagnosis::AboveChance
    } else if z < -DIAGNOSIS_Z {
        Diagnosis::BelowChance
    } else {
        Diagnosis::AtChance
    }
}

fn rank_histogram(records: &[BacktestRecord], space_size: u64) -> Vec<RankBucket> {
    if space_size == 0 {
        return Vec::new();
    }
    let width = space_size.div_ceil(HISTOGRAM_BUCKETS);
    let buckets = space_size.div_ceil(width);
    let mut histogram: Vec<RankBucket> = (0..buckets)
        .map(|i| RankBucket {
            rank_start: i * width + 1,
            rank_end: ((i + 1) * width).min(space_size),
            count: 0,
        })
        .collect();
    for rank in records.iter().filter_map(|r| r.rank_of_actual) {
        let slot = ((rank as u64).saturating_sub(1) / width) as usize;
        if let Some(bucket) = histogram.get_mut(slot) {
            bucket.count += 1;
        }
    }
    histogram
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
