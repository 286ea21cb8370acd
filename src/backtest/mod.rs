//! Backtesting: causal replay of history and summary statistics.

pub mod runner;
pub mod summary;

pub use runner::{
    run_parallel, BacktestConfig, BacktestError, BacktestRecord, BacktestReport, BacktestWindow,
    Backtester, CancelToken, Checkpoint, Progress, ReplayState,
};
pub use summary::{BacktestSummary, Diagnosis, RankBucket};
