//! DRAWCAST — causal skip/transition scoring and backtesting for digit lotteries
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod features;
pub mod tracking;
pub mod scoring;
pub mod generator;
pub mod engine;
pub mod backtest;
pub mod storage;
