//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! table rejects unknown keys, so a misspelled weight or option fails at
//! load time instead of silently falling back to a default.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::backtest::{BacktestConfig, BacktestWindow};
use crate::engine::pipeline::PipelineSettings;
use crate::features::ClassScheme;
use crate::generator::{CandidateFilters, GeneratorConfig};
use crate::scoring::{ScorerConfig, ScoringWeights};
use crate::tracking::TrackingConfig;
use crate::types::GameSpec;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub game: GameConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub filters: CandidateFilters,
    #[serde(default)]
    pub predict: PredictConfig,
    #[serde(default)]
    pub backtest: BacktestSection,
    pub data: DataConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GameConfig {
    pub name: String,
    pub length: usize,
    pub alphabet_size: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_schemes")]
    pub type_schemes: Vec<ClassScheme>,
    #[serde(default = "default_band_width")]
    pub sum_band_width: u16,
    #[serde(default = "default_prior_strength")]
    pub sum_prior_strength: f64,
}

fn default_schemes() -> Vec<ClassScheme> {
    ScorerConfig::default().type_schemes
}

fn default_band_width() -> u16 {
    ScorerConfig::default().sum_band_width
}

fn default_prior_strength() -> f64 {
    ScorerConfig::default().sum_prior_strength
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let scorer = ScorerConfig::default();
        Self {
            weights: ScoringWeights::default(),
            type_schemes: scorer.type_schemes,
            sum_band_width: scorer.sum_band_width,
            sum_prior_strength: scorer.sum_prior_strength,
        }
    }
}

impl ScoringConfig {
    pub fn scorer(&self) -> ScorerConfig {
        ScorerConfig {
            type_schemes: self.type_schemes.clone(),
            sum_band_width: self.sum_band_width,
            sum_prior_strength: self.sum_prior_strength,
        }
    }
}

/// What the binary prints for the next draw.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PredictConfig {
    #[serde(default = "default_predict_top_k")]
    pub top_k: usize,
    /// Positions committed to in the partial prediction.
    #[serde(default = "default_partial_positions")]
    pub partial_positions: usize,
}

fn default_predict_top_k() -> usize {
    10
}

fn default_partial_positions() -> usize {
    2
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            top_k: default_predict_top_k(),
            partial_positions: default_partial_positions(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BacktestSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    /// First store position evaluated; earlier draws are warm-up.
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: Option<usize>,
    /// Extra weight sets replayed in parallel alongside the main one.
    #[serde(default)]
    pub jobs: Vec<BacktestJob>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BacktestJob {
    pub label: String,
    pub weights: ScoringWeights,
}

fn default_enabled() -> bool {
    true
}

fn default_top_k() -> usize {
    BacktestConfig::default().top_k
}

fn default_progress_every() -> usize {
    BacktestConfig::default().progress_every
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            top_k: default_top_k(),
            progress_every: default_progress_every(),
            start: 0,
            end: None,
            jobs: Vec::new(),
        }
    }
}

impl BacktestSection {
    pub fn config(&self) -> BacktestConfig {
        BacktestConfig {
            top_k: self.top_k,
            progress_every: self.progress_every,
        }
    }

    pub fn window(&self) -> BacktestWindow {
        BacktestWindow::new(self.start, self.end)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// JSON array of draws.
    pub draws_path: String,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default)]
    pub checkpoint_path: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn game(&self) -> Result<GameSpec> {
        GameSpec::new(&self.game.name, self.game.length, self.game.alphabet_size)
            .context("Invalid [game] section")
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings> {
        Ok(PipelineSettings {
            game: self.game()?,
            tracking: self.tracking.clone(),
            scorer: self.scoring.scorer(),
            generator: self.generator.clone(),
        })
    }

    /// Check every section by building the domain types from it.
    pub fn validate(&self) -> Result<()> {
        let settings = self.pipeline_settings()?;
        crate::engine::pipeline::Pipeline::new(settings.clone())
            .context("Invalid pipeline settings")?;
        self.scoring.weights.validate().context("Invalid [scoring.weights]")?;
        self.filters.validate(&settings.game).context("Invalid [filters]")?;
        self.backtest.config().validate().context("Invalid [backtest]")?;
        for job in &self.backtest.jobs {
            job.weights
                .validate()
                .with_context(|| format!("Invalid weights for backtest job {}", job.label))?;
        }
        if self.predict.top_k == 0 {
            anyhow::bail!("[predict] top_k must be at least 1");
        }
        Ok(())
    }
}
