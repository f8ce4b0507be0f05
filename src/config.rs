//! Engine configuration loaded from TOML, with environment overrides.
//!
//! `DRILL_CONFIG_PATH` names an optional TOML file. Every field has a default, so
//! an empty file (or no file at all) yields a working local setup. After the file,
//! these variables override single fields:
//!   DRILL_API_BASE_URL  : word service base URL
//!   DRILL_API_TOKEN     : bearer token forwarded to the word service
//!   DRILL_SCORING_MODE  : "client" or "server"

use serde::Deserialize;
use tracing::{error, info};

use crate::error::DrillError;

/// Who decides the running score after each verdict.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
  /// Recompute locally with the level's rule; `total_score` is ignored.
  Client,
  /// Adopt `total_score` from the verdict verbatim.
  Server,
}

impl std::str::FromStr for ScoringMode {
  type Err = DrillError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "client" => Ok(ScoringMode::Client),
      "server" => Ok(ScoringMode::Server),
      other => Err(DrillError::Config(format!("unknown scoring mode '{other}'"))),
    }
  }
}

/// How the next word is drawn from the loaded words.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
  Sequential,
  Random,
}

/// Where the level catalog comes from.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
  Remote,
  Builtin,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub api_base_url: String,
  pub api_token: Option<String>,
  pub request_timeout_secs: u64,
  pub scoring_mode: ScoringMode,
  pub batch_size: usize,
  pub low_water_mark: usize,
  pub tick_interval_ms: u64,
  pub word_language: String,
  pub answer_language: String,
  pub selection: Selection,
  /// Seed for random selection; unset means seeded from entropy per session.
  pub selection_seed: Option<u64>,
  pub max_fetch_failures: u32,
  pub level_source: LevelSource,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      api_base_url: "http://localhost:8180/api/v1".into(),
      api_token: None,
      request_timeout_secs: 10,
      scoring_mode: ScoringMode::Client,
      batch_size: 20,
      low_water_mark: 5,
      tick_interval_ms: 100,
      word_language: "en".into(),
      answer_language: "vi".into(),
      selection: Selection::Sequential,
      selection_seed: None,
      max_fetch_failures: 3,
      level_source: LevelSource::Remote,
    }
  }
}

impl EngineConfig {
  pub fn from_toml_str(s: &str) -> Result<Self, DrillError> {
    let cfg: EngineConfig = toml::from_str(s).map_err(|e| DrillError::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn validate(&self) -> Result<(), DrillError> {
    if self.batch_size == 0 {
      return Err(DrillError::Config("batch_size must be positive".into()));
    }
    if self.low_water_mark >= self.batch_size {
      return Err(DrillError::Config(format!(
        "low_water_mark ({}) must be below batch_size ({})",
        self.low_water_mark, self.batch_size
      )));
    }
    if self.tick_interval_ms == 0 {
      return Err(DrillError::Config("tick_interval_ms must be positive".into()));
    }
    if self.api_base_url.trim().is_empty() {
      return Err(DrillError::Config("api_base_url is empty".into()));
    }
    Ok(())
  }

  fn apply_env(&mut self) -> Result<(), DrillError> {
    if let Ok(url) = std::env::var("DRILL_API_BASE_URL") {
      self.api_base_url = url;
    }
    if let Ok(token) = std::env::var("DRILL_API_TOKEN") {
      self.api_token = Some(token).filter(|t| !t.is_empty());
    }
    if let Ok(mode) = std::env::var("DRILL_SCORING_MODE") {
      self.scoring_mode = mode.parse()?;
    }
    Ok(())
  }
}

/// Load the config named by DRILL_CONFIG_PATH (if any) and apply env overrides.
pub fn load_engine_config_from_env() -> Result<EngineConfig, DrillError> {
  let mut cfg = match std::env::var("DRILL_CONFIG_PATH") {
    Ok(path) => {
      let raw = std::fs::read_to_string(&path).map_err(|e| {
        error!(target: "drill_backend", %path, error = %e, "Failed to read TOML config file");
        DrillError::Config(format!("{path}: {e}"))
      })?;
      let cfg = EngineConfig::from_toml_str(&raw).map_err(|e| {
        error!(target: "drill_backend", %path, error = %e, "Failed to parse TOML config");
        e
      })?;
      info!(target: "drill_backend", %path, "Loaded engine config (TOML)");
      cfg
    }
    Err(_) => EngineConfig::default(),
  };
  cfg.apply_env()?;
  cfg.validate()?;
  Ok(cfg)
}
