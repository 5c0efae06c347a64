//! Handles settings for the application. Configuration is read from an
//! optional `settings.toml` and `CUBICA__*` environment variables, e.g.
//! `CUBICA__ENGINE__TIMEOUT_MS=500`.
//!
//! See `settings.toml` for the configuration.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_SETTINGS_PATH: &str = "settings";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_formula_length: usize,
    pub max_depth: usize,
    /// `declared` or `dependency`.
    pub evaluation_order: String,
    /// Wall-clock budget for one run; `0` disables it.
    pub timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let limits = engine::FormulaLimits::default();
        Self {
            max_formula_length: limits.max_length,
            max_depth: limits.max_depth,
            evaluation_order: engine::EvaluationOrder::default().to_string(),
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub engine: EngineSettings,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(
                File::with_name(path.unwrap_or(DEFAULT_SETTINGS_PATH)).required(path.is_some()),
            )
            .add_source(Environment::with_prefix("CUBICA").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Builds the engine these settings describe.
    pub fn engine(&self) -> Result<engine::Engine, ConfigError> {
        let order = self
            .engine
            .evaluation_order
            .parse::<engine::EvaluationOrder>()
            .map_err(ConfigError::Message)?;
        Ok(engine::Engine::builder()
            .max_formula_length(self.engine.max_formula_length)
            .max_depth(self.engine.max_depth)
            .evaluation_order(order)
            .build())
    }

    pub fn budget(&self) -> Option<std::time::Duration> {
        (self.engine.timeout_ms > 0)
            .then(|| std::time::Duration::from_millis(self.engine.timeout_ms))
    }
}
