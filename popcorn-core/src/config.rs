use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PopcornConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// External scoring engine invocation.
///
/// The review text is appended after `args` as the final positional argument.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScorerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub timeout_ms: u64,
    /// Divisor applied to the reported score before the [0, 1] range check.
    pub score_scale: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["MLmodel/service.py".to_string()],
            working_dir: None,
            timeout_ms: 10_000,
            score_scale: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertConfig {
    /// "threshold" or "zscore"
    pub detector: String,
    pub spike_threshold: f64,
    pub drop_threshold: f64,
    pub window: usize,
    pub z_threshold: f64,
    pub min_samples: usize,
    pub min_std: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            detector: "threshold".to_string(),
            spike_threshold: 0.25,
            drop_threshold: 0.25,
            window: 10,
            z_threshold: 2.0,
            min_samples: 3,
            min_std: 0.05,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregationConfig {
    pub default_subject: String,
    /// Overall score reported for a subject with no history.
    pub baseline: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            default_subject: "default".to_string(),
            baseline: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5080,
            cors_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl PopcornConfig {
    /// Load from a TOML file, then apply `POPCORN__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("POPCORN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scorer.program.trim().is_empty() {
            return Err(ConfigError::Message("scorer.program must not be empty".into()));
        }
        if self.scorer.timeout_ms == 0 {
            return Err(ConfigError::Message("scorer.timeout_ms must be > 0".into()));
        }
        if !self.scorer.score_scale.is_finite() || self.scorer.score_scale <= 0.0 {
            return Err(ConfigError::Message("scorer.score_scale must be > 0".into()));
        }
        if self.alerts.spike_threshold <= 0.0 || self.alerts.drop_threshold <= 0.0 {
            return Err(ConfigError::Message("alert thresholds must be > 0".into()));
        }
        if self.alerts.window == 0 {
            return Err(ConfigError::Message("alerts.window must be > 0".into()));
        }
        if !self.alerts.z_threshold.is_finite() || self.alerts.z_threshold <= 0.0 {
            return Err(ConfigError::Message("alerts.z_threshold must be > 0".into()));
        }
        if !self.alerts.min_std.is_finite() || self.alerts.min_std <= 0.0 {
            return Err(ConfigError::Message("alerts.min_std must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.aggregation.baseline) {
            return Err(ConfigError::Message(
                "aggregation.baseline must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}
