//! Configuration loading and management
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/workpulse/config.toml`
//! (`~/.config/workpulse/config.toml`). Every section and every field has a
//! default, so an empty or missing file yields the stock pipeline thresholds.

use crate::error::ComputeError;
use crate::types::ContextCategory;
use chrono::FixedOffset;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SECONDS_PER_DAY: u32 = 86_400;

/// Main configuration struct
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub normalizer: NormalizerConfig,

    #[serde(default)]
    pub sessionizer: SessionizerConfig,

    #[serde(default)]
    pub focus: FocusConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Application id -> category name overrides
    #[serde(default)]
    pub categories: BTreeMap<String, String>,

    #[serde(default)]
    pub narrative: NarrativeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event normalizer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizerConfig {
    /// Application ids removed before any processing (case-insensitive)
    #[serde(default)]
    pub excluded_apps: Vec<String>,

    /// Regular expressions matched against window labels
    #[serde(default)]
    pub excluded_window_patterns: Vec<String>,

    /// Idle observations shorter than this fold into the preceding active one
    #[serde(default = "default_min_idle_secs")]
    pub min_idle_secs: f64,

    /// Malformed fraction above which the caller is alerted
    #[serde(default = "default_drop_alert_ratio")]
    pub drop_alert_ratio: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            excluded_apps: Vec::new(),
            excluded_window_patterns: Vec::new(),
            min_idle_secs: default_min_idle_secs(),
            drop_alert_ratio: default_drop_alert_ratio(),
        }
    }
}

fn default_min_idle_secs() -> f64 {
    30.0
}

fn default_drop_alert_ratio() -> f64 {
    0.10
}

/// Sessionizer thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionizerConfig {
    /// Idle observations longer than this close the current session
    pub idle_threshold_secs: f64,
    /// Observations shorter than this are discarded as noise
    pub noise_threshold_secs: f64,
    /// Maximum gap for extending the current session
    pub merge_threshold_secs: f64,
    /// Bucket width used by the fallback grouping
    pub fallback_bucket_secs: u32,
}

impl Default for SessionizerConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 300.0,
            noise_threshold_secs: 10.0,
            merge_threshold_secs: 30.0,
            fallback_bucket_secs: 3600,
        }
    }
}

/// Focus & switch analysis configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Minimum focused seconds for a focus period (25 minutes)
    pub min_focus_secs: f64,
    /// A focus period must contain fewer unattributed switches than this
    pub max_internal_switches: u32,
    /// Seconds before a run's start whose switches also count against it
    pub lookback_secs: f64,
    /// Different-context sessions shorter than this count as interruptions
    pub interruption_ceiling_secs: f64,
    /// Longest gap between the end of a focus session and its resumption
    pub resume_window_secs: f64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            min_focus_secs: 1500.0,
            max_internal_switches: 2,
            lookback_secs: 0.0,
            interruption_ceiling_secs: 180.0,
            resume_window_secs: 600.0,
        }
    }
}

/// Metrics aggregation configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Width of the time-of-day buckets for peak detection
    pub bucket_secs: u32,
    /// Local offset used to place buckets on the user's day
    pub utc_offset_minutes: i32,
    /// Number of applications in the usage ranking
    pub top_apps: usize,
    /// Active time below which a summary is flagged low-confidence
    pub min_confident_active_secs: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bucket_secs: 3600,
            utc_offset_minutes: 0,
            top_apps: 5,
            min_confident_active_secs: 3600.0,
        }
    }
}

impl MetricsConfig {
    /// Local offset as a chrono `FixedOffset`
    pub fn offset(&self) -> Result<FixedOffset, ComputeError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ComputeError::ConfigError(format!(
                "metrics.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

/// Text-generation collaborator selection
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeProvider {
    #[default]
    Template,
    Remote,
}

/// Narrative generation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NarrativeConfig {
    #[serde(default)]
    pub provider: NarrativeProvider,

    /// Completion endpoint (required for `remote`)
    pub endpoint: Option<String>,

    #[serde(default = "default_narrative_model")]
    pub model: String,

    /// API key (sent as a bearer token)
    pub api_key: Option<String>,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_narrative_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_narrative_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Responses longer than this are rejected
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            provider: NarrativeProvider::default(),
            endpoint: None,
            model: default_narrative_model(),
            api_key: None,
            timeout_ms: default_narrative_timeout_ms(),
            max_retries: default_narrative_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_chars: default_max_chars(),
        }
    }
}

impl NarrativeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_narrative_model() -> String {
    "default".to_string()
}

fn default_narrative_timeout_ms() -> u64 {
    10_000
}

fn default_narrative_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_max_chars() -> usize {
    2_000
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PulseConfig {
    /// Load configuration from the default path, falling back to defaults
    pub fn load() -> Result<Self, ComputeError> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(PulseConfig::default());
        }

        Self::load_from(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ComputeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ComputeError::ConfigError(format!("failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ComputeError> {
        let config: PulseConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/workpulse/config.toml` (~/.config/workpulse/config.toml)
    pub fn config_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(dirs::config_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("workpulse")
            .join("config.toml")
    }

    /// Check thresholds, patterns and category names
    pub fn validate(&self) -> Result<(), ComputeError> {
        let s = &self.sessionizer;
        for (name, value) in [
            ("sessionizer.idle_threshold_secs", s.idle_threshold_secs),
            ("sessionizer.noise_threshold_secs", s.noise_threshold_secs),
            ("sessionizer.merge_threshold_secs", s.merge_threshold_secs),
            ("focus.min_focus_secs", self.focus.min_focus_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ComputeError::ConfigError(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        for (name, value) in [
            ("normalizer.min_idle_secs", self.normalizer.min_idle_secs),
            ("focus.lookback_secs", self.focus.lookback_secs),
            ("focus.interruption_ceiling_secs", self.focus.interruption_ceiling_secs),
            ("focus.resume_window_secs", self.focus.resume_window_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ComputeError::ConfigError(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.normalizer.drop_alert_ratio) {
            return Err(ComputeError::ConfigError(
                "normalizer.drop_alert_ratio must be between 0 and 1".to_string(),
            ));
        }

        for (name, width) in [
            ("metrics.bucket_secs", self.metrics.bucket_secs),
            ("sessionizer.fallback_bucket_secs", s.fallback_bucket_secs),
        ] {
            if width == 0 || SECONDS_PER_DAY % width != 0 {
                return Err(ComputeError::ConfigError(format!(
                    "{name} must evenly divide a day, got {width}"
                )));
            }
        }

        self.metrics.offset()?;

        for pattern in &self.normalizer.excluded_window_patterns {
            Regex::new(pattern).map_err(|e| {
                ComputeError::ConfigError(format!("invalid window pattern {pattern:?}: {e}"))
            })?;
        }

        for (app, category) in &self.categories {
            category.parse::<ContextCategory>().map_err(|_| {
                ComputeError::ConfigError(format!(
                    "unknown category {category:?} for application {app:?}"
                ))
            })?;
        }

        if self.narrative.provider == NarrativeProvider::Remote && self.narrative.endpoint.is_none()
        {
            return Err(ComputeError::ConfigError(
                "narrative.endpoint is required when provider is remote".to_string(),
            ));
        }

        Ok(())
    }
}
