//! Observation normalization
//!
//! Cleans a raw observation batch before sessionization: privacy exclusions,
//! malformed-record accounting, chronological ordering and short-idle folding.
//! Nothing removed here is forwarded to later stages or persisted.

use crate::config::NormalizerConfig;
use crate::error::ComputeError;
use crate::schema::RawObservation;
use crate::types::ActivityObservation;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Counters describing what the normalizer did to a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    /// Records in the input batch
    pub total: usize,
    /// Observations forwarded to the sessionizer
    pub kept: usize,
    /// Records removed by privacy exclusions
    pub excluded: usize,
    /// Records dropped for missing or invalid fields
    pub malformed: usize,
    /// Short idle observations folded into the preceding active one
    pub collapsed_idle: usize,
    /// malformed / total (0 for an empty batch)
    pub drop_rate: f64,
    /// Set when the drop rate exceeds the configured ratio
    pub drop_alert: bool,
}

/// Normalized observations plus the report for the caller
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub observations: Vec<ActivityObservation>,
    pub report: NormalizationReport,
}

/// Normalizer for raw observation batches
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    excluded_apps: HashSet<String>,
    excluded_windows: Vec<Regex>,
    min_idle_secs: f64,
    drop_alert_ratio: f64,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self {
            excluded_apps: HashSet::new(),
            excluded_windows: Vec::new(),
            min_idle_secs: NormalizerConfig::default().min_idle_secs,
            drop_alert_ratio: NormalizerConfig::default().drop_alert_ratio,
        }
    }
}

impl EventNormalizer {
    /// Build a normalizer from configuration, compiling the window patterns
    pub fn from_config(config: &NormalizerConfig) -> Result<Self, ComputeError> {
        let excluded_windows = config
            .excluded_window_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ComputeError::ConfigError(format!("invalid window pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            excluded_apps: config
                .excluded_apps
                .iter()
                .map(|a| a.trim().to_lowercase())
                .collect(),
            excluded_windows,
            min_idle_secs: config.min_idle_secs,
            drop_alert_ratio: config.drop_alert_ratio,
        })
    }

    /// Normalize a raw batch into ordered, validated observations
    pub fn normalize(&self, raw: &[RawObservation]) -> NormalizedBatch {
        let mut report = NormalizationReport {
            total: raw.len(),
            ..Default::default()
        };

        let mut valid = Vec::with_capacity(raw.len());
        for record in raw {
            // Exclusions are checked first so an excluded record is never
            // counted or reported as anything else
            if self.is_excluded(record) {
                report.excluded += 1;
                continue;
            }
            match record.to_observation() {
                Ok(observation) => valid.push(observation),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed observation");
                    report.malformed += 1;
                }
            }
        }

        // Stable sort keeps capture order for identical timestamps
        valid.sort_by_key(|o| o.timestamp);

        let mut observations: Vec<ActivityObservation> = Vec::with_capacity(valid.len());
        for observation in valid {
            if observation.is_idle && observation.duration_secs < self.min_idle_secs {
                if let Some(previous) = observations.last_mut().filter(|p| !p.is_idle) {
                    previous.duration_secs += observation.duration_secs;
                    report.collapsed_idle += 1;
                    continue;
                }
            }
            observations.push(observation);
        }

        report.kept = observations.len();
        report.drop_rate = if report.total > 0 {
            report.malformed as f64 / report.total as f64
        } else {
            0.0
        };
        report.drop_alert = report.drop_rate > self.drop_alert_ratio;

        if report.drop_alert {
            tracing::warn!(
                total = report.total,
                malformed = report.malformed,
                drop_rate = report.drop_rate,
                "Malformed observation rate exceeds alert threshold"
            );
        }

        NormalizedBatch {
            observations,
            report,
        }
    }

    fn is_excluded(&self, record: &RawObservation) -> bool {
        let app_excluded = record
            .app_id
            .as_deref()
            .map(|app| self.excluded_apps.contains(&app.trim().to_lowercase()))
            .unwrap_or(false);
        let window_excluded = record
            .window_title
            .as_deref()
            .map(|title| self.excluded_windows.iter().any(|re| re.is_match(title)))
            .unwrap_or(false);
        app_excluded || window_excluded
    }
}
