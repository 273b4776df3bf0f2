//! activity.raw_observation.v1 schema definition
//!
//! Every value field is optional on the wire. A record with a missing or
//! out-of-range field still deserializes; the normalizer then counts it as
//! malformed instead of failing the whole batch.

use crate::types::{secs_to_duration, ActivityObservation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "activity.raw_observation.v1";

/// Application id used by capture for system-wide idle observations
pub const IDLE_APP_ID: &str = "system.idle";

/// Longest single observation accepted (one week)
pub const MAX_DURATION_SECS: f64 = 7.0 * 86_400.0;

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// One raw activity observation as delivered by the capture service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    /// Schema version identifier
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Unique observation identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<String>,
    /// Application identifier
    #[serde(default)]
    pub app_id: Option<String>,
    /// Window label
    #[serde(default)]
    pub window_title: Option<String>,
    /// Observation start (UTC)
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Process identifier
    #[serde(default)]
    pub pid: Option<u32>,
    /// Observed duration in seconds
    #[serde(default)]
    pub duration_secs: Option<f64>,
    /// Idle flag (absent means active)
    #[serde(default)]
    pub is_idle: Option<bool>,
}

impl RawObservation {
    /// Create an active observation
    pub fn active(
        app_id: impl Into<String>,
        window_title: impl Into<String>,
        timestamp: DateTime<Utc>,
        duration_secs: f64,
    ) -> Self {
        RawObservation {
            schema_version: SCHEMA_VERSION.to_string(),
            observation_id: Some(uuid::Uuid::new_v4().to_string()),
            app_id: Some(app_id.into()),
            window_title: Some(window_title.into()),
            timestamp: Some(timestamp),
            pid: None,
            duration_secs: Some(duration_secs),
            is_idle: Some(false),
        }
    }

    /// Create a system idle observation
    pub fn idle(timestamp: DateTime<Utc>, duration_secs: f64) -> Self {
        RawObservation {
            is_idle: Some(true),
            ..Self::active(IDLE_APP_ID, "", timestamp, duration_secs)
        }
    }

    /// Attach the owning process id
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Validate the record and convert it to a typed observation
    pub fn to_observation(&self) -> Result<ActivityObservation, ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        let app_id = self
            .app_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingField("app_id"))?;
        let timestamp = self.timestamp.ok_or(ValidationError::MissingField("timestamp"))?;
        let duration_secs = self
            .duration_secs
            .ok_or(ValidationError::MissingField("duration_secs"))?;

        if !duration_secs.is_finite() {
            return Err(ValidationError::NonFiniteDuration);
        }
        if duration_secs < 0.0 {
            return Err(ValidationError::NegativeDuration(duration_secs));
        }
        if duration_secs > MAX_DURATION_SECS
            || timestamp
                .checked_add_signed(secs_to_duration(duration_secs))
                .is_none()
        {
            return Err(ValidationError::DurationOutOfRange(duration_secs));
        }

        Ok(ActivityObservation {
            app_id: app_id.to_string(),
            window_title: self.window_title.clone().unwrap_or_default(),
            timestamp,
            pid: self.pid.unwrap_or(0),
            duration_secs,
            is_idle: self.is_idle.unwrap_or(false),
        })
    }

    /// Validate the record schema
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.to_observation().map(|_| ())
    }
}

/// Validation errors for raw observations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Negative duration: {0}")]
    NegativeDuration(f64),

    #[error("Duration is not a finite number")]
    NonFiniteDuration,

    #[error("Duration out of range: {0}")]
    DurationOutOfRange(f64),
}
