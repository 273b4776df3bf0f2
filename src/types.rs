//! Core data types for the behavioral analytics pipeline
//!
//! Observations flow in, and every other type here is derived fresh per run:
//! sessions, context switches, focus periods, metrics, recommendations and the
//! assembled period insight. None of the derived types is mutated after it is
//! built.

use crate::error::ComputeError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of context categories assigned to applications
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextCategory {
    Communication,
    Development,
    Documentation,
    Browsing,
    Design,
    Other,
}

impl ContextCategory {
    /// Every category, in declaration order
    pub const ALL: [ContextCategory; 6] = [
        ContextCategory::Communication,
        ContextCategory::Development,
        ContextCategory::Documentation,
        ContextCategory::Browsing,
        ContextCategory::Design,
        ContextCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextCategory::Communication => "communication",
            ContextCategory::Development => "development",
            ContextCategory::Documentation => "documentation",
            ContextCategory::Browsing => "browsing",
            ContextCategory::Design => "design",
            ContextCategory::Other => "other",
        }
    }
}

impl fmt::Display for ContextCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextCategory {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ContextCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| ComputeError::ConfigError(format!("unknown context category: {s}")))
    }
}

/// A validated activity observation
///
/// `duration_secs` is the wall-clock span from this observation's start to the
/// next observation's start (or an explicit end marker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityObservation {
    /// Application identifier (bundle id, executable name)
    pub app_id: String,
    /// Window label at observation time
    pub window_title: String,
    /// Observation start (UTC)
    pub timestamp: DateTime<Utc>,
    /// Owning process identifier
    pub pid: u32,
    /// Observed duration in seconds (>= 0)
    pub duration_secs: f64,
    /// Whether the user was idle during the observation
    pub is_idle: bool,
}

impl ActivityObservation {
    /// End instant of the observation, saturating at the latest representable time
    pub fn end_time(&self) -> DateTime<Utc> {
        self.timestamp
            .checked_add_signed(secs_to_duration(self.duration_secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// A merged run of observations sharing application, window and category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSession {
    /// Session start time
    pub start_time: DateTime<Utc>,
    /// Session end time (always after start)
    pub end_time: DateTime<Utc>,
    /// Application identifier
    pub app_id: String,
    /// Window label
    pub window_title: String,
    /// Sum of constituent observation durations in seconds
    pub duration_secs: f64,
    /// Number of constituent observations
    pub event_count: u32,
    /// Context category of the application
    pub category: ContextCategory,
}

/// A category change between two temporally adjacent sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSwitch {
    pub from_app: String,
    pub to_app: String,
    pub from_category: ContextCategory,
    pub to_category: ContextCategory,
    /// When the switch happened (start of the destination session)
    pub switched_at: DateTime<Utc>,
    /// Seconds since the previous switch; `None` for the first switch
    pub since_previous_secs: Option<f64>,
}

/// A short different-context session that a focus period absorbed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interruption {
    /// Application that interrupted the focus period
    pub app_id: String,
    pub category: ContextCategory,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

/// A session or bridged session run meeting the sustained-attention predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusPeriod {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Focused seconds (interruptions excluded)
    pub duration_secs: f64,
    /// Application holding most of the focused time
    pub app_id: String,
    pub category: ContextCategory,
    /// Number of same-context sessions bridged into this period
    pub session_count: u32,
    /// Unattributed context switches inside the look-back window
    pub internal_switches: u32,
    #[serde(default)]
    pub interruptions: Vec<Interruption>,
}

/// Most frequent (from, to) category transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchPattern {
    pub from: ContextCategory,
    pub to: ContextCategory,
    pub count: u32,
}

/// Per-application usage inside a period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUsage {
    pub app_id: String,
    pub category: ContextCategory,
    pub duration_secs: f64,
    pub session_count: u32,
    /// Share of the period's active time (0-100)
    pub share_pct: f64,
}

/// Fixed-width time-of-day bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Bucket index from local midnight
    pub index: u32,
    /// Bucket width in seconds
    pub width_secs: u32,
    /// Focus seconds attributed to the bucket
    pub focus_secs: f64,
}

impl TimeBucket {
    /// Seconds from local midnight to the bucket start
    pub fn start_secs_of_day(&self) -> u32 {
        self.index * self.width_secs
    }

    /// Human-readable label such as `09:00-10:00`
    pub fn label(&self) -> String {
        let start = self.start_secs_of_day();
        let end = start + self.width_secs;
        format!(
            "{:02}:{:02}-{:02}:{:02}",
            start / 3600,
            (start % 3600) / 60,
            end / 3600,
            (end % 3600) / 60
        )
    }
}

/// Analysis window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisPeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ComputeError> {
        if end <= start {
            return Err(ComputeError::InvalidPeriod(format!(
                "period end {end} must be after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The local calendar day `date` under `offset`
    pub fn day(date: NaiveDate, offset: FixedOffset) -> Result<Self, ComputeError> {
        Self::local_span(date, offset, 1)
    }

    /// Seven local days starting at `start_date`
    pub fn week(start_date: NaiveDate, offset: FixedOffset) -> Result<Self, ComputeError> {
        Self::local_span(start_date, offset, 7)
    }

    fn local_span(date: NaiveDate, offset: FixedOffset, days: i64) -> Result<Self, ComputeError> {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| ComputeError::InvalidPeriod(format!("invalid date {date}")))?;
        let start = offset
            .from_local_datetime(&midnight)
            .single()
            .ok_or_else(|| ComputeError::InvalidPeriod(format!("ambiguous local midnight {date}")))?
            .with_timezone(&Utc);
        Self::new(start, start + Duration::days(days))
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    pub fn length_secs(&self) -> f64 {
        duration_to_secs(self.length())
    }

    /// The immediately preceding period of equal length
    pub fn preceding(&self) -> Self {
        let length = self.length();
        Self {
            start: self.start - length,
            end: self.start,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

impl fmt::Display for AnalysisPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Deltas against the immediately preceding equal-length period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsComparison {
    pub prior_period: AnalysisPeriod,
    pub active_secs_delta: f64,
    pub focus_secs_delta: f64,
    pub focus_percentage_delta: f64,
    pub switches_per_hour_delta: f64,
    pub fragmentation_score_delta: f64,
}

/// Aggregate behavioral metrics for one analysis period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralMetrics {
    pub period: AnalysisPeriod,
    /// Sum of session durations
    pub active_secs: f64,
    /// Sum of focus period durations
    pub focus_secs: f64,
    /// 100 * focus / active, 0.0 when there is no active time
    pub focus_percentage: f64,
    pub session_count: u32,
    pub switch_count: u32,
    /// Context switches per active hour
    pub switches_per_hour: f64,
    /// Active time / session count (0.0 without sessions)
    pub average_session_secs: f64,
    /// Average session duration per category that occurred
    pub average_context_secs: BTreeMap<ContextCategory, f64>,
    /// Switch density score (0-100)
    pub fragmentation_score: f64,
    pub focus_period_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_common_switch: Option<SwitchPattern>,
    pub top_apps: Vec<AppUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_focus_bucket: Option<TimeBucket>,
    /// Present only when a fully covered prior period exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<MetricsComparison>,
}

/// Recommendation priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Sort rank, lower is more urgent
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// Recommendation category tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    ReduceSwitching,
    IncreaseFocus,
    ReduceFragmentation,
    Maintain,
}

/// A suggestion grounded in one metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub priority: Priority,
    /// Why the recommendation fired
    pub rationale: String,
    /// One concrete action
    pub action: String,
    /// Name of the triggering metric
    pub metric: String,
    /// Value of the triggering metric
    pub metric_value: f64,
}

/// Where the narrative text of an insight came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NarrativeSource {
    Generated { provider: String },
    Template,
}

/// Assembled summary for one analysis period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodInsight {
    pub insight_id: Uuid,
    pub period: AnalysisPeriod,
    pub generated_at: DateTime<Utc>,
    pub metrics: BehavioralMetrics,
    pub recommendations: Vec<Recommendation>,
    pub narrative: String,
    pub narrative_source: NarrativeSource,
    /// Set when the period has too little active time for reliable metrics
    pub low_confidence: bool,
}

/// Convert fractional seconds to a chrono duration (millisecond precision, clamped)
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_milliseconds((secs * 1000.0).round() as i64).unwrap_or(if secs < 0.0 {
        Duration::MIN
    } else {
        Duration::MAX
    })
}

/// Convert a chrono duration to fractional seconds
pub fn duration_to_secs(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

/// Render seconds as `2h 05m`, `14m` or `40s`
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{total}s")
    }
}
