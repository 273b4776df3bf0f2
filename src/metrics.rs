//! Period metrics aggregation
//!
//! Pure computation over a period's sessions and the focus analysis of those
//! sessions. Every ratio has a defined value for empty input.

use crate::config::MetricsConfig;
use crate::error::ComputeError;
use crate::focus::FocusAnalysis;
use crate::types::{
    duration_to_secs, AnalysisPeriod, AppUsage, BehavioralMetrics, ContextCategory,
    MetricsComparison, TimeBucket, WorkSession,
};
use chrono::{FixedOffset, Offset, Timelike, Utc};
use std::collections::{BTreeMap, HashMap};

const SECS_PER_DAY: u32 = 86_400;

/// Aggregates sessions into `BehavioralMetrics`
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    config: MetricsConfig,
    offset: FixedOffset,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self {
            config: MetricsConfig::default(),
            offset: Utc.fix(),
        }
    }
}

impl MetricsAggregator {
    pub fn new(config: MetricsConfig) -> Result<Self, ComputeError> {
        if config.bucket_secs == 0 || SECS_PER_DAY % config.bucket_secs != 0 {
            return Err(ComputeError::ConfigError(format!(
                "metrics.bucket_secs must divide a day, got {}",
                config.bucket_secs
            )));
        }
        let offset = config.offset()?;
        Ok(Self { config, offset })
    }

    /// Compute metrics for one period; the comparison is left empty
    pub fn aggregate(
        &self,
        period: AnalysisPeriod,
        sessions: &[WorkSession],
        focus: &FocusAnalysis,
    ) -> BehavioralMetrics {
        let active_secs: f64 = sessions.iter().map(|s| s.duration_secs).sum();
        let focus_secs = focus.focus_secs();
        let session_count = sessions.len() as u32;
        let switch_count = count_switches(sessions);

        let focus_percentage = if active_secs > 0.0 {
            100.0 * focus_secs / active_secs
        } else {
            0.0
        };
        let switches_per_hour = if active_secs > 0.0 {
            f64::from(switch_count) / (active_secs / 3600.0)
        } else {
            0.0
        };
        let average_session_secs = if session_count > 0 {
            active_secs / f64::from(session_count)
        } else {
            0.0
        };

        BehavioralMetrics {
            period,
            active_secs,
            focus_secs,
            focus_percentage,
            session_count,
            switch_count,
            switches_per_hour,
            average_session_secs,
            average_context_secs: average_context_secs(sessions),
            fragmentation_score: focus.fragmentation_score,
            focus_period_count: focus.focus_periods.len() as u32,
            most_common_switch: focus.most_common_switch.clone(),
            top_apps: top_apps(sessions, active_secs, self.config.top_apps),
            peak_focus_bucket: self.peak_focus_bucket(&focus.focus_sessions),
            comparison: None,
        }
    }

    /// Bucket of the local day holding the most focus time, earliest on ties
    pub fn peak_focus_bucket(&self, focus_sessions: &[WorkSession]) -> Option<TimeBucket> {
        let width = self.config.bucket_secs;
        let count = (SECS_PER_DAY / width) as usize;
        let mut totals = vec![0.0_f64; count];

        for session in focus_sessions {
            let span = duration_to_secs(session.end_time - session.start_time);
            if span <= 0.0 {
                continue;
            }
            // Spread the focused duration evenly over the wall-clock span
            let scale = session.duration_secs / span;

            let local = session.start_time.with_timezone(&self.offset);
            let mut pos = f64::from(local.num_seconds_from_midnight())
                + f64::from(local.nanosecond()) / 1e9;
            let mut remaining = span;
            while remaining > 0.0 {
                let idx = ((pos / f64::from(width)).floor() as usize).min(count - 1);
                let bucket_end = (idx as f64 + 1.0) * f64::from(width);
                let take = remaining.min(bucket_end - pos);
                totals[idx] += take * scale;
                remaining -= take;
                pos = bucket_end;
                if pos >= f64::from(SECS_PER_DAY) {
                    pos -= f64::from(SECS_PER_DAY);
                }
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, total) in totals.into_iter().enumerate() {
            if total > 0.0 && best.map_or(true, |(_, b)| total > b) {
                best = Some((idx, total));
            }
        }

        best.map(|(idx, focus_secs)| TimeBucket {
            index: idx as u32,
            width_secs: width,
            focus_secs,
        })
    }

    pub fn min_confident_active_secs(&self) -> f64 {
        self.config.min_confident_active_secs
    }
}

/// Deltas of `current` against `prior` (current minus prior)
pub fn compare(current: &BehavioralMetrics, prior: &BehavioralMetrics) -> MetricsComparison {
    MetricsComparison {
        prior_period: prior.period,
        active_secs_delta: current.active_secs - prior.active_secs,
        focus_secs_delta: current.focus_secs - prior.focus_secs,
        focus_percentage_delta: current.focus_percentage - prior.focus_percentage,
        switches_per_hour_delta: current.switches_per_hour - prior.switches_per_hour,
        fragmentation_score_delta: current.fragmentation_score - prior.fragmentation_score,
    }
}

/// Adjacent session pairs with differing category
pub fn count_switches(sessions: &[WorkSession]) -> u32 {
    sessions
        .windows(2)
        .filter(|pair| pair[0].category != pair[1].category)
        .count() as u32
}

fn average_context_secs(sessions: &[WorkSession]) -> BTreeMap<ContextCategory, f64> {
    let mut sums: BTreeMap<ContextCategory, (f64, u32)> = BTreeMap::new();
    for session in sessions {
        let entry = sums.entry(session.category).or_insert((0.0, 0));
        entry.0 += session.duration_secs;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(category, (sum, count))| (category, sum / f64::from(count)))
        .collect()
}

fn top_apps(sessions: &[WorkSession], active_secs: f64, limit: usize) -> Vec<AppUsage> {
    let mut by_app: HashMap<&str, AppUsage> = HashMap::new();
    for session in sessions {
        let usage = by_app
            .entry(session.app_id.as_str())
            .or_insert_with(|| AppUsage {
                app_id: session.app_id.clone(),
                category: session.category,
                duration_secs: 0.0,
                session_count: 0,
                share_pct: 0.0,
            });
        usage.duration_secs += session.duration_secs;
        usage.session_count += 1;
    }

    let mut ranked: Vec<AppUsage> = by_app
        .into_values()
        .map(|mut usage| {
            usage.share_pct = if active_secs > 0.0 {
                100.0 * usage.duration_secs / active_secs
            } else {
                0.0
            };
            usage
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.duration_secs
            .total_cmp(&a.duration_secs)
            .then_with(|| a.app_id.cmp(&b.app_id))
    });
    ranked.truncate(limit);
    ranked
}
