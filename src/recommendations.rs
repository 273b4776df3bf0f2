//! Recommendation engine
//!
//! Maps metrics to at most three prioritized suggestions. Every rule is
//! evaluated; each emitted recommendation quotes the metric value that
//! triggered it.

use crate::types::{BehavioralMetrics, Priority, Recommendation, RecommendationCategory};

/// Maximum recommendations per period
pub const MAX_RECOMMENDATIONS: usize = 3;

const HIGH_SWITCH_RATE: f64 = 20.0;
const LOW_FOCUS_PCT: f64 = 30.0;
const HIGH_FRAGMENTATION: f64 = 70.0;
const GOOD_FOCUS_PCT: f64 = 50.0;

/// Recommendation engine
pub struct RecommendationEngine;

impl RecommendationEngine {
    /// Derive recommendations from period metrics
    pub fn recommend(metrics: &BehavioralMetrics) -> Vec<Recommendation> {
        let mut fired = Vec::new();

        // Rule 1: switching rate
        if metrics.switches_per_hour > HIGH_SWITCH_RATE {
            let value = format!("{:.1}", metrics.switches_per_hour);
            fired.push(Recommendation {
                category: RecommendationCategory::ReduceSwitching,
                priority: Priority::High,
                rationale: format!(
                    "You switched context {value} times per active hour, above the {HIGH_SWITCH_RATE:.0}/hour comfort level."
                ),
                action: format!(
                    "Batch messages and email into two or three fixed slots to bring {value} switches/hour down."
                ),
                metric: "switches_per_hour".to_string(),
                metric_value: metrics.switches_per_hour,
            });
        }

        // Rule 2: focus share
        if metrics.focus_percentage < LOW_FOCUS_PCT {
            let value = format!("{:.1}", metrics.focus_percentage);
            let action = match &metrics.peak_focus_bucket {
                Some(bucket) => format!(
                    "Block {} for one task; it was your strongest focus window while focus was only {value}% of active time.",
                    bucket.label()
                ),
                None => format!(
                    "Reserve one uninterrupted 25-minute block for a single task; focus was only {value}% of active time."
                ),
            };
            fired.push(Recommendation {
                category: RecommendationCategory::IncreaseFocus,
                priority: Priority::High,
                rationale: format!("Only {value}% of active time was spent in focus periods."),
                action,
                metric: "focus_percentage".to_string(),
                metric_value: metrics.focus_percentage,
            });
        }

        // Rule 3: fragmentation
        if metrics.fragmentation_score > HIGH_FRAGMENTATION {
            let value = format!("{:.1}", metrics.fragmentation_score);
            fired.push(Recommendation {
                category: RecommendationCategory::ReduceFragmentation,
                priority: Priority::Medium,
                rationale: format!("Your fragmentation score was {value} out of 100."),
                action: format!(
                    "Group similar tasks back to back to lower the fragmentation score of {value}."
                ),
                metric: "fragmentation_score".to_string(),
                metric_value: metrics.fragmentation_score,
            });
        }

        // Rule 4: positive reinforcement
        if metrics.focus_percentage > GOOD_FOCUS_PCT {
            let value = format!("{:.1}", metrics.focus_percentage);
            fired.push(Recommendation {
                category: RecommendationCategory::Maintain,
                priority: Priority::Low,
                rationale: format!("{value}% of active time was spent in focus periods."),
                action: format!("Keep your current routine; {value}% focus is a strong result."),
                metric: "focus_percentage".to_string(),
                metric_value: metrics.focus_percentage,
            });
        }

        // Stable sort keeps rule order among equal priorities
        fired.sort_by_key(|r| r.priority.rank());
        fired.truncate(MAX_RECOMMENDATIONS);
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisPeriod, TimeBucket};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn make_test_metrics(switches_per_hour: f64, focus_pct: f64, fragmentation: f64) -> BehavioralMetrics {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        BehavioralMetrics {
            period: AnalysisPeriod::new(start, start + Duration::days(1)).unwrap(),
            active_secs: 14_400.0,
            focus_secs: 144.0 * focus_pct,
            focus_percentage: focus_pct,
            session_count: 40,
            switch_count: (switches_per_hour * 4.0) as u32,
            switches_per_hour,
            average_session_secs: 360.0,
            average_context_secs: BTreeMap::new(),
            fragmentation_score: fragmentation,
            focus_period_count: 1,
            most_common_switch: None,
            top_apps: Vec::new(),
            peak_focus_bucket: None,
            comparison: None,
        }
    }

    fn categories(recs: &[Recommendation]) -> Vec<RecommendationCategory> {
        recs.iter().map(|r| r.category).collect()
    }

    #[test]
    fn test_single_high_switching() {
        let recs = RecommendationEngine::recommend(&make_test_metrics(25.0, 45.0, 40.0));

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].category, RecommendationCategory::ReduceSwitching);
        assert_eq!(recs[0].priority, Priority::High);
        assert!(recs[0].action.contains("25.0"));
    }

    #[test]
    fn test_three_in_priority_order() {
        let recs = RecommendationEngine::recommend(&make_test_metrics(25.0, 20.0, 80.0));

        assert_eq!(
            categories(&recs),
            vec![
                RecommendationCategory::ReduceSwitching,
                RecommendationCategory::IncreaseFocus,
                RecommendationCategory::ReduceFragmentation,
            ]
        );
    }

    #[test]
    fn test_low_priority_kept_when_room() {
        // Rules 1, 3 and 4 fire; maintain sorts last
        let recs = RecommendationEngine::recommend(&make_test_metrics(30.0, 60.0, 90.0));
        assert_eq!(
            categories(&recs),
            vec![
                RecommendationCategory::ReduceSwitching,
                RecommendationCategory::ReduceFragmentation,
                RecommendationCategory::Maintain,
            ]
        );
    }

    #[test]
    fn test_healthy_period() {
        let recs = RecommendationEngine::recommend(&make_test_metrics(4.0, 65.0, 10.0));
        assert_eq!(categories(&recs), vec![RecommendationCategory::Maintain]);
        assert!(recs[0].action.contains("65.0"));
    }

    #[test]
    fn test_no_recommendations_in_middle_band() {
        assert!(RecommendationEngine::recommend(&make_test_metrics(10.0, 40.0, 50.0)).is_empty());
    }

    #[test]
    fn test_increase_focus_names_peak_bucket() {
        let mut metrics = make_test_metrics(5.0, 12.5, 20.0);
        metrics.peak_focus_bucket = Some(TimeBucket {
            index: 10,
            width_secs: 3600,
            focus_secs: 1500.0,
        });

        let recs = RecommendationEngine::recommend(&metrics);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].action.contains("10:00-11:00"));
        assert!(recs[0].action.contains("12.5"));
    }

    #[test]
    fn test_grounding_and_bound() {
        let grid = [0.0, 15.0, 20.0, 25.0, 55.0, 75.0, 100.0];
        for &s in &grid {
            for &f in &grid {
                for &g in &grid {
                    let recs = RecommendationEngine::recommend(&make_test_metrics(s, f, g));
                    assert!(recs.len() <= MAX_RECOMMENDATIONS);
                    for rec in &recs {
                        let literal = format!("{:.1}", rec.metric_value);
                        assert!(
                            rec.action.contains(&literal),
                            "{:?} does not quote {literal}",
                            rec.action
                        );
                    }
                }
            }
        }
    }
}
