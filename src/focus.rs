//! Focus & switch analysis
//!
//! Derives context switches, focus periods, the fragmentation score and the
//! most common switch pattern from a period's sessions.
//!
//! A focus period is a run of same-category sessions. Adjacent same-category
//! sessions are bridged when the next one starts within the resume window, and
//! short different-category sessions between two members are recorded as
//! interruptions instead of breaking the run. The switches into and out of an
//! interruption are attributed to it; every other switch inside the run's
//! look-back window counts against the focus predicate.

use crate::config::FocusConfig;
use crate::types::{
    duration_to_secs, secs_to_duration, ContextCategory, ContextSwitch, FocusPeriod, Interruption,
    SwitchPattern, WorkSession,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Switch density at which the fragmentation score saturates (seconds)
const FRAGMENTATION_REFERENCE_GAP_SECS: f64 = 300.0;

/// Output of the focus & switch analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FocusAnalysis {
    pub switches: Vec<ContextSwitch>,
    pub focus_periods: Vec<FocusPeriod>,
    /// Sessions that make up the focus periods, in time order
    pub focus_sessions: Vec<WorkSession>,
    pub fragmentation_score: f64,
    pub most_common_switch: Option<SwitchPattern>,
}

impl FocusAnalysis {
    /// Total focused seconds across all periods
    pub fn focus_secs(&self) -> f64 {
        self.focus_periods.iter().map(|p| p.duration_secs).sum()
    }
}

/// A switch plus the index of its destination session
#[derive(Debug, Clone)]
struct IndexedSwitch {
    switch: ContextSwitch,
    to_index: usize,
}

/// Candidate run of same-category sessions
#[derive(Debug)]
struct Run {
    members: Vec<usize>,
    interruptions: Vec<usize>,
    /// Destination indices of switches explained by interruptions
    attributed: HashSet<usize>,
}

/// Focus & switch analyzer
#[derive(Debug, Clone, Default)]
pub struct FocusAnalyzer {
    config: FocusConfig,
}

impl FocusAnalyzer {
    pub fn new(config: FocusConfig) -> Self {
        Self { config }
    }

    /// Run the full analysis over time-ordered sessions
    pub fn analyze(&self, sessions: &[WorkSession]) -> FocusAnalysis {
        let indexed = index_switches(sessions);
        let switches: Vec<ContextSwitch> = indexed.iter().map(|s| s.switch.clone()).collect();

        let mut focus_periods = Vec::new();
        let mut focus_sessions = Vec::new();

        let mut i = 0;
        while i < sessions.len() {
            let run = self.extend_run(sessions, i);
            let next = run.members.last().map(|last| last + 1).unwrap_or(i + 1);

            if let Some(period) = self.evaluate_run(sessions, &indexed, &run) {
                focus_sessions.extend(run.members.iter().map(|&m| sessions[m].clone()));
                focus_periods.push(period);
            }
            i = next;
        }

        FocusAnalysis {
            fragmentation_score: fragmentation_score(&switches),
            most_common_switch: most_common_pattern(&switches),
            switches,
            focus_periods,
            focus_sessions,
        }
    }

    /// Grow a run from `start`, bridging same-category sessions and
    /// absorbing short interruptions
    fn extend_run(&self, sessions: &[WorkSession], start: usize) -> Run {
        let category = sessions[start].category;
        let mut run = Run {
            members: vec![start],
            interruptions: Vec::new(),
            attributed: HashSet::new(),
        };

        let mut cursor = start + 1;
        loop {
            let Some(&last) = run.members.last() else {
                break;
            };

            // Skip over short foreign sessions looking for a resumption
            let mut k = cursor;
            while k < sessions.len()
                && sessions[k].category != category
                && sessions[k].duration_secs < self.config.interruption_ceiling_secs
            {
                k += 1;
            }

            let resumes = k < sessions.len()
                && sessions[k].category == category
                && duration_to_secs(sessions[k].start_time - sessions[last].end_time)
                    <= self.config.resume_window_secs;
            if !resumes {
                break;
            }

            if k > cursor {
                run.interruptions.extend(cursor..k);
                run.attributed.insert(cursor);
                run.attributed.insert(k);
            }
            run.members.push(k);
            cursor = k + 1;
        }

        run
    }

    fn evaluate_run(
        &self,
        sessions: &[WorkSession],
        switches: &[IndexedSwitch],
        run: &Run,
    ) -> Option<FocusPeriod> {
        let first = &sessions[*run.members.first()?];
        let last = &sessions[*run.members.last()?];

        let duration_secs: f64 = run.members.iter().map(|&m| sessions[m].duration_secs).sum();
        if duration_secs < self.config.min_focus_secs {
            return None;
        }

        let window_start = first.start_time - secs_to_duration(self.config.lookback_secs);
        let internal_switches = switches
            .iter()
            .filter(|s| {
                s.switch.switched_at > window_start
                    && s.switch.switched_at < last.end_time
                    && !run.attributed.contains(&s.to_index)
            })
            .count() as u32;

        if internal_switches >= self.config.max_internal_switches {
            tracing::debug!(
                start = %first.start_time,
                internal_switches,
                "Run long enough for focus but too many switches"
            );
            return None;
        }

        Some(FocusPeriod {
            start_time: first.start_time,
            end_time: last.end_time,
            duration_secs,
            app_id: dominant_app(sessions, &run.members),
            category: first.category,
            session_count: run.members.len() as u32,
            internal_switches,
            interruptions: run
                .interruptions
                .iter()
                .map(|&k| Interruption {
                    app_id: sessions[k].app_id.clone(),
                    category: sessions[k].category,
                    started_at: sessions[k].start_time,
                    duration_secs: sessions[k].duration_secs,
                })
                .collect(),
        })
    }
}

/// Context switches between adjacent sessions, in order
pub fn detect_switches(sessions: &[WorkSession]) -> Vec<ContextSwitch> {
    index_switches(sessions).into_iter().map(|s| s.switch).collect()
}

fn index_switches(sessions: &[WorkSession]) -> Vec<IndexedSwitch> {
    let mut switches: Vec<IndexedSwitch> = Vec::new();
    for (idx, pair) in sessions.windows(2).enumerate() {
        let (from, to) = (&pair[0], &pair[1]);
        if from.category == to.category {
            continue;
        }
        let since_previous_secs = switches
            .last()
            .map(|prev| duration_to_secs(to.start_time - prev.switch.switched_at));
        switches.push(IndexedSwitch {
            switch: ContextSwitch {
                from_app: from.app_id.clone(),
                to_app: to.app_id.clone(),
                from_category: from.category,
                to_category: to.category,
                switched_at: to.start_time,
                since_previous_secs,
            },
            to_index: idx + 1,
        });
    }
    switches
}

/// Fragmentation score in `[0, 100]`
///
/// Zero with fewer than two switches, since no gap between switches exists.
pub fn fragmentation_score(switches: &[ContextSwitch]) -> f64 {
    let gaps: Vec<f64> = switches
        .iter()
        .filter_map(|s| s.since_previous_secs)
        .collect();
    if gaps.is_empty() {
        return 0.0;
    }

    let avg_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if avg_gap <= 0.0 {
        return 100.0;
    }
    ((FRAGMENTATION_REFERENCE_GAP_SECS / avg_gap) * 100.0).min(100.0)
}

/// Most frequent (from, to) category pair, ties going to the most recent
pub fn most_common_pattern(switches: &[ContextSwitch]) -> Option<SwitchPattern> {
    let mut counts: HashMap<(ContextCategory, ContextCategory), (u32, usize)> = HashMap::new();
    for (idx, switch) in switches.iter().enumerate() {
        let entry = counts
            .entry((switch.from_category, switch.to_category))
            .or_insert((0, idx));
        entry.0 += 1;
        entry.1 = idx;
    }

    counts
        .into_iter()
        .max_by_key(|(_, (count, last_seen))| (*count, *last_seen))
        .map(|((from, to), (count, _))| SwitchPattern { from, to, count })
}

/// App with the largest share of the members' time, first one on ties
fn dominant_app(sessions: &[WorkSession], members: &[usize]) -> String {
    let mut totals: Vec<(&str, f64)> = Vec::new();
    for &m in members {
        let session = &sessions[m];
        match totals.iter_mut().find(|(app, _)| *app == session.app_id) {
            Some((_, total)) => *total += session.duration_secs,
            None => totals.push((&session.app_id, session.duration_secs)),
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for (app, total) in totals {
        if best.map_or(true, |(_, b)| total > b) {
            best = Some((app, total));
        }
    }
    best.map(|(app, _)| app.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn session(app: &str, category: ContextCategory, start: i64, duration: i64) -> WorkSession {
        WorkSession {
            start_time: t0() + Duration::seconds(start),
            end_time: t0() + Duration::seconds(start + duration),
            app_id: app.to_string(),
            window_title: String::new(),
            duration_secs: duration as f64,
            event_count: 1,
            category,
        }
    }

    fn dev(start: i64, duration: i64) -> WorkSession {
        session("code", ContextCategory::Development, start, duration)
    }

    fn chat(start: i64, duration: i64) -> WorkSession {
        session("slack", ContextCategory::Communication, start, duration)
    }

    fn web(start: i64, duration: i64) -> WorkSession {
        session("chrome", ContextCategory::Browsing, start, duration)
    }

    #[test]
    fn test_detect_switches() {
        let sessions = vec![dev(0, 600), dev(600, 60), chat(660, 60), dev(720, 60)];
        let switches = detect_switches(&sessions);

        assert_eq!(switches.len(), 2);
        assert_eq!(switches[0].from_category, ContextCategory::Development);
        assert_eq!(switches[0].to_category, ContextCategory::Communication);
        assert_eq!(switches[0].since_previous_secs, None);
        assert_eq!(switches[1].since_previous_secs, Some(60.0));
    }

    #[test]
    fn test_single_long_session_is_focus() {
        let analysis = FocusAnalyzer::default().analyze(&[dev(0, 1800)]);

        assert_eq!(analysis.focus_periods.len(), 1);
        let period = &analysis.focus_periods[0];
        assert_eq!(period.duration_secs, 1800.0);
        assert_eq!(period.internal_switches, 0);
        assert!(period.interruptions.is_empty());
    }

    #[test]
    fn test_short_session_is_not_focus() {
        let analysis = FocusAnalyzer::default().analyze(&[dev(0, 1499)]);
        assert!(analysis.focus_periods.is_empty());
        assert_eq!(analysis.focus_secs(), 0.0);
    }

    #[test]
    fn test_interruption_bridged_and_recorded() {
        // 20 min code, 2 min slack, 10 min code
        let sessions = vec![dev(0, 1200), chat(1200, 120), dev(1320, 600)];
        let analysis = FocusAnalyzer::default().analyze(&sessions);

        assert_eq!(analysis.focus_periods.len(), 1);
        let period = &analysis.focus_periods[0];
        assert_eq!(period.duration_secs, 1800.0);
        assert_eq!(period.session_count, 2);
        assert_eq!(period.internal_switches, 0);
        assert_eq!(period.interruptions.len(), 1);
        assert_eq!(period.interruptions[0].app_id, "slack");
        assert_eq!(period.interruptions[0].duration_secs, 120.0);
        assert_eq!(period.end_time, t0() + Duration::seconds(1920));

        // The switches still exist for density metrics
        assert_eq!(analysis.switches.len(), 2);
    }

    #[test]
    fn test_long_foreign_session_breaks_run() {
        let sessions = vec![dev(0, 1200), chat(1200, 600), dev(1800, 600)];
        let analysis = FocusAnalyzer::default().analyze(&sessions);
        assert!(analysis.focus_periods.is_empty());
    }

    #[test]
    fn test_interruption_ceiling_is_exclusive() {
        let just_below = vec![dev(0, 1200), chat(1200, 179), dev(1379, 600)];
        let analysis = FocusAnalyzer::default().analyze(&just_below);
        assert_eq!(analysis.focus_periods.len(), 1);
        assert_eq!(analysis.focus_periods[0].interruptions.len(), 1);

        let at_ceiling = vec![dev(0, 1200), chat(1200, 180), dev(1380, 600)];
        let analysis = FocusAnalyzer::default().analyze(&at_ceiling);
        assert!(analysis.focus_periods.is_empty());
    }

    #[test]
    fn test_mixed_interruption_counts_inner_switch() {
        // code -> slack -> chrome -> code: the slack->chrome switch is unattributed
        let sessions = vec![dev(0, 1200), chat(1200, 60), web(1260, 60), dev(1320, 600)];
        let analysis = FocusAnalyzer::default().analyze(&sessions);

        assert_eq!(analysis.focus_periods.len(), 1);
        assert_eq!(analysis.focus_periods[0].internal_switches, 1);
        assert_eq!(analysis.focus_periods[0].interruptions.len(), 2);
    }

    #[test]
    fn test_too_many_internal_switches() {
        let config = FocusConfig {
            max_internal_switches: 1,
            ..Default::default()
        };
        let sessions = vec![dev(0, 1200), chat(1200, 60), web(1260, 60), dev(1320, 600)];
        let analysis = FocusAnalyzer::new(config).analyze(&sessions);
        assert!(analysis.focus_periods.is_empty());
    }

    #[test]
    fn test_lookback_counts_leading_switch() {
        let config = FocusConfig {
            lookback_secs: 120.0,
            max_internal_switches: 1,
            ..Default::default()
        };
        let sessions = vec![chat(0, 60), dev(60, 1800)];

        assert_eq!(FocusAnalyzer::default().analyze(&sessions).focus_periods.len(), 1);
        assert!(FocusAnalyzer::new(config).analyze(&sessions).focus_periods.is_empty());
    }

    #[test]
    fn test_resume_window_limits_bridging() {
        // Same category, but the second session starts 15 minutes later
        let sessions = vec![dev(0, 900), dev(1800, 900)];
        let analysis = FocusAnalyzer::default().analyze(&sessions);
        assert!(analysis.focus_periods.is_empty());

        let sessions = vec![dev(0, 900), dev(1200, 900)];
        let analysis = FocusAnalyzer::default().analyze(&sessions);
        assert_eq!(analysis.focus_periods.len(), 1);
        assert_eq!(analysis.focus_sessions.len(), 2);
    }

    #[test]
    fn test_dominant_app() {
        let mut a = dev(0, 600);
        a.app_id = "vim".to_string();
        let sessions = vec![a, dev(600, 1000)];
        let analysis = FocusAnalyzer::default().analyze(&sessions);
        assert_eq!(analysis.focus_periods[0].app_id, "code");
    }

    #[test]
    fn test_fragmentation_edge_cases() {
        assert_eq!(fragmentation_score(&[]), 0.0);

        let one = detect_switches(&[dev(0, 60), chat(60, 60)]);
        assert_eq!(one.len(), 1);
        assert_eq!(fragmentation_score(&one), 0.0);
    }

    #[test]
    fn test_fragmentation_formula() {
        // Switches every 600s: 300/600*100 = 50
        let sessions = vec![dev(0, 600), chat(600, 600), dev(1200, 600), chat(1800, 600)];
        let switches = detect_switches(&sessions);
        assert!((fragmentation_score(&switches) - 50.0).abs() < 0.001);

        // Switches every 60s saturate at 100
        let sessions = vec![dev(0, 60), chat(60, 60), dev(120, 60), chat(180, 60)];
        let switches = detect_switches(&sessions);
        assert_eq!(fragmentation_score(&switches), 100.0);
    }

    #[test]
    fn test_most_common_pattern_ties_go_to_recent() {
        // dev->chat, chat->web, web->dev, dev->chat, chat->web
        let sessions = vec![
            dev(0, 60),
            chat(60, 60),
            web(120, 60),
            dev(180, 60),
            chat(240, 60),
            web(300, 60),
        ];
        let switches = detect_switches(&sessions);
        let pattern = most_common_pattern(&switches).unwrap();

        assert_eq!(pattern.count, 2);
        assert_eq!(pattern.from, ContextCategory::Communication);
        assert_eq!(pattern.to, ContextCategory::Browsing);
        assert!(most_common_pattern(&[]).is_none());
    }
}
