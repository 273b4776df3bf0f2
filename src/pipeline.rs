//! Pipeline orchestration
//!
//! This module provides the public API for Workpulse.
//! It runs one analysis period from raw observations to a committed insight.
//!
//! Pipeline stages:
//! 1. EventNormalizer - Privacy exclusions, malformed drops, idle folding
//! 2. Sessionizer - Merge observations into work sessions
//! 3. FocusAnalyzer - Switches, focus periods, fragmentation
//! 4. MetricsAggregator - Period metrics and prior comparison
//! 5. RecommendationEngine - Grounded suggestions
//! 6. InsightAssembler - Narrative and final summary

use crate::categories::CategoryMap;
use crate::config::PulseConfig;
use crate::error::ComputeError;
use crate::focus::FocusAnalyzer;
use crate::insight::InsightAssembler;
use crate::metrics::{compare, MetricsAggregator};
use crate::normalizer::{EventNormalizer, NormalizationReport};
use crate::recommendations::RecommendationEngine;
use crate::schema::RawObservation;
use crate::sessionizer::Sessionizer;
use crate::store::{AnalyticsStore, EventSource, PageRequest, PeriodRun};
use crate::types::{
    AnalysisPeriod, BehavioralMetrics, ContextSwitch, FocusPeriod, PeriodInsight, WorkSession,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Full output of one period run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodReport {
    pub period: AnalysisPeriod,
    pub normalization: NormalizationReport,
    pub sessions: Vec<WorkSession>,
    pub switches: Vec<ContextSwitch>,
    pub focus_periods: Vec<FocusPeriod>,
    pub insight: PeriodInsight,
}

impl PeriodReport {
    pub fn metrics(&self) -> &BehavioralMetrics {
        &self.insight.metrics
    }

    /// The subset of the report that gets persisted
    pub fn to_run(&self) -> PeriodRun {
        PeriodRun {
            period: self.period,
            sessions: self.sessions.clone(),
            metrics: self.insight.metrics.clone(),
            insight: self.insight.clone(),
        }
    }
}

struct Stages {
    normalizer: EventNormalizer,
    sessionizer: Sessionizer,
    focus: FocusAnalyzer,
    metrics: MetricsAggregator,
    assembler: InsightAssembler,
}

/// Runs analysis periods. Cheap to clone; clones share the configured stages.
#[derive(Clone)]
pub struct PeriodAnalyzer {
    stages: Arc<Stages>,
}

impl PeriodAnalyzer {
    /// Build every stage from configuration
    pub fn from_config(config: &PulseConfig) -> Result<Self, ComputeError> {
        Self::with_assembler(config, InsightAssembler::from_config(config)?)
    }

    /// Build the stages from configuration around a given insight assembler
    pub fn with_assembler(
        config: &PulseConfig,
        assembler: InsightAssembler,
    ) -> Result<Self, ComputeError> {
        let categories = CategoryMap::from_overrides(&config.categories)?;
        Ok(Self {
            stages: Arc::new(Stages {
                normalizer: EventNormalizer::from_config(&config.normalizer)?,
                sessionizer: Sessionizer::new(config.sessionizer.clone(), categories),
                focus: FocusAnalyzer::new(config.focus.clone()),
                metrics: MetricsAggregator::new(config.metrics.clone())?,
                assembler,
            }),
        })
    }

    /// Run the pipeline over an immutable batch of observations
    pub async fn analyze(
        &self,
        period: AnalysisPeriod,
        observations: &[RawObservation],
        prior: Option<&BehavioralMetrics>,
    ) -> PeriodReport {
        let stages = &self.stages;

        // Stage 1: Normalize
        let batch = stages.normalizer.normalize(observations);

        // Stage 2: Sessionize
        let sessions = stages.sessionizer.sessionize(&batch.observations);

        // Stage 3: Focus & switches
        let focus = stages.focus.analyze(&sessions);

        // Stage 4: Metrics
        let mut metrics = stages.metrics.aggregate(period, &sessions, &focus);
        if let Some(prior) = prior {
            metrics.comparison = Some(compare(&metrics, prior));
        }

        // Stage 5: Recommendations
        let recommendations = RecommendationEngine::recommend(&metrics);

        // Stage 6: Insight
        let insight = stages.assembler.assemble(metrics, recommendations).await;

        tracing::info!(
            period = %period,
            observations = batch.report.total,
            sessions = sessions.len(),
            focus_periods = focus.focus_periods.len(),
            low_confidence = insight.low_confidence,
            "Analyzed period"
        );

        PeriodReport {
            period,
            normalization: batch.report,
            sessions,
            switches: focus.switches,
            focus_periods: focus.focus_periods,
            insight,
        }
    }

    /// Fetch, analyze and commit one period
    ///
    /// The store is written once, at the very end; dropping the future
    /// earlier leaves it untouched.
    pub async fn run_period(
        &self,
        source: &dyn EventSource,
        store: &dyn AnalyticsStore,
        period: AnalysisPeriod,
    ) -> Result<PeriodReport, ComputeError> {
        let prior = prior_metrics(source, store, period).await?;
        self.run_with_prior(source, store, period, prior).await
    }

    async fn run_with_prior(
        &self,
        source: &dyn EventSource,
        store: &dyn AnalyticsStore,
        period: AnalysisPeriod,
        prior: Option<BehavioralMetrics>,
    ) -> Result<PeriodReport, ComputeError> {
        let snapshot = fetch_snapshot(source, period).await?;
        let report = self.analyze(period, &snapshot, prior.as_ref()).await;
        store.commit_run(report.to_run()).await?;
        Ok(report)
    }

    /// Run several periods concurrently, each on its own snapshot
    ///
    /// Prior-period coverage is decided before any task starts, so a period
    /// whose predecessor is part of the same backfill gets no comparison.
    /// Reports come back in the order of `periods`.
    pub async fn backfill(
        &self,
        source: Arc<dyn EventSource>,
        store: Arc<dyn AnalyticsStore>,
        periods: Vec<AnalysisPeriod>,
    ) -> Result<Vec<PeriodReport>, ComputeError> {
        let mut priors = Vec::with_capacity(periods.len());
        for period in &periods {
            priors.push(prior_metrics(source.as_ref(), store.as_ref(), *period).await?);
        }

        let mut tasks = JoinSet::new();
        for (idx, (period, prior)) in periods.iter().copied().zip(priors).enumerate() {
            let analyzer = self.clone();
            let source = Arc::clone(&source);
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                let result = analyzer
                    .run_with_prior(source.as_ref(), store.as_ref(), period, prior)
                    .await;
                (idx, result)
            });
        }

        let mut results: Vec<Option<Result<PeriodReport, ComputeError>>> =
            (0..periods.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (idx, result) = joined.map_err(|e| ComputeError::TaskError(e.to_string()))?;
            results[idx] = Some(result);
        }

        results
            .into_iter()
            .zip(periods)
            .map(|(result, period)| {
                result.unwrap_or_else(|| {
                    Err(ComputeError::TaskError(format!("no result for {period}")))
                })
            })
            .collect()
    }
}

/// Read every page of a period's observations
pub async fn fetch_snapshot(
    source: &dyn EventSource,
    period: AnalysisPeriod,
) -> Result<Vec<RawObservation>, ComputeError> {
    let mut snapshot = Vec::new();
    let mut page = PageRequest::default();
    loop {
        let result = source.observations(period, page).await?;
        snapshot.extend(result.items);
        match result.next {
            Some(cursor) => page = PageRequest::after(cursor, page.limit),
            None => break,
        }
    }
    Ok(snapshot)
}

/// Metrics of the preceding period, if it is fully covered by data
///
/// Covered means the event source reaches back to the prior period's start
/// and the store holds a committed run for it.
pub async fn prior_metrics(
    source: &dyn EventSource,
    store: &dyn AnalyticsStore,
    period: AnalysisPeriod,
) -> Result<Option<BehavioralMetrics>, ComputeError> {
    let prior = period.preceding();
    let reaches_back = source
        .earliest_observation()
        .await?
        .map_or(false, |earliest| earliest <= prior.start);
    if !reaches_back || !store.has_run(prior).await? {
        tracing::debug!(period = %period, "No fully covered prior period");
        return Ok(None);
    }
    store.metrics_for(prior).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NarrativeConfig;
    use crate::narrative::test_support::{fast_policy, ScriptedNarrator};
    use crate::store::MemoryStore;
    use crate::types::{NarrativeSource, RecommendationCategory};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn day_start(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn day(day: u32) -> AnalysisPeriod {
        AnalysisPeriod::new(day_start(day), day_start(day) + Duration::days(1)).unwrap()
    }

    fn block(
        out: &mut Vec<RawObservation>,
        cursor: &mut DateTime<Utc>,
        app: &str,
        window: &str,
        minutes: i64,
    ) {
        for _ in 0..minutes {
            out.push(RawObservation::active(app, window, *cursor, 60.0));
            *cursor += Duration::seconds(60);
        }
    }

    /// 09:00-10:57 with one interrupted focus block and an idle break
    fn make_test_workday(day: u32) -> Vec<RawObservation> {
        let mut out = Vec::new();
        let mut cursor = day_start(day) + Duration::hours(9);
        block(&mut out, &mut cursor, "code", "lib.rs", 40);
        block(&mut out, &mut cursor, "slack", "#team", 2);
        block(&mut out, &mut cursor, "code", "lib.rs", 30);
        block(&mut out, &mut cursor, "chrome", "docs", 10);
        out.push(RawObservation::idle(cursor, 900.0));
        cursor += Duration::seconds(900);
        block(&mut out, &mut cursor, "notion", "plan", 20);
        out
    }

    fn make_test_analyzer() -> PeriodAnalyzer {
        PeriodAnalyzer::from_config(&PulseConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_workday() {
        let report = make_test_analyzer()
            .analyze(day(15), &make_test_workday(15), None)
            .await;
        let metrics = report.metrics();

        assert_eq!(report.normalization.malformed, 0);
        assert_eq!(report.sessions.len(), 5);
        assert_eq!(metrics.active_secs, 6120.0);
        assert_eq!(
            metrics.active_secs,
            report.sessions.iter().map(|s| s.duration_secs).sum::<f64>()
        );
        assert_eq!(metrics.switch_count, 4);
        assert_eq!(report.switches.len(), 4);

        assert_eq!(report.focus_periods.len(), 1);
        assert_eq!(report.focus_periods[0].duration_secs, 4200.0);
        assert_eq!(report.focus_periods[0].interruptions[0].app_id, "slack");

        let peak = metrics.peak_focus_bucket.as_ref().unwrap();
        assert_eq!(peak.label(), "09:00-10:00");
        assert!((peak.focus_secs - 3480.0).abs() < 0.001);

        assert!(!report.insight.low_confidence);
        assert_eq!(report.insight.recommendations.len(), 1);
        assert_eq!(
            report.insight.recommendations[0].category,
            RecommendationCategory::Maintain
        );
        assert!(report.insight.narrative.contains("09:00-10:00"));
        assert!(metrics.comparison.is_none());
    }

    #[tokio::test]
    async fn test_short_idle_not_counted_as_work() {
        let start = day_start(15) + Duration::hours(9);
        let observations = vec![
            RawObservation::active("code", "a.rs", start, 1200.0),
            RawObservation::idle(start + Duration::seconds(1200), 200.0),
            RawObservation::active("code", "a.rs", start + Duration::seconds(1400), 1200.0),
        ];
        let report = make_test_analyzer()
            .analyze(day(15), &observations, None)
            .await;

        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.metrics().active_secs, 2400.0);
        assert_eq!(report.metrics().switch_count, 0);
    }

    #[tokio::test]
    async fn test_oversized_duration_dropped_as_malformed() {
        let start = day_start(15) + Duration::hours(9);
        let observations = vec![
            RawObservation::active("code", "a.rs", start, 3600.0),
            RawObservation::active("code", "b.rs", start + Duration::hours(1), 1.0e13),
        ];
        let report = make_test_analyzer()
            .analyze(day(15), &observations, None)
            .await;

        assert_eq!(report.normalization.kept, 1);
        assert_eq!(report.normalization.malformed, 1);
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.metrics().active_secs, 3600.0);
    }

    #[tokio::test]
    async fn test_excluded_apps_never_reach_output() {
        let mut config = PulseConfig::default();
        config.normalizer.excluded_apps = vec!["slack".to_string()];
        let analyzer = PeriodAnalyzer::from_config(&config).unwrap();

        let report = analyzer.analyze(day(15), &make_test_workday(15), None).await;

        assert_eq!(report.normalization.excluded, 2);
        assert!(report.sessions.iter().all(|s| s.app_id != "slack"));
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("#team"));
    }

    #[tokio::test]
    async fn test_empty_period_is_low_confidence() {
        let report = make_test_analyzer().analyze(day(15), &[], None).await;

        assert!(report.sessions.is_empty());
        assert!(report.insight.low_confidence);
        assert!(report.insight.recommendations.is_empty());
        assert_eq!(report.metrics().focus_percentage, 0.0);
        assert!(report.insight.narrative.contains("no peak"));
    }

    #[tokio::test]
    async fn test_run_period_commits_and_compares() {
        let store = MemoryStore::new();
        let mut events = make_test_workday(14);
        events.extend(make_test_workday(15));
        // Retained history reaches back past the first day
        events.insert(0, RawObservation::active("code", "setup", day_start(13), 60.0));
        store.ingest(events).await;

        let analyzer = make_test_analyzer();

        let first = analyzer.run_period(&store, &store, day(14)).await.unwrap();
        assert!(first.metrics().comparison.is_none());
        assert!(store.has_run(day(14)).await.unwrap());

        let second = analyzer.run_period(&store, &store, day(15)).await.unwrap();
        let comparison = second.metrics().comparison.as_ref().unwrap();
        assert_eq!(comparison.prior_period, day(14));
        assert_eq!(comparison.active_secs_delta, 0.0);

        let stored = store.insight_for(day(15)).await.unwrap().unwrap();
        assert_eq!(stored.insight_id, second.insight.insight_id);
    }

    #[tokio::test]
    async fn test_uncovered_prior_has_no_comparison() {
        let store = MemoryStore::new();
        let mut events = make_test_workday(14);
        events.extend(make_test_workday(15));
        store.ingest(events).await;

        let analyzer = make_test_analyzer();
        analyzer.run_period(&store, &store, day(14)).await.unwrap();
        let second = analyzer.run_period(&store, &store, day(15)).await.unwrap();

        // Day 14 has a committed run, but the data only starts at 09:00
        assert!(second.metrics().comparison.is_none());
    }

    #[tokio::test]
    async fn test_backfill_in_period_order() {
        let store = Arc::new(MemoryStore::new());
        let mut events = Vec::new();
        for d in 15..=18 {
            events.extend(make_test_workday(d));
        }
        store.ingest(events).await;

        let periods = vec![day(18), day(15), day(17), day(16)];
        let reports = make_test_analyzer()
            .backfill(store.clone(), store.clone(), periods.clone())
            .await
            .unwrap();

        let got: Vec<AnalysisPeriod> = reports.iter().map(|r| r.period).collect();
        assert_eq!(got, periods);
        for period in periods {
            assert!(store.has_run(period).await.unwrap());
        }
        assert!(reports.iter().all(|r| r.metrics().active_secs == 6120.0));
    }

    #[tokio::test]
    async fn test_cancelled_run_commits_nothing() {
        let store = MemoryStore::new();
        store.ingest(make_test_workday(15)).await;

        let mut narrator = ScriptedNarrator::new(vec![Ok("slow".to_string())]);
        narrator.delay = Some(std::time::Duration::from_secs(5));
        let assembler = InsightAssembler::new(Arc::new(narrator), NarrativeConfig::default(), 3600.0)
            .with_policy(crate::narrative::RetryPolicy {
                timeout: std::time::Duration::from_secs(10),
                ..fast_policy()
            });
        let analyzer = PeriodAnalyzer::with_assembler(&PulseConfig::default(), assembler).unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            analyzer.run_period(&store, &store, day(15)),
        )
        .await;

        assert!(result.is_err());
        assert!(!store.has_run(day(15)).await.unwrap());
        assert!(store.insight_for(day(15)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generated_narrative_through_pipeline() {
        let narrator = Arc::new(ScriptedNarrator::new(vec![Ok("Solid morning.".to_string())]));
        let assembler = InsightAssembler::new(narrator, NarrativeConfig::default(), 3600.0)
            .with_policy(fast_policy());
        let analyzer = PeriodAnalyzer::with_assembler(&PulseConfig::default(), assembler).unwrap();

        let report = analyzer.analyze(day(15), &make_test_workday(15), None).await;
        assert_eq!(report.insight.narrative, "Solid morning.");
        assert!(matches!(
            report.insight.narrative_source,
            NarrativeSource::Generated { .. }
        ));
    }
}
