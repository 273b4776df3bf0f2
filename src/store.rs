//! Event source and analytics store interfaces
//!
//! Range queries are half-open `[start, end)` and paginated with a
//! `(time, sequence)` cursor, so consecutive pages neither overlap nor skip
//! records that share a timestamp. Readers only ever see fully committed
//! pipeline runs.

use crate::error::ComputeError;
use crate::schema::RawObservation;
use crate::types::{AnalysisPeriod, BehavioralMetrics, PeriodInsight, WorkSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default page size for range queries
pub const DEFAULT_PAGE_LIMIT: usize = 500;

/// Position after the last record of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageCursor {
    pub time: DateTime<Utc>,
    pub seq: u64,
}

/// Page selection for range queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Resume after this position; `None` starts at the beginning of the range
    pub cursor: Option<PageCursor>,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            cursor: None,
            limit,
        }
    }

    pub fn after(cursor: PageCursor, limit: usize) -> Self {
        Self {
            cursor: Some(cursor),
            limit,
        }
    }
}

/// One page of results, ascending by time
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` when the range is exhausted
    pub next: Option<PageCursor>,
}

/// Everything one pipeline run writes, committed as a unit
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodRun {
    pub period: AnalysisPeriod,
    pub sessions: Vec<WorkSession>,
    pub metrics: BehavioralMetrics,
    pub insight: PeriodInsight,
}

/// Source of raw activity observations
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Observations with timestamps inside `range`, ascending
    async fn observations(
        &self,
        range: AnalysisPeriod,
        page: PageRequest,
    ) -> Result<Page<RawObservation>, ComputeError>;

    /// Timestamp of the oldest retained observation
    async fn earliest_observation(&self) -> Result<Option<DateTime<Utc>>, ComputeError>;
}

/// Persistent home of sessions, metrics and insights
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Atomically store a run, replacing any earlier run for the same period
    async fn commit_run(&self, run: PeriodRun) -> Result<(), ComputeError>;

    /// Committed sessions starting inside `range`, ascending by start
    async fn sessions(
        &self,
        range: AnalysisPeriod,
        page: PageRequest,
    ) -> Result<Page<WorkSession>, ComputeError>;

    async fn metrics_for(
        &self,
        period: AnalysisPeriod,
    ) -> Result<Option<BehavioralMetrics>, ComputeError>;

    async fn insight_for(
        &self,
        period: AnalysisPeriod,
    ) -> Result<Option<PeriodInsight>, ComputeError>;

    /// Committed insights generated inside `range`, ascending by generation time
    async fn insights(
        &self,
        range: AnalysisPeriod,
        page: PageRequest,
    ) -> Result<Page<PeriodInsight>, ComputeError>;

    async fn has_run(&self, period: AnalysisPeriod) -> Result<bool, ComputeError>;

    /// Drop observations and runs entirely before `cutoff`; returns records removed
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ComputeError>;
}

#[derive(Debug, Clone)]
struct Stamped<T> {
    time: DateTime<Utc>,
    seq: u64,
    value: T,
}

impl<T> Stamped<T> {
    fn cursor(&self) -> PageCursor {
        PageCursor {
            time: self.time,
            seq: self.seq,
        }
    }
}

#[derive(Debug, Clone)]
struct CommittedRun {
    sessions: Vec<Stamped<WorkSession>>,
    metrics: BehavioralMetrics,
    insight: Stamped<PeriodInsight>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Sorted by (time, seq)
    observations: Vec<Stamped<RawObservation>>,
    undated: usize,
    runs: HashMap<AnalysisPeriod, CommittedRun>,
    next_seq: u64,
}

impl MemoryState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// In-memory store for tests, the CLI and ephemeral runs.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Append raw observations to the event log
    ///
    /// Records without a timestamp cannot be placed in any range and are
    /// counted but not retained.
    pub async fn ingest(&self, records: Vec<RawObservation>) -> usize {
        let mut state = self.inner.lock().await;
        let mut accepted = 0;
        for record in records {
            let Some(time) = record.timestamp else {
                state.undated += 1;
                continue;
            };
            let seq = state.next_seq();
            state.observations.push(Stamped {
                time,
                seq,
                value: record,
            });
            accepted += 1;
        }
        state.observations.sort_by_key(|s| (s.time, s.seq));
        if state.undated > 0 {
            tracing::debug!(undated = state.undated, "Undated observations not retained");
        }
        accepted
    }

    /// Number of retained observations
    pub async fn observation_count(&self) -> usize {
        self.inner.lock().await.observations.len()
    }
}

fn paginate<'a, T, I>(
    items: I,
    range: AnalysisPeriod,
    page: PageRequest,
) -> Result<Page<T>, ComputeError>
where
    T: Clone + 'a,
    I: IntoIterator<Item = &'a Stamped<T>>,
{
    if page.limit == 0 {
        return Err(ComputeError::StoreError(
            "page limit must be positive".to_string(),
        ));
    }

    let mut matching = items
        .into_iter()
        .filter(|s| range.contains(s.time))
        .filter(|s| page.cursor.map_or(true, |c| s.cursor() > c));

    let mut selected: Vec<&Stamped<T>> = Vec::with_capacity(page.limit.min(DEFAULT_PAGE_LIMIT));
    for item in matching.by_ref() {
        selected.push(item);
        if selected.len() == page.limit {
            break;
        }
    }
    let has_more = matching.next().is_some();

    let next = if has_more {
        selected.last().map(|s| s.cursor())
    } else {
        None
    };
    Ok(Page {
        items: selected.into_iter().map(|s| s.value.clone()).collect(),
        next,
    })
}

#[async_trait]
impl EventSource for MemoryStore {
    async fn observations(
        &self,
        range: AnalysisPeriod,
        page: PageRequest,
    ) -> Result<Page<RawObservation>, ComputeError> {
        let state = self.inner.lock().await;
        paginate(state.observations.iter(), range, page)
    }

    async fn earliest_observation(&self) -> Result<Option<DateTime<Utc>>, ComputeError> {
        let state = self.inner.lock().await;
        Ok(state.observations.first().map(|s| s.time))
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn commit_run(&self, run: PeriodRun) -> Result<(), ComputeError> {
        if run.insight.period != run.period || run.metrics.period != run.period {
            return Err(ComputeError::StoreError(format!(
                "run for {} carries results for another period",
                run.period
            )));
        }

        let mut state = self.inner.lock().await;
        let sessions: Vec<Stamped<WorkSession>> = run
            .sessions
            .into_iter()
            .map(|session| Stamped {
                time: session.start_time,
                seq: state.next_seq(),
                value: session,
            })
            .collect();
        let insight = Stamped {
            time: run.insight.generated_at,
            seq: state.next_seq(),
            value: run.insight,
        };

        let replaced = state
            .runs
            .insert(
                run.period,
                CommittedRun {
                    sessions,
                    metrics: run.metrics,
                    insight,
                },
            )
            .is_some();
        tracing::debug!(period = %run.period, replaced, "Committed period run");
        Ok(())
    }

    async fn sessions(
        &self,
        range: AnalysisPeriod,
        page: PageRequest,
    ) -> Result<Page<WorkSession>, ComputeError> {
        let state = self.inner.lock().await;
        let mut all: Vec<&Stamped<WorkSession>> =
            state.runs.values().flat_map(|r| r.sessions.iter()).collect();
        all.sort_by_key(|s| s.cursor());
        paginate(all, range, page)
    }

    async fn metrics_for(
        &self,
        period: AnalysisPeriod,
    ) -> Result<Option<BehavioralMetrics>, ComputeError> {
        let state = self.inner.lock().await;
        Ok(state.runs.get(&period).map(|r| r.metrics.clone()))
    }

    async fn insight_for(
        &self,
        period: AnalysisPeriod,
    ) -> Result<Option<PeriodInsight>, ComputeError> {
        let state = self.inner.lock().await;
        Ok(state.runs.get(&period).map(|r| r.insight.value.clone()))
    }

    async fn insights(
        &self,
        range: AnalysisPeriod,
        page: PageRequest,
    ) -> Result<Page<PeriodInsight>, ComputeError> {
        let state = self.inner.lock().await;
        let mut all: Vec<&Stamped<PeriodInsight>> =
            state.runs.values().map(|r| &r.insight).collect();
        all.sort_by_key(|s| s.cursor());
        paginate(all, range, page)
    }

    async fn has_run(&self, period: AnalysisPeriod) -> Result<bool, ComputeError> {
        Ok(self.inner.lock().await.runs.contains_key(&period))
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ComputeError> {
        let mut state = self.inner.lock().await;

        let before = state.observations.len();
        state.observations.retain(|s| s.time >= cutoff);
        let mut removed = before - state.observations.len();

        let runs_before = state.runs.len();
        state.runs.retain(|period, _| period.end > cutoff);
        removed += runs_before - state.runs.len();

        tracing::info!(%cutoff, removed, "Applied retention cutoff");
        Ok(removed)
    }
}
