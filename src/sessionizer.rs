//! Work session construction
//!
//! A single pass over chronologically ordered observations with one
//! accumulator. The rules, evaluated per observation:
//!
//! 1. Idle longer than the idle threshold closes the open session.
//! 2. Observations shorter than the noise threshold are discarded.
//! 3. With no open session, the observation starts one.
//! 4. Same app, window and category within the merge gap extends the session.
//! 5. Anything else closes the session and starts a new one.
//!
//! If the pass hits a logic fault the batch is regrouped into fixed time
//! buckets instead, so callers always get sessions back.

use crate::categories::CategoryMap;
use crate::config::SessionizerConfig;
use crate::error::ComputeError;
use crate::types::{duration_to_secs, ActivityObservation, ContextCategory, WorkSession};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Accumulator state of the session state machine
#[derive(Debug)]
enum SessionState {
    NoSession,
    Open(WorkSession),
}

/// Merges observations into work sessions
#[derive(Debug, Clone, Default)]
pub struct Sessionizer {
    config: SessionizerConfig,
    categories: CategoryMap,
}

impl Sessionizer {
    pub fn new(config: SessionizerConfig, categories: CategoryMap) -> Self {
        Self { config, categories }
    }

    /// Sessionize observations, falling back to bucket grouping on a fault
    pub fn sessionize(&self, observations: &[ActivityObservation]) -> Vec<WorkSession> {
        match self.try_sessionize(observations) {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    observations = observations.len(),
                    "Sessionization fault, falling back to time-bucket grouping"
                );
                self.bucket_fallback(observations)
            }
        }
    }

    /// Run the state machine, reporting faults instead of recovering
    pub fn try_sessionize(
        &self,
        observations: &[ActivityObservation],
    ) -> Result<Vec<WorkSession>, ComputeError> {
        let mut sessions = Vec::new();
        let mut state = SessionState::NoSession;
        let mut last_seen: Option<DateTime<Utc>> = None;

        for (idx, observation) in observations.iter().enumerate() {
            if let Some(prev) = last_seen {
                if observation.timestamp < prev {
                    return Err(ComputeError::SessionizationFault(format!(
                        "observation {idx} at {} precedes {prev}",
                        observation.timestamp
                    )));
                }
            }
            last_seen = Some(observation.timestamp);

            // Rule 1: long idle ends the session without starting another
            if observation.is_idle && observation.duration_secs > self.config.idle_threshold_secs {
                if let SessionState::Open(session) =
                    std::mem::replace(&mut state, SessionState::NoSession)
                {
                    sessions.push(Self::close(session)?);
                }
                continue;
            }

            // Shorter idle widens the open session's span but adds no active time
            if observation.is_idle {
                if let SessionState::Open(session) = &mut state {
                    session.end_time = session.end_time.max(observation.end_time());
                }
                continue;
            }

            // Rule 2: noise is dropped and leaves the session untouched
            if observation.duration_secs < self.config.noise_threshold_secs
                || observation.duration_secs <= 0.0
            {
                continue;
            }

            let category = self.categories.lookup(&observation.app_id);

            state = match state {
                // Rule 3
                SessionState::NoSession => SessionState::Open(Self::open(observation, category)),
                SessionState::Open(mut session) => {
                    if self.can_merge(&session, observation, category) {
                        // Rule 4
                        session.end_time = session.end_time.max(observation.end_time());
                        session.duration_secs += observation.duration_secs;
                        session.event_count += 1;
                        SessionState::Open(session)
                    } else {
                        // Rule 5
                        sessions.push(Self::close(session)?);
                        SessionState::Open(Self::open(observation, category))
                    }
                }
            };
        }

        if let SessionState::Open(session) = state {
            sessions.push(Self::close(session)?);
        }

        Ok(sessions)
    }

    /// Naive grouping by (time bucket, app, window, category)
    pub fn bucket_fallback(&self, observations: &[ActivityObservation]) -> Vec<WorkSession> {
        let width = i64::from(self.config.fallback_bucket_secs.max(1));
        let mut groups: BTreeMap<(i64, String, String, ContextCategory), WorkSession> =
            BTreeMap::new();

        for observation in observations {
            if observation.is_idle || observation.duration_secs <= 0.0 {
                continue;
            }
            let category = self.categories.lookup(&observation.app_id);
            let bucket = observation.timestamp.timestamp().div_euclid(width);
            let key = (
                bucket,
                observation.app_id.clone(),
                observation.window_title.clone(),
                category,
            );

            groups
                .entry(key)
                .and_modify(|session| {
                    session.start_time = session.start_time.min(observation.timestamp);
                    session.end_time = session.end_time.max(observation.end_time());
                    session.duration_secs += observation.duration_secs;
                    session.event_count += 1;
                })
                .or_insert_with(|| Self::open(observation, category));
        }

        let mut sessions: Vec<WorkSession> = groups
            .into_values()
            .filter(|s| s.end_time > s.start_time)
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }

    fn can_merge(
        &self,
        session: &WorkSession,
        observation: &ActivityObservation,
        category: ContextCategory,
    ) -> bool {
        let gap = duration_to_secs(observation.timestamp - session.end_time);
        session.app_id == observation.app_id
            && session.window_title == observation.window_title
            && gap < self.config.merge_threshold_secs
            && session.category == category
    }

    fn open(observation: &ActivityObservation, category: ContextCategory) -> WorkSession {
        WorkSession {
            start_time: observation.timestamp,
            end_time: observation.end_time(),
            app_id: observation.app_id.clone(),
            window_title: observation.window_title.clone(),
            duration_secs: observation.duration_secs,
            event_count: 1,
            category,
        }
    }

    fn close(session: WorkSession) -> Result<WorkSession, ComputeError> {
        if session.end_time <= session.start_time {
            return Err(ComputeError::SessionizationFault(format!(
                "session for {} ends at {} before it starts at {}",
                session.app_id, session.end_time, session.start_time
            )));
        }
        Ok(session)
    }
}
