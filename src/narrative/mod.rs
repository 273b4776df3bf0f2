//! Narrative text generation
//!
//! A `NarrativeGenerator` turns the structured period context into prose.
//! Two implementations exist: `RemoteNarrator` calls an HTTP completion
//! endpoint, `TemplateNarrator` renders locally with no external calls.
//! Which one runs is decided by `NarrativeConfig::provider`.

mod remote;
mod template;

pub use remote::*;
pub use template::*;

use crate::config::{NarrativeConfig, NarrativeProvider};
use crate::error::ComputeError;
use crate::types::{AnalysisPeriod, AppUsage, BehavioralMetrics, MetricsComparison, TimeBucket};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Structured context handed to a narrative generator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeContext {
    pub period: AnalysisPeriod,
    pub active_secs: f64,
    pub focus_secs: f64,
    pub focus_percentage: f64,
    pub session_count: u32,
    pub switch_count: u32,
    pub fragmentation_score: f64,
    pub top_apps: Vec<AppUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_focus_bucket: Option<TimeBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<MetricsComparison>,
}

impl NarrativeContext {
    pub fn from_metrics(metrics: &BehavioralMetrics) -> Self {
        Self {
            period: metrics.period,
            active_secs: metrics.active_secs,
            focus_secs: metrics.focus_secs,
            focus_percentage: metrics.focus_percentage,
            session_count: metrics.session_count,
            switch_count: metrics.switch_count,
            fragmentation_score: metrics.fragmentation_score,
            top_apps: metrics.top_apps.clone(),
            peak_focus_bucket: metrics.peak_focus_bucket.clone(),
            comparison: metrics.comparison.clone(),
        }
    }

    /// Peak bucket label, or `no peak` when the period had no focus time
    pub fn peak_label(&self) -> String {
        self.peak_focus_bucket
            .as_ref()
            .map(TimeBucket::label)
            .unwrap_or_else(|| "no peak".to_string())
    }
}

/// Capability interface for producing narrative text
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Provider name recorded on the insight
    fn name(&self) -> &str;

    /// Whether this generator renders locally without external calls
    fn is_template(&self) -> bool {
        false
    }

    /// Produce narrative text for the given context
    async fn generate(
        &self,
        context: &NarrativeContext,
        config: &NarrativeConfig,
    ) -> Result<String, ComputeError>;
}

/// Build the generator selected by configuration
pub fn generator_from_config(
    config: &NarrativeConfig,
) -> Result<Arc<dyn NarrativeGenerator>, ComputeError> {
    match config.provider {
        NarrativeProvider::Template => Ok(Arc::new(TemplateNarrator)),
        NarrativeProvider::Remote => Ok(Arc::new(RemoteNarrator::new(config)?)),
    }
}

/// Timeout and backoff settings for generator calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Bound on each individual attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NarrativeConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Call `generator` under `policy`, validating every response
///
/// Failed, timed-out and structurally invalid attempts are retried with
/// doubling delays. The last error is returned once attempts run out.
pub async fn generate_with_retry(
    generator: &dyn NarrativeGenerator,
    context: &NarrativeContext,
    config: &NarrativeConfig,
    policy: &RetryPolicy,
) -> Result<String, ComputeError> {
    let mut last_error = None;
    let mut delay = policy.initial_backoff;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tracing::debug!(
                "Retrying narrative generation (attempt {}/{}), waiting {:?}",
                attempt + 1,
                policy.max_retries + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, policy.max_backoff);
        }

        let outcome = match tokio::time::timeout(policy.timeout, generator.generate(context, config))
            .await
        {
            Ok(Ok(text)) => validate_text(&text, config.max_chars),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ComputeError::NarrativeError(format!(
                "{} timed out after {:?}",
                generator.name(),
                policy.timeout
            ))),
        };

        match outcome {
            Ok(text) => return Ok(text),
            Err(e) => {
                tracing::warn!(provider = generator.name(), "Narrative attempt failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| ComputeError::NarrativeError("max retries exceeded".to_string())))
}

/// Structural checks on generated text
pub fn validate_text(text: &str, max_chars: usize) -> Result<String, ComputeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ComputeError::NarrativeError("empty narrative".to_string()));
    }
    let chars = trimmed.chars().count();
    if chars > max_chars {
        return Err(ComputeError::NarrativeError(format!(
            "narrative has {chars} characters, limit is {max_chars}"
        )));
    }
    if trimmed
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t')
    {
        return Err(ComputeError::NarrativeError(
            "narrative contains control characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::ContextCategory;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    pub fn make_test_context() -> NarrativeContext {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        NarrativeContext {
            period: AnalysisPeriod::new(start, start + Duration::days(1)).unwrap(),
            active_secs: 18_300.0,
            focus_secs: 7_200.0,
            focus_percentage: 39.344,
            session_count: 42,
            switch_count: 31,
            fragmentation_score: 55.5,
            top_apps: vec![AppUsage {
                app_id: "code".to_string(),
                category: ContextCategory::Development,
                duration_secs: 9_000.0,
                session_count: 12,
                share_pct: 49.18,
            }],
            peak_focus_bucket: Some(TimeBucket {
                index: 10,
                width_secs: 3600,
                focus_secs: 3000.0,
            }),
            comparison: None,
        }
    }

    /// Generator returning scripted results and counting calls
    pub struct ScriptedNarrator {
        pub responses: Vec<Result<String, String>>,
        pub delay: Option<std::time::Duration>,
        pub calls: AtomicU32,
    }

    impl ScriptedNarrator {
        pub fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses,
                delay: None,
                calls: AtomicU32::new(0),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NarrativeGenerator for ScriptedNarrator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _context: &NarrativeContext,
            _config: &NarrativeConfig,
        ) -> Result<String, ComputeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let response = self
                .responses
                .get(n)
                .or_else(|| self.responses.last())
                .cloned()
                .unwrap_or_else(|| Err("no response scripted".to_string()));
            response.map_err(ComputeError::NarrativeError)
        }
    }

    pub fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: std::time::Duration::from_millis(200),
            max_retries: 2,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_validate_text() {
        assert_eq!(validate_text("  Good day.\n", 100).unwrap(), "Good day.");
        assert!(validate_text("   ", 100).is_err());
        assert!(validate_text("abcdef", 5).is_err());
        assert!(validate_text("bad\u{0}byte", 100).is_err());
        assert!(validate_text("line one\nline two", 100).is_ok());
    }

    #[test]
    fn test_peak_label() {
        let mut context = make_test_context();
        assert_eq!(context.peak_label(), "10:00-11:00");
        context.peak_focus_bucket = None;
        assert_eq!(context.peak_label(), "no peak");
    }

    #[test]
    fn test_generator_selected_by_config() {
        let generator = generator_from_config(&NarrativeConfig::default()).unwrap();
        assert_eq!(generator.name(), "template");

        let config = NarrativeConfig {
            provider: NarrativeProvider::Remote,
            endpoint: Some("http://localhost:9/v1/narrative".to_string()),
            ..Default::default()
        };
        assert_eq!(generator_from_config(&config).unwrap().name(), "remote");
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let narrator = ScriptedNarrator::new(vec![
            Err("503".to_string()),
            Ok("   ".to_string()),
            Ok("A focused day.".to_string()),
        ]);
        let text = generate_with_retry(
            &narrator,
            &make_test_context(),
            &NarrativeConfig::default(),
            &fast_policy(),
        )
        .await
        .unwrap();

        assert_eq!(text, "A focused day.");
        assert_eq!(narrator.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let narrator = ScriptedNarrator::new(vec![Err("down".to_string())]);
        let result = generate_with_retry(
            &narrator,
            &make_test_context(),
            &NarrativeConfig::default(),
            &fast_policy(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(narrator.calls(), 3);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let mut narrator = ScriptedNarrator::new(vec![Ok("late".to_string())]);
        narrator.delay = Some(std::time::Duration::from_secs(5));
        let policy = RetryPolicy {
            timeout: std::time::Duration::from_millis(20),
            max_retries: 1,
            ..fast_policy()
        };

        let result = generate_with_retry(
            &narrator,
            &make_test_context(),
            &NarrativeConfig::default(),
            &policy,
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(narrator.calls(), 2);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryPolicy::from_config(&NarrativeConfig::default());
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(8));
    }
}
