//! Insight assembly
//!
//! Combines metrics, recommendations and narrative text into a
//! `PeriodInsight`. Narrative failures never fail the assembly: after the
//! retry policy is exhausted the deterministic template is used.

use crate::config::{NarrativeConfig, PulseConfig};
use crate::error::ComputeError;
use crate::narrative::{
    generate_with_retry, generator_from_config, NarrativeContext, NarrativeGenerator,
    RetryPolicy, TemplateNarrator,
};
use crate::types::{BehavioralMetrics, NarrativeSource, PeriodInsight, Recommendation};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Builds period insights around a narrative generator
#[derive(Clone)]
pub struct InsightAssembler {
    generator: Arc<dyn NarrativeGenerator>,
    config: NarrativeConfig,
    policy: RetryPolicy,
    min_confident_active_secs: f64,
}

impl InsightAssembler {
    pub fn new(
        generator: Arc<dyn NarrativeGenerator>,
        config: NarrativeConfig,
        min_confident_active_secs: f64,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            generator,
            config,
            policy,
            min_confident_active_secs,
        }
    }

    /// Assembler using the generator selected by configuration
    pub fn from_config(config: &PulseConfig) -> Result<Self, ComputeError> {
        Ok(Self::new(
            generator_from_config(&config.narrative)?,
            config.narrative.clone(),
            config.metrics.min_confident_active_secs,
        ))
    }

    /// Override the retry policy derived from configuration
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_low_confidence(&self, metrics: &BehavioralMetrics) -> bool {
        metrics.active_secs < self.min_confident_active_secs
    }

    /// Assemble the insight for one period
    ///
    /// Low-confidence periods get no recommendations and a template
    /// narrative, without calling the generator.
    pub async fn assemble(
        &self,
        metrics: BehavioralMetrics,
        recommendations: Vec<Recommendation>,
    ) -> PeriodInsight {
        let context = NarrativeContext::from_metrics(&metrics);
        let low_confidence = self.is_low_confidence(&metrics);

        let (recommendations, narrative, narrative_source) = if low_confidence {
            tracing::info!(
                period = %metrics.period,
                active_secs = metrics.active_secs,
                "Too little activity, producing low-confidence summary"
            );
            (
                Vec::new(),
                TemplateNarrator::render_low_confidence(&context, self.min_confident_active_secs),
                NarrativeSource::Template,
            )
        } else {
            let (narrative, source) = self.narrate(&context).await;
            (recommendations, narrative, source)
        };

        PeriodInsight {
            insight_id: Uuid::new_v4(),
            period: metrics.period,
            generated_at: Utc::now(),
            metrics,
            recommendations,
            narrative,
            narrative_source,
            low_confidence,
        }
    }

    async fn narrate(&self, context: &NarrativeContext) -> (String, NarrativeSource) {
        if self.generator.is_template() {
            return (TemplateNarrator::render(context), NarrativeSource::Template);
        }

        match generate_with_retry(self.generator.as_ref(), context, &self.config, &self.policy)
            .await
        {
            Ok(text) => (
                text,
                NarrativeSource::Generated {
                    provider: self.generator.name().to_string(),
                },
            ),
            Err(e) => {
                tracing::warn!(
                    provider = self.generator.name(),
                    "Narrative generation failed, using template: {}",
                    e
                );
                (TemplateNarrator::render(context), NarrativeSource::Template)
            }
        }
    }
}
