//! Deterministic template narrative

use super::{NarrativeContext, NarrativeGenerator};
use crate::config::NarrativeConfig;
use crate::error::ComputeError;
use crate::types::format_duration;
use async_trait::async_trait;
use std::fmt::Write;

/// Local narrator interpolating the context into fixed sentences
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

impl TemplateNarrator {
    /// Render the full summary
    pub fn render(context: &NarrativeContext) -> String {
        let mut text = format!(
            "You were active for {} with {:.1}% of that time in focus ({}). Peak focus window: {}.",
            format_duration(context.active_secs),
            context.focus_percentage,
            format_duration(context.focus_secs),
            context.peak_label(),
        );

        let _ = write!(
            text,
            " {} sessions, {} context switches, fragmentation {:.1}/100.",
            context.session_count, context.switch_count, context.fragmentation_score
        );

        if !context.top_apps.is_empty() {
            let apps: Vec<String> = context
                .top_apps
                .iter()
                .map(|app| format!("{} ({})", app.app_id, format_duration(app.duration_secs)))
                .collect();
            let _ = write!(text, " Most used: {}.", apps.join(", "));
        }

        if let Some(comparison) = &context.comparison {
            let _ = write!(
                text,
                " Compared with the previous period: active time {}{}, focus {:+.1} points.",
                if comparison.active_secs_delta < 0.0 { "-" } else { "+" },
                format_duration(comparison.active_secs_delta.abs()),
                comparison.focus_percentage_delta,
            );
        }

        text
    }

    /// Render the minimal summary used when there is too little data
    pub fn render_low_confidence(context: &NarrativeContext, min_active_secs: f64) -> String {
        format!(
            "Not enough activity for a reliable summary: {} active (less than {}), {:.1}% in focus, peak focus window: {}.",
            format_duration(context.active_secs),
            format_duration(min_active_secs),
            context.focus_percentage,
            context.peak_label(),
        )
    }
}

#[async_trait]
impl NarrativeGenerator for TemplateNarrator {
    fn name(&self) -> &str {
        "template"
    }

    fn is_template(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        context: &NarrativeContext,
        _config: &NarrativeConfig,
    ) -> Result<String, ComputeError> {
        Ok(Self::render(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::test_support::make_test_context;
    use crate::types::{AnalysisPeriod, MetricsComparison};

    #[test]
    fn test_render_contains_required_values() {
        let context = make_test_context();
        let text = TemplateNarrator::render(&context);

        assert!(text.contains("5h 05m"));
        assert!(text.contains("39.3%"));
        assert!(text.contains("10:00-11:00"));
        assert!(text.contains("code (2h 30m)"));
        assert!(!text.contains("previous period"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let context = make_test_context();
        assert_eq!(
            TemplateNarrator::render(&context),
            TemplateNarrator::render(&context)
        );
    }

    #[test]
    fn test_render_with_comparison() {
        let mut context = make_test_context();
        context.comparison = Some(MetricsComparison {
            prior_period: AnalysisPeriod {
                start: context.period.start - chrono::Duration::days(1),
                end: context.period.start,
            },
            active_secs_delta: -1_800.0,
            focus_secs_delta: 600.0,
            focus_percentage_delta: 4.25,
            switches_per_hour_delta: -1.0,
            fragmentation_score_delta: -3.0,
        });

        let text = TemplateNarrator::render(&context);
        assert!(text.contains("active time -30m"));
        assert!(text.contains("focus +4.2 points") || text.contains("focus +4.3 points"));
    }

    #[test]
    fn test_low_confidence_without_peak() {
        let mut context = make_test_context();
        context.active_secs = 1_200.0;
        context.focus_percentage = 0.0;
        context.peak_focus_bucket = None;

        let text = TemplateNarrator::render_low_confidence(&context, 3_600.0);
        assert!(text.starts_with("Not enough activity"));
        assert!(text.contains("20m"));
        assert!(text.contains("0.0%"));
        assert!(text.contains("no peak"));
    }

    #[tokio::test]
    async fn test_generator_impl() {
        let context = make_test_context();
        let text = TemplateNarrator
            .generate(&context, &NarrativeConfig::default())
            .await
            .unwrap();
        assert_eq!(text, TemplateNarrator::render(&context));
    }
}
