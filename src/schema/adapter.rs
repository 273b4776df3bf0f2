//! Parsing and batch validation for raw observations
//!
//! Syntax errors (a line that is not JSON at all) fail the parse with the
//! offending line number. Semantic problems are left for the normalizer.

use crate::error::ComputeError;
use crate::schema::raw_observation::*;

/// Adapter for reading raw observation batches
pub struct ObservationAdapter;

impl ObservationAdapter {
    /// Parse a JSON string containing an array of RawObservations
    pub fn parse_array(json: &str) -> Result<Vec<RawObservation>, ComputeError> {
        let observations: Vec<RawObservation> = serde_json::from_str(json)?;
        Ok(observations)
    }

    /// Parse NDJSON (newline-delimited JSON) containing RawObservations
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawObservation>, ComputeError> {
        let mut observations = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawObservation>(trimmed) {
                Ok(observation) => observations.push(observation),
                Err(e) => {
                    return Err(ComputeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(observations)
    }

    /// Validate a batch of observations, returning only the failures
    pub fn validate_observations(observations: &[RawObservation]) -> Vec<ValidationResult> {
        observations
            .iter()
            .enumerate()
            .filter_map(|(idx, observation)| {
                observation.validate().err().map(|error| ValidationResult {
                    index: idx,
                    observation_id: observation.observation_id.clone(),
                    error,
                })
            })
            .collect()
    }
}

/// A failed observation validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub observation_id: Option<String>,
    pub error: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn create_test_observations() -> Vec<RawObservation> {
        let timestamp = "2024-01-15T08:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut broken = RawObservation::active("slack", "#general", timestamp, 30.0);
        broken.duration_secs = Some(-4.0);

        vec![
            RawObservation::active("code", "lib.rs", timestamp, 120.0),
            broken,
            RawObservation::idle(timestamp, 600.0),
        ]
    }

    #[test]
    fn test_parse_ndjson() {
        let ndjson = r#"{"app_id":"code","window_title":"lib.rs","timestamp":"2024-01-15T08:00:00Z","duration_secs":40.0}

{"app_id":"code","window_title":"lib.rs","timestamp":"2024-01-15T08:00:40Z","duration_secs":50.0,"is_idle":false}"#;

        let observations = ObservationAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[1].duration_secs, Some(50.0));
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let ndjson = "{\"app_id\":\"code\"}\nnot json";
        let err = ObservationAdapter::parse_ndjson(ndjson).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_array() {
        let json = r#"[{"app_id":"figma","timestamp":"2024-01-15T08:00:00Z","duration_secs":60}]"#;
        let observations = ObservationAdapter::parse_array(json).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].app_id.as_deref(), Some("figma"));
    }

    #[test]
    fn test_validate_observations() {
        let observations = create_test_observations();
        let results = ObservationAdapter::validate_observations(&observations);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 1);
        assert_eq!(results[0].error, ValidationError::NegativeDuration(-4.0));
    }
}
