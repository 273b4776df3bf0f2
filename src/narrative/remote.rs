//! HTTP narrative generator
//!
//! Posts `{model, prompt, context}` to the configured endpoint and expects a
//! JSON body of the form `{"text": "..."}`.

use super::{NarrativeContext, NarrativeGenerator};
use crate::config::NarrativeConfig;
use crate::error::ComputeError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

const PROMPT: &str = "Summarize this person's work period in three or four friendly sentences. \
Quote active time, focus percentage and the peak focus window exactly as given. \
Do not invent figures that are not in the context.";

#[derive(Debug, Serialize)]
struct NarrativeRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    context: &'a NarrativeContext,
}

#[derive(Debug, Deserialize)]
struct NarrativeResponse {
    text: String,
}

/// Narrative generator backed by a remote completion service
pub struct RemoteNarrator {
    http_client: reqwest::Client,
    endpoint: String,
}

impl RemoteNarrator {
    /// Create a narrator from configuration
    ///
    /// Fails if no endpoint is configured or the API key is not a valid header.
    pub fn new(config: &NarrativeConfig) -> Result<Self, ComputeError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| {
                ComputeError::ConfigError("narrative.endpoint is required".to_string())
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| ComputeError::ConfigError(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| {
                ComputeError::ConfigError(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }
}

#[async_trait]
impl NarrativeGenerator for RemoteNarrator {
    fn name(&self) -> &str {
        "remote"
    }

    async fn generate(
        &self,
        context: &NarrativeContext,
        config: &NarrativeConfig,
    ) -> Result<String, ComputeError> {
        let request = NarrativeRequest {
            model: &config.model,
            prompt: PROMPT,
            context,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ComputeError::NarrativeError(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let body: NarrativeResponse = response.json().await.map_err(|e| {
                ComputeError::NarrativeError(format!("unexpected response shape: {}", e))
            })?;
            Ok(body.text)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(ComputeError::NarrativeError(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}
