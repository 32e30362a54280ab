use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ServicesConfig;
use crate::error::{PipelineError, PipelineResult};

/// One generated completion plus the linkage id a follow-up call can pass to
/// keep conversational context.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub text: String,
    pub response_id: Option<String>,
}

/// Seam for the script-writing model. The pipeline only ever sees this trait;
/// tests drive the script stage with a stub implementation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        previous_response_id: Option<&str>,
    ) -> PipelineResult<GeneratedText>;
}

/// HTTP text-generation client.
pub struct HttpTextGenerator {
    endpoint: String,
    model: String,
    max_output_tokens: u32,
    temperature: f32,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    text: Option<String>,
    response_id: Option<String>,
    error: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(config: &ServicesConfig, api_key: &str) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_seconds))
            .build()
            .map_err(|e| PipelineError::service("llm", e.to_string()))?;

        Ok(Self {
            endpoint: config.llm_endpoint.clone(),
            model: config.llm_model.clone(),
            max_output_tokens: config.llm_max_output_tokens,
            temperature: config.llm_temperature,
            api_key: api_key.to_string(),
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(
        &self,
        prompt: &str,
        previous_response_id: Option<&str>,
    ) -> PipelineResult<GeneratedText> {
        let request = TextRequest {
            model: &self.model,
            prompt,
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            previous_response_id,
        };

        debug!("Sending text-generation request to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::service("llm", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::service(
                "llm",
                format!("status {status}: {body}"),
            ));
        }

        let parsed: TextResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::service("llm", e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(PipelineError::service("llm", error));
        }

        let text = parsed
            .text
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::service("llm", "empty completion"))?;

        Ok(GeneratedText {
            text,
            response_id: parsed.response_id,
        })
    }
}
