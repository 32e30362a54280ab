use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ServicesConfig;
use crate::error::{PipelineError, PipelineResult};

/// Text-to-speech client. The service answers with base64-encoded waveform
/// data which this client decodes before returning.
pub struct SpeechClient {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
    speed: f32,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    audio_base64: Option<String>,
}

impl SpeechClient {
    pub fn new(config: &ServicesConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.media_timeout_seconds))
            .build()
            .map_err(|e| PipelineError::service("tts", e.to_string()))?;

        Ok(Self {
            endpoint: config.tts_endpoint.clone(),
            client,
        })
    }

    pub async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        language_code: &str,
    ) -> PipelineResult<Vec<u8>> {
        let request = SpeechRequest {
            text,
            voice,
            speed: 1.0,
            language: language_code,
        };

        debug!("Requesting speech synthesis for {} characters", text.len());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::service("tts", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::service(
                "tts",
                format!("status {status}: {body}"),
            ));
        }

        let parsed: SpeechResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::service("tts", e.to_string()))?;

        let encoded = parsed
            .audio_base64
            .ok_or_else(|| PipelineError::service("tts", "no audio data in response"))?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| PipelineError::service("tts", format!("invalid audio payload: {e}")))
    }
}
