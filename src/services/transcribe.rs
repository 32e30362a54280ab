use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::ServicesConfig;
use crate::error::{PipelineError, PipelineResult};

/// Transcription client. Uploads a narration segment and returns the SRT
/// content with word-level timestamps produced by the service.
pub struct TranscriptClient {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    srt_content: Option<String>,
}

impl TranscriptClient {
    pub fn new(config: &ServicesConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.media_timeout_seconds))
            .build()
            .map_err(|e| PipelineError::service("transcription", e.to_string()))?;

        Ok(Self {
            endpoint: config.transcription_endpoint.clone(),
            client,
        })
    }

    pub async fn transcribe(&self, audio_path: &Path) -> PipelineResult<String> {
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let bytes = tokio::fs::read(audio_path).await?;
        debug!("Uploading {} ({} bytes) for transcription", file_name, bytes.len());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::service("transcription", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::service(
                "transcription",
                format!("status {status}: {body}"),
            ));
        }

        let parsed: TranscriptResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::service("transcription", e.to_string()))?;

        parsed
            .srt_content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::service("transcription", "empty subtitle content"))
    }
}
