use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ServicesConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::job::StyleWeight;

/// Negative prompt applied to every generation request.
pub const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted";

/// One image-generation request.
#[derive(Debug, Clone, Serialize)]
pub struct ImageGenRequest {
    pub positive_prompt: String,
    pub model: String,
    pub num_results: u32,
    pub width: u32,
    pub height: u32,
    pub negative_prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub styles: Vec<StyleWeight>,
}

impl ImageGenRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            positive_prompt: prompt.into(),
            model: model.into(),
            num_results: 1,
            width,
            height,
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            styles: Vec::new(),
        }
    }

    pub fn with_styles(mut self, styles: &[StyleWeight]) -> Self {
        self.styles = styles.to_vec();
        self
    }
}

#[derive(Debug, Deserialize)]
struct ImageGenResponse {
    success: bool,
    #[serde(default)]
    images: Vec<String>,
    message: Option<String>,
}

/// Image-generation service client. The service returns URLs; only the first
/// result is ever downloaded.
pub struct ImageClient {
    endpoint: String,
    client: reqwest::Client,
}

impl ImageClient {
    pub fn new(config: &ServicesConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.media_timeout_seconds))
            .build()
            .map_err(|e| PipelineError::service("image", e.to_string()))?;

        Ok(Self {
            endpoint: config.image_endpoint.clone(),
            client,
        })
    }

    /// Submit a generation request and return the URL of the first result.
    pub async fn generate(&self, request: &ImageGenRequest) -> PipelineResult<String> {
        debug!(
            "Requesting {}x{} image from {}",
            request.width, request.height, self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::service("image", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::service(
                "image",
                format!("status {status}: {body}"),
            ));
        }

        let parsed: ImageGenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::service("image", e.to_string()))?;

        if !parsed.success {
            return Err(PipelineError::service(
                "image",
                parsed.message.unwrap_or_else(|| "unknown failure".to_string()),
            ));
        }

        parsed
            .images
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::service("image", "no images returned"))
    }

    /// Download a generated image.
    pub async fn download(&self, url: &str) -> PipelineResult<Vec<u8>> {
        info!("Downloading image from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::service("image", e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::service(
                "image",
                format!("download failed with status {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::service("image", e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_skips_empty_styles() {
        let request = ImageGenRequest::new("a calm lake", "model:1@1", 1920, 1088);
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("styles"));
        assert!(json.contains("\"negative_prompt\":\"blurry, low quality, distorted\""));
    }

    #[test]
    fn test_request_serialization_includes_styles() {
        let request = ImageGenRequest::new("a calm lake", "model:1@1", 1920, 1088).with_styles(&[
            StyleWeight {
                id: "style:7@1".to_string(),
                weight: -1.5,
            },
        ]);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("style:7@1"));
        assert!(json.contains("-1.5"));
    }
}
