use std::time::Duration;
use tracing::info;

use crate::error::PipelineResult;
use crate::imaging;
use crate::pipeline::StageContext;
use crate::retry::with_retries;
use crate::services::ImageGenRequest;

/// Image-service canvases want dimensions in 64-pixel blocks; the exact
/// target is recovered by cropping after download.
pub(crate) fn padded_dimension(value: u32) -> u32 {
    value.div_ceil(64) * 64
}

/// Thumbnail stage: one LLM-written prompt, one generated image, cropped to
/// the exact thumbnail resolution and saved under the sanitized title.
///
/// The whole unit is retried with backoff on top of the per-call retries
/// inside it, mirroring how flaky the image service is in practice.
pub(crate) async fn run(ctx: &StageContext<'_>) -> PipelineResult<()> {
    let max_attempts = ctx.config.pipeline.max_attempts;

    with_retries(ctx.cancel, max_attempts, || generate_once(ctx)).await
}

async fn generate_once(ctx: &StageContext<'_>) -> PipelineResult<()> {
    let max_attempts = ctx.config.pipeline.max_attempts;
    let render = &ctx.config.render;

    info!("Generating thumbnail prompt...");
    let generated = with_retries(ctx.cancel, max_attempts, || {
        ctx.llm.generate(&ctx.job.thumbnail_prompt, None)
    })
    .await?;

    // Persist the prompt for audit before spending an image generation on it.
    tokio::fs::write(ctx.layout.thumbnail_prompt_path(), &generated.text).await?;

    let request = ImageGenRequest::new(
        &generated.text,
        &ctx.job.thumbnail_model,
        padded_dimension(render.thumbnail_width),
        padded_dimension(render.thumbnail_height),
    )
    .with_styles(&ctx.job.thumbnail_styles);

    info!("Requesting thumbnail from image service...");
    let url = with_retries(ctx.cancel, max_attempts, || {
        ctx.image_client.generate(&request)
    })
    .await?;

    let bytes = ctx.image_client.download(&url).await?;

    let thumbnail_path = ctx.layout.thumbnail_path();
    imaging::save_cropped_jpeg(
        &bytes,
        render.thumbnail_width,
        render.thumbnail_height,
        &thumbnail_path,
    )?;
    info!("Saved thumbnail to {}", thumbnail_path.display());

    // Rate-limit headroom for the image service.
    tokio::time::sleep(Duration::from_millis(ctx.config.pipeline.rate_limit_pause_ms)).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_dimension_rounds_up_to_64() {
        assert_eq!(padded_dimension(720), 768);
        assert_eq!(padded_dimension(1080), 1088);
        assert_eq!(padded_dimension(1280), 1280);
        assert_eq!(padded_dimension(1920), 1920);
        assert_eq!(padded_dimension(1), 64);
    }
}
