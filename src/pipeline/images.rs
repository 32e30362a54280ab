use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::{PipelineError, PipelineResult};
use crate::imaging;
use crate::pipeline::thumbnail::padded_dimension;
use crate::pipeline::{missing_indexed_files, StageContext};
use crate::retry::with_retries;
use crate::services::ImageGenRequest;
use crate::text;

/// Images stage: chunk the script, then generate one image per chunk in
/// fixed-size batches. Outputs keep their chunk index regardless of the order
/// generations finish in.
///
/// Returns the number of body images actually produced; the chunker may pack
/// the script into fewer chunks than the job requested.
pub(crate) async fn run(ctx: &StageContext<'_>, script: &str) -> PipelineResult<usize> {
    let chunks = text::chunk(
        script,
        ctx.job.image_count as i32,
        ctx.job.image_word_limit,
    );
    if chunks.is_empty() {
        return Err(PipelineError::validation(
            "script produced no image chunks",
        ));
    }

    info!("📝 Script length: {} characters", script.len());
    info!(
        "🖼️ Split into {} image chunks (requested {})",
        chunks.len(),
        ctx.job.image_count
    );
    for (i, chunk) in chunks.iter().take(3).enumerate() {
        debug!("   Chunk {}: {:.100}", i + 1, chunk);
    }

    let render = &ctx.config.render;
    let width = padded_dimension(render.video_width);
    let height = padded_dimension(render.video_height);

    let total = chunks.len();
    let batch_size = ctx.config.pipeline.image_batch_size;
    let batch_pause = Duration::from_millis(ctx.config.pipeline.batch_pause_ms);
    let mut failures: Vec<usize> = Vec::new();

    for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
        // Cancellation boundary: no new batch is dispatched once cancelled.
        ctx.cancel.ensure_active()?;

        let offset = batch_number * batch_size;
        let results = join_all(batch.iter().enumerate().map(|(i, chunk)| {
            let index = offset + i;
            async move { (index, generate_single(ctx, index, chunk, width, height).await) }
        }))
        .await;

        for (index, result) in results {
            match result {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => return Err(PipelineError::Cancelled),
                Err(err) => {
                    error!("Image {} generation failed: {}", index + 1, err);
                    failures.push(index + 1);
                }
            }
        }

        let done = (offset + batch.len()).min(total);
        ctx.events
            .progress(25 + (done as f64 / total as f64 * 20.0) as u8);
        tokio::time::sleep(batch_pause).await;
    }

    if !failures.is_empty() {
        failures.sort_unstable();
        return Err(PipelineError::IncompleteStage {
            artifact: "image",
            indices: failures,
        });
    }

    // Belt-level completeness check against the disk; a gap here means a
    // partial image set that assembly must never see.
    let missing = missing_indexed_files((1..=total).map(|i| ctx.layout.image_path(i)));
    if !missing.is_empty() {
        return Err(PipelineError::IncompleteStage {
            artifact: "image",
            indices: missing,
        });
    }

    info!("✅ Generated {} images", total);
    Ok(total)
}

/// One chunk: LLM prompt, audit copy, generation, download, crop, save.
/// The whole unit retries with backoff around the per-call retries inside.
async fn generate_single(
    ctx: &StageContext<'_>,
    index: usize,
    chunk: &str,
    width: u32,
    height: u32,
) -> PipelineResult<()> {
    let max_attempts = ctx.config.pipeline.max_attempts;

    with_retries(ctx.cancel, max_attempts, || async move {
        let chunk_prompt = ctx.job.images_prompt.replace("$chunk", chunk);

        info!("Generating image prompt {}...", index + 1);
        let generated = with_retries(ctx.cancel, max_attempts, || {
            ctx.llm.generate(&chunk_prompt, None)
        })
        .await?;

        tokio::fs::write(ctx.layout.image_prompt_path(index + 1), &generated.text).await?;

        let request = ImageGenRequest::new(&generated.text, &ctx.job.image_model, width, height)
            .with_styles(&ctx.job.image_styles);

        info!("Generating image {}...", index + 1);
        let url = with_retries(ctx.cancel, max_attempts, || {
            ctx.image_client.generate(&request)
        })
        .await?;

        let bytes = ctx.image_client.download(&url).await?;
        imaging::save_cropped_jpeg(
            &bytes,
            ctx.config.render.video_width,
            ctx.config.render.video_height,
            &ctx.layout.image_path(index + 1),
        )?;

        tokio::time::sleep(Duration::from_millis(ctx.config.pipeline.rate_limit_pause_ms)).await;
        Ok(())
    })
    .await
}
