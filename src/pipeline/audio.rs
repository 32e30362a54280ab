use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{missing_indexed_files, StageContext};
use crate::retry::with_retries;
use crate::text;

/// Audio stage: chunk the script for narration (deliberately independent of
/// the image chunking), synthesize each segment, and transcribe it for
/// word-level subtitle timing.
///
/// Audio files are mandatory for every index. Per-segment subtitles are
/// best-effort: a missing one degrades that segment to coarser timing at
/// merge time, it does not fail the stage.
pub(crate) async fn run(ctx: &StageContext<'_>, script: &str) -> PipelineResult<usize> {
    let chunks = text::chunk(script, -1, ctx.job.audio_word_limit);
    if chunks.is_empty() {
        return Err(PipelineError::validation(
            "script produced no narration chunks",
        ));
    }

    info!(
        "🎵 Split into {} narration chunks (word limit {})",
        chunks.len(),
        ctx.job.audio_word_limit
    );
    for (i, chunk) in chunks.iter().take(3).enumerate() {
        debug!("   Narration chunk {}: {:.100}", i + 1, chunk);
    }

    let total = chunks.len();
    let batch_size = ctx.config.pipeline.audio_batch_size;
    let completed = Arc::new(AtomicUsize::new(0));
    let mut failures: Vec<usize> = Vec::new();

    for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
        ctx.cancel.ensure_active()?;

        let offset = batch_number * batch_size;
        let results = join_all(batch.iter().enumerate().map(|(i, chunk)| {
            let index = offset + i;
            let completed = Arc::clone(&completed);
            async move {
                (
                    index,
                    generate_segment(ctx, index, chunk, &completed, total).await,
                )
            }
        }))
        .await;

        for (index, result) in results {
            match result {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => return Err(PipelineError::Cancelled),
                Err(err) => {
                    error!("Audio {} generation failed: {}", index + 1, err);
                    failures.push(index + 1);
                }
            }
        }
    }

    if !failures.is_empty() {
        failures.sort_unstable();
        return Err(PipelineError::IncompleteStage {
            artifact: "audio",
            indices: failures,
        });
    }

    let missing = missing_indexed_files((1..=total).map(|i| ctx.layout.audio_path(i)));
    if !missing.is_empty() {
        return Err(PipelineError::IncompleteStage {
            artifact: "audio",
            indices: missing,
        });
    }

    info!("✅ Generated {} narration segments", total);
    Ok(total)
}

/// One segment: synthesize, save, then transcribe best-effort. The completed
/// counter feeds stage progress from whichever worker finishes next.
async fn generate_segment(
    ctx: &StageContext<'_>,
    index: usize,
    chunk: &str,
    completed: &AtomicUsize,
    total: usize,
) -> PipelineResult<()> {
    let max_attempts = ctx.config.pipeline.max_attempts;

    with_retries(ctx.cancel, max_attempts, || async move {
        let audio = with_retries(ctx.cancel, max_attempts, || {
            ctx.tts
                .synthesize(chunk, ctx.job.voice_id(), ctx.job.language.code())
        })
        .await?;

        let audio_path = ctx.layout.audio_path(index + 1);
        tokio::fs::write(&audio_path, &audio).await?;
        debug!("🎵 Saved narration segment {}", index + 1);

        // Best-effort word-level subtitles; segment audio stands on its own.
        match ctx.transcriber.transcribe(&audio_path).await {
            Ok(srt_content) => {
                tokio::fs::write(ctx.layout.segment_subtitle_path(index + 1), srt_content)
                    .await?;
                debug!("Generated transcription for segment {}", index + 1);
            }
            Err(err) => {
                warn!("Transcription failed for segment {}: {}", index + 1, err);
            }
        }

        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.events
            .progress(45 + (done as f64 / total as f64 * 17.0) as u8);
        Ok(())
    })
    .await
}
