use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::PipelineResult;
use crate::media::encoder::{concat_audio_args, concat_list_content, transcode_mp3_args};
use crate::pipeline::StageContext;
use crate::subtitle::{self, SegmentCues};

const AUDIO_CONCAT_TIMEOUT: Duration = Duration::from_secs(450);
const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(360);

/// Merged narration track plus its probed duration, which the assembly stage
/// needs to size the closing overlay loop.
pub(crate) struct MergedNarration {
    pub audio_path: PathBuf,
    pub duration: Duration,
}

/// Merge stage: concatenate the narration segments into one compressed track
/// and fold the per-segment subtitles into a single re-timed file.
pub(crate) async fn run(
    ctx: &StageContext<'_>,
    segment_count: usize,
) -> PipelineResult<MergedNarration> {
    ctx.cancel.ensure_active()?;

    // Waveform concat via the encoder's list-file input format.
    info!("Merging {} narration segments...", segment_count);
    let audio_paths: Vec<PathBuf> = (1..=segment_count)
        .map(|i| absolute(ctx.layout.audio_path(i)))
        .collect();
    let list_path = ctx.work.file("audios.txt");
    tokio::fs::write(&list_path, concat_list_content(&audio_paths)).await?;

    let merged_wav = ctx.work.file("merged_audio.wav");
    ctx.encoder
        .run_expecting(
            "concatenating narration segments",
            &concat_audio_args(&list_path, &merged_wav),
            AUDIO_CONCAT_TIMEOUT,
            &merged_wav,
        )
        .await?;
    ctx.events.progress(63);

    info!("Transcoding merged narration...");
    let merged_mp3 = ctx.work.file("merged_audio.mp3");
    ctx.encoder
        .run_expecting(
            "transcoding merged narration",
            &transcode_mp3_args(
                &merged_wav,
                &merged_mp3,
                &ctx.config.render.audio_bitrate,
                ctx.config.render.audio_sample_rate,
            ),
            TRANSCODE_TIMEOUT,
            &merged_mp3,
        )
        .await?;
    ctx.events.progress(64);

    // Subtitle merge: shift every segment's cues by the total audio duration
    // before it. Segment order is index order; nothing here may reorder.
    info!("📝 Merging subtitle segments...");
    let mut segments = Vec::with_capacity(segment_count);
    for i in 1..=segment_count {
        ctx.cancel.ensure_active()?;

        let subtitle_path = ctx.layout.segment_subtitle_path(i);
        let entries = if subtitle_path.exists() {
            let content = tokio::fs::read_to_string(&subtitle_path).await?;
            Some(subtitle::parse(&content)?)
        } else {
            warn!("Missing subtitle segment: {}", subtitle_path.display());
            None
        };

        let audio_duration = ctx.encoder.probe_duration(&ctx.layout.audio_path(i)).await?;
        segments.push(SegmentCues {
            entries,
            audio_duration,
        });
    }

    let merged = subtitle::merge_segments(&segments);
    tokio::fs::write(ctx.layout.merged_subtitle_path(), subtitle::render(&merged)).await?;
    ctx.events.progress(65);

    let duration = ctx.encoder.probe_duration(&merged_mp3).await?;
    info!("Total narration duration: {:.2}s", duration.as_secs_f64());

    Ok(MergedNarration {
        audio_path: merged_mp3,
        duration,
    })
}

/// Concat list entries must be absolute so the encoder resolves them
/// independently of its own working directory.
fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}
