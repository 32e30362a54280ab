use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::media::encoder::{
    concat_ts_args, ensure_output, extend_loop_args, final_mux_args, particle_overlay_args,
    remux_ts_args, static_clip_args, zoom_clip_args, ZoomPreset,
};
use crate::monitor::ResourceMonitor;
use crate::pipeline::merge::MergedNarration;
use crate::pipeline::StageContext;

/// Seconds each body image stays on screen.
const CLIP_SECONDS: u32 = 4;

const ZOOM_TIMEOUT: Duration = Duration::from_secs(180);
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(60);
const OVERLAY_TIMEOUT: Duration = Duration::from_secs(450);
const EXTEND_TIMEOUT: Duration = Duration::from_secs(300);
const REMUX_TIMEOUT: Duration = Duration::from_secs(300);
const CONCAT_TIMEOUT: Duration = Duration::from_secs(1200);
const MUX_TIMEOUT: Duration = Duration::from_secs(2400);

/// Assembly stage: motion clips for every body image, the particle-overlay
/// treatment for the closing image, lossless concatenation through transport
/// streams, then the final mux with narration, subtitles and optional music.
///
/// Reads only from the images and voice-over directories, writes deliverables
/// only into main; everything else lives in the work directory.
pub(crate) async fn run(
    ctx: &StageContext<'_>,
    narration: &MergedNarration,
    image_count: usize,
) -> PipelineResult<()> {
    let render = &ctx.config.render;
    let mut monitor = ResourceMonitor::new();
    monitor.warn_if_constrained();

    let mut clips: Vec<PathBuf> = Vec::with_capacity(image_count);

    for idx in 1..=image_count {
        ctx.cancel.ensure_active()?;

        // The encoder-heavy stretch; keep an eye on host pressure.
        if idx % 3 == 0 {
            monitor.warn_if_constrained();
        }

        let image = ctx.layout.image_path(idx);
        ensure_output(&image)?;

        if idx < image_count {
            let out = ctx.work.file(&format!("zoom{idx}.mp4"));
            let preset = ZoomPreset::random();
            info!(
                "Processing image {}/{} - rendering {:?} motion clip...",
                idx, image_count, preset
            );

            let args = zoom_clip_args(
                &image,
                &out,
                preset,
                render.encoder_threads,
                CLIP_SECONDS,
                render.video_width,
                render.video_height,
            );
            match ctx.encoder.run("rendering motion clip", &args, ZOOM_TIMEOUT).await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err @ PipelineError::Encoder { .. })
                | Err(err @ PipelineError::EncoderTimeout { .. }) => {
                    // The motion filter is the most fragile encoder path;
                    // a static clip beats a dead job.
                    warn!(
                        "Motion clip failed for image {} ({}); falling back to static clip",
                        idx, err
                    );
                    let fallback = static_clip_args(
                        &image,
                        &out,
                        render.encoder_threads.min(2),
                        CLIP_SECONDS,
                        render.video_width,
                        render.video_height,
                    );
                    ctx.encoder
                        .run("rendering static fallback clip", &fallback, FALLBACK_TIMEOUT)
                        .await?;
                }
                Err(err) => return Err(err),
            }
            ensure_output(&out)?;
            clips.push(out);
        } else {
            clips.push(closing_clip(ctx, &image, narration).await?);
        }

        ctx.events
            .progress(65 + (idx as f64 / image_count as f64 * 25.0) as u8);
    }

    info!("Converting clips to transport stream format...");
    let mut ts_clips: Vec<PathBuf> = Vec::with_capacity(clips.len());
    for (i, clip) in clips.iter().enumerate() {
        ctx.cancel.ensure_active()?;
        info!("Converting clip {}/{} to transport stream...", i + 1, clips.len());

        let ts = clip.with_extension("ts");
        ctx.encoder
            .run_expecting(
                "remuxing clip to transport stream",
                &remux_ts_args(clip, &ts),
                REMUX_TIMEOUT,
                &ts,
            )
            .await?;
        ts_clips.push(ts);

        ctx.events
            .progress(90 + ((i + 1) as f64 / clips.len() as f64 * 5.0) as u8);
    }

    info!("Concatenating video clips...");
    let slideshow = ctx.work.file("slideshow.mp4");
    ctx.encoder
        .run_expecting(
            "concatenating slideshow clips",
            &concat_ts_args(&ts_clips, &slideshow),
            CONCAT_TIMEOUT,
            &slideshow,
        )
        .await?;
    ctx.events.progress(95);

    info!("Combining video with narration and subtitles...");
    let subtitle = ctx.layout.merged_subtitle_path();
    ensure_output(&subtitle)?;
    ensure_output(&narration.audio_path)?;

    let music = match &ctx.job.background_music {
        Some(path) if path.exists() => Some((path.as_path(), render.music_volume)),
        Some(path) => {
            warn!(
                "Background music file not found, proceeding without it: {}",
                path.display()
            );
            None
        }
        None => None,
    };

    let final_path = ctx.layout.final_video_path();
    let args = final_mux_args(
        &slideshow,
        &narration.audio_path,
        &subtitle,
        ctx.job.language.subtitle_font(),
        render.subtitle_font_size,
        music,
        &final_path,
    );
    ctx.encoder
        .run_expecting("muxing final video", &args, MUX_TIMEOUT, &final_path)
        .await?;
    ctx.events.progress(100);

    info!("Video assembly completed: {}", final_path.display());
    Ok(())
}

/// The closing image gets the looping particle overlay instead of motion,
/// extended to cover the full narration.
async fn closing_clip(
    ctx: &StageContext<'_>,
    image: &std::path::Path,
    narration: &MergedNarration,
) -> PipelineResult<PathBuf> {
    let render = &ctx.config.render;
    let particles = &render.particles_path;
    if !particles.exists() {
        return Err(PipelineError::validation(format!(
            "particle overlay clip not found: {}",
            particles.display()
        )));
    }

    info!("Applying particle overlay to closing image...");
    let overlay = ctx.work.file("last_with_particles.mp4");
    ctx.encoder
        .run_expecting(
            "compositing particle overlay",
            &particle_overlay_args(
                image,
                particles,
                &overlay,
                render.video_width,
                render.video_height,
            ),
            OVERLAY_TIMEOUT,
            &overlay,
        )
        .await?;

    let overlay_duration = ctx.encoder.probe_duration(&overlay).await?;
    if overlay_duration.is_zero() {
        return Err(PipelineError::validation(
            "particle overlay clip has zero duration",
        ));
    }
    let loops = (narration.duration.as_secs_f64() / overlay_duration.as_secs_f64()).ceil() as u32;

    let extended = ctx.work.file("extended_last_with_particles.mp4");
    ctx.encoder
        .run_expecting(
            "extending particle overlay loop",
            &extend_loop_args(&overlay, loops, &extended),
            EXTEND_TIMEOUT,
            &extended,
        )
        .await?;

    Ok(extended)
}
