use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{PipelineError, PipelineResult};
use crate::media::registry::ProcessRegistry;
use crate::retry::CancelFlag;

/// Zoom-pan speed per frame.
const ZOOM_SPEED: &str = "0.001";
/// Oversized intermediate canvas; zoompan needs headroom to pan without
/// sub-pixel jitter at the target resolution.
const ZOOM_CANVAS: &str = "8000x4500";
/// Frames per rendered zoom clip (4 seconds at 30 fps).
const ZOOM_FRAMES: u32 = 120;
const ZOOM_FPS: u32 = 30;

/// How often the subprocess wait loop wakes to check cancellation.
const WAIT_POLL: Duration = Duration::from_millis(250);
/// Stderr tail kept for encoder failure diagnostics.
const STDERR_TAIL: usize = 2000;

/// Runs external-encoder commands with process tracking, cancellation checks
/// and a wall-clock timeout per invocation.
pub struct EncoderRunner {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    registry: Arc<ProcessRegistry>,
    cancel: CancelFlag,
}

impl EncoderRunner {
    /// Resolve the encoder binaries up front; a missing encoder is a
    /// validation failure before any stage runs.
    pub fn new(registry: Arc<ProcessRegistry>, cancel: CancelFlag) -> PipelineResult<Self> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| {
            PipelineError::validation("ffmpeg not found; install it and ensure it is in PATH")
        })?;
        let ffprobe = which::which("ffprobe").map_err(|_| {
            PipelineError::validation("ffprobe not found; install it and ensure it is in PATH")
        })?;
        Ok(Self {
            ffmpeg,
            ffprobe,
            registry,
            cancel,
        })
    }

    pub(crate) fn ffprobe_path(&self) -> &Path {
        &self.ffprobe
    }

    pub(crate) fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Run one encoder invocation to completion.
    ///
    /// The spawned process is registered for coordinated termination, polled
    /// with cancellation checks, and killed when it exceeds `timeout`. A
    /// non-zero exit becomes an `Encoder` error carrying the stderr tail.
    pub async fn run(&self, context: &str, args: &[String], timeout: Duration) -> PipelineResult<()> {
        self.cancel.ensure_active()?;
        debug!("Running encoder: {} ({} args)", context, args.len());

        let mut child = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id().unwrap_or_default();
        self.registry.track(pid);

        // Drain stderr concurrently so a chatty encoder cannot fill the pipe
        // and stall against an un-read buffer.
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let deadline = tokio::time::Instant::now() + timeout;
        let status = loop {
            if self.cancel.is_cancelled() {
                let _ = child.start_kill();
                let _ = child.wait().await;
                self.registry.untrack(pid);
                return Err(PipelineError::Cancelled);
            }

            match tokio::time::timeout(WAIT_POLL, child.wait()).await {
                Ok(status) => break status,
                Err(_) if tokio::time::Instant::now() >= deadline => {
                    error!("Encoder timed out while {} ({}s)", context, timeout.as_secs());
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    self.registry.untrack(pid);
                    return Err(PipelineError::EncoderTimeout {
                        seconds: timeout.as_secs(),
                    });
                }
                Err(_) => continue,
            }
        };
        self.registry.untrack(pid);

        let status = status?;
        let stderr_bytes = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            let tail: String = stderr
                .chars()
                .skip(stderr.chars().count().saturating_sub(STDERR_TAIL))
                .collect();
            error!("Encoder failed while {}: {}", context, tail);
            return Err(PipelineError::Encoder {
                context: context.to_string(),
                stderr: Some(tail),
            });
        }

        Ok(())
    }

    /// Run an invocation and assert the file it should have produced exists.
    pub async fn run_expecting(
        &self,
        context: &str,
        args: &[String],
        timeout: Duration,
        expected: &Path,
    ) -> PipelineResult<()> {
        self.run(context, args, timeout).await?;
        ensure_output(expected)
    }
}

/// The first missing expected output aborts with a diagnostic naming the
/// file, rather than deferring to a confusing downstream failure.
pub fn ensure_output(path: &Path) -> PipelineResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingOutput(path.to_path_buf()))
    }
}

/// Continuous pan/zoom motion applied to a body image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomPreset {
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl ZoomPreset {
    pub const ALL: [ZoomPreset; 5] = [
        ZoomPreset::Center,
        ZoomPreset::TopLeft,
        ZoomPreset::TopRight,
        ZoomPreset::BottomLeft,
        ZoomPreset::BottomRight,
    ];

    pub fn random() -> Self {
        *Self::ALL.choose(&mut rand::thread_rng()).unwrap()
    }

    fn origin(&self) -> (&'static str, &'static str) {
        match self {
            ZoomPreset::Center => (
                "trunc(iw/2-(iw/zoom/2))",
                "trunc(ih/2-(ih/zoom/2))",
            ),
            ZoomPreset::TopLeft => ("0", "0"),
            ZoomPreset::TopRight => ("trunc(iw-(iw/zoom))", "0"),
            ZoomPreset::BottomLeft => ("0", "trunc(ih-(ih/zoom))"),
            ZoomPreset::BottomRight => ("trunc(iw-(iw/zoom))", "trunc(ih-(ih/zoom))"),
        }
    }

    /// Oversize, zoom-pan, then downscale to the target resolution.
    pub fn filter(&self, width: u32, height: u32) -> String {
        let (x, y) = self.origin();
        format!(
            "scale={ZOOM_CANVAS}, zoompan=z='zoom+{ZOOM_SPEED}':x='{x}':y='{y}':d={ZOOM_FRAMES}:fps={ZOOM_FPS},scale={width}:{height}"
        )
    }
}

/// Render a body image into a short motion clip.
pub fn zoom_clip_args(
    image: &Path,
    out: &Path,
    preset: ZoomPreset,
    threads: usize,
    duration_secs: u32,
    width: u32,
    height: u32,
) -> Vec<String> {
    vec![
        "-y".into(),
        "-loop".into(),
        "1".into(),
        "-i".into(),
        image.display().to_string(),
        "-preset".into(),
        "ultrafast".into(),
        "-threads".into(),
        threads.to_string(),
        "-vf".into(),
        preset.filter(width, height),
        "-s".into(),
        format!("{width}x{height}"),
        "-t".into(),
        duration_secs.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        out.display().to_string(),
    ]
}

/// Plain static-scale clip, the fallback when the motion filter fails.
pub fn static_clip_args(
    image: &Path,
    out: &Path,
    threads: usize,
    duration_secs: u32,
    width: u32,
    height: u32,
) -> Vec<String> {
    vec![
        "-y".into(),
        "-loop".into(),
        "1".into(),
        "-i".into(),
        image.display().to_string(),
        "-preset".into(),
        "ultrafast".into(),
        "-threads".into(),
        threads.to_string(),
        "-vf".into(),
        format!("scale={width}:{height}"),
        "-t".into(),
        duration_secs.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        out.display().to_string(),
    ]
}

/// Alpha-blend the looping particle overlay onto the closing image.
pub fn particle_overlay_args(
    image: &Path,
    particles: &Path,
    out: &Path,
    width: u32,
    height: u32,
) -> Vec<String> {
    let filter = format!(
        "[0:v]scale={width}:{height},setsar=1[bg];\
         [1:v]scale={width}:{height},format=rgba,colorchannelmixer=aa=0.3[particles];\
         [bg][particles]overlay=format=auto"
    );
    vec![
        "-loop".into(),
        "1".into(),
        "-i".into(),
        image.display().to_string(),
        "-i".into(),
        particles.display().to_string(),
        "-filter_complex".into(),
        filter,
        "-shortest".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-s".into(),
        format!("{width}x{height}"),
        "-y".into(),
        out.display().to_string(),
    ]
}

/// Loop a clip enough times to cover the full narration.
pub fn extend_loop_args(input: &Path, loops: u32, out: &Path) -> Vec<String> {
    vec![
        "-stream_loop".into(),
        loops.to_string(),
        "-i".into(),
        input.display().to_string(),
        "-c".into(),
        "copy".into(),
        out.display().to_string(),
    ]
}

/// Remux a clip into a transport stream so clips with differing internal
/// timestamps concatenate losslessly.
pub fn remux_ts_args(clip: &Path, ts: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        clip.display().to_string(),
        "-c".into(),
        "copy".into(),
        "-bsf:v".into(),
        "h264_mp4toannexb".into(),
        "-f".into(),
        "mpegts".into(),
        ts.display().to_string(),
    ]
}

/// Concatenate transport-stream clips into the silent slideshow track.
pub fn concat_ts_args(ts_clips: &[PathBuf], out: &Path) -> Vec<String> {
    let joined = ts_clips
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("|");
    vec![
        "-y".into(),
        "-i".into(),
        format!("concat:{joined}"),
        "-c".into(),
        "copy".into(),
        "-bsf:a".into(),
        "aac_adtstoasc".into(),
        out.display().to_string(),
    ]
}

/// Concat-demuxer input listing absolute paths, one per line, with the
/// quote-escaping the demuxer expects.
pub fn concat_list_content(paths: &[PathBuf]) -> String {
    let mut content = String::new();
    for path in paths {
        let escaped = path.display().to_string().replace('\\', "/").replace('\'', "\\'");
        content.push_str(&format!("file '{escaped}'\n"));
    }
    content
}

/// Concatenate waveforms listed in a concat-demuxer file.
pub fn concat_audio_args(list_file: &Path, out: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list_file.display().to_string(),
        "-c".into(),
        "copy".into(),
        out.display().to_string(),
    ]
}

/// Transcode the merged narration to the compressed deliverable format.
pub fn transcode_mp3_args(wav: &Path, mp3: &Path, bitrate: &str, sample_rate: u32) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        wav.display().to_string(),
        "-c:a".into(),
        "libmp3lame".into(),
        "-b:a".into(),
        bitrate.into(),
        "-ar".into(),
        sample_rate.to_string(),
        mp3.display().to_string(),
    ]
}

/// Subtitle burn-in filter argument. The subtitles filter parses its own
/// option string, so the path needs forward slashes and escaped colons.
pub fn subtitle_filter(subtitle: &Path, font: &str, font_size: u32) -> String {
    let escaped = subtitle.display().to_string().replace('\\', "/").replace(':', "\\:");
    format!(
        "subtitles='{escaped}':force_style='FontSize={font_size},Bold=1,FontName={font},\
         PrimaryColour=&HFFFFFF&,OutlineColour=&H000000&,Outline=1,Shadow=1,BackColour=&H000000&'"
    )
}

/// Final composition: slideshow video + narration, burned-in subtitles, and
/// optionally a looped, attenuated background-music bed. Output is truncated
/// to the shortest input stream.
pub fn final_mux_args(
    video: &Path,
    narration: &Path,
    subtitle: &Path,
    font: &str,
    font_size: u32,
    music: Option<(&Path, f32)>,
    out: &Path,
) -> Vec<String> {
    match music {
        Some((music_path, volume)) => {
            let filter = format!(
                "[2:a]volume={volume}[bg];\
                 [1:a][bg]amix=inputs=2:duration=first:dropout_transition=2[mixed_audio];\
                 [0:v]{}[video_with_subs]",
                subtitle_filter(subtitle, font, font_size)
            );
            vec![
                "-y".into(),
                "-i".into(),
                video.display().to_string(),
                "-i".into(),
                narration.display().to_string(),
                "-stream_loop".into(),
                "-1".into(),
                "-i".into(),
                music_path.display().to_string(),
                "-c:v".into(),
                "libx264".into(),
                "-filter_complex".into(),
                filter,
                "-map".into(),
                "[video_with_subs]".into(),
                "-map".into(),
                "[mixed_audio]".into(),
                "-c:a".into(),
                "aac".into(),
                "-shortest".into(),
                out.display().to_string(),
            ]
        }
        None => vec![
            "-y".into(),
            "-i".into(),
            video.display().to_string(),
            "-i".into(),
            narration.display().to_string(),
            "-c:v".into(),
            "libx264".into(),
            "-c:a".into(),
            "aac".into(),
            "-vf".into(),
            subtitle_filter(subtitle, font, font_size),
            "-shortest".into(),
            out.display().to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_filter_chains_oversize_zoompan_downscale() {
        let filter = ZoomPreset::Center.filter(1920, 1080);
        assert!(filter.starts_with("scale=8000x4500"));
        assert!(filter.contains("zoompan=z='zoom+0.001'"));
        assert!(filter.contains("d=120:fps=30"));
        assert!(filter.ends_with("scale=1920:1080"));
    }

    #[test]
    fn test_each_preset_has_distinct_origin() {
        let filters: Vec<String> = ZoomPreset::ALL
            .iter()
            .map(|p| p.filter(1920, 1080))
            .collect();
        for (i, a) in filters.iter().enumerate() {
            for b in filters.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let paths = vec![PathBuf::from("/tmp/it's here/audio1.wav")];
        let content = concat_list_content(&paths);
        assert_eq!(content, "file '/tmp/it\\'s here/audio1.wav'\n");
    }

    #[test]
    fn test_subtitle_filter_escapes_colons() {
        let filter = subtitle_filter(Path::new("/a:b/subtitle.srt"), "Montserrat", 26);
        assert!(filter.contains("subtitles='/a\\:b/subtitle.srt'"));
        assert!(filter.contains("FontName=Montserrat"));
        assert!(filter.contains("FontSize=26"));
    }

    #[test]
    fn test_final_mux_with_music_mixes_and_loops() {
        let args = final_mux_args(
            Path::new("show.mp4"),
            Path::new("narration.mp3"),
            Path::new("subtitle.srt"),
            "Montserrat",
            26,
            Some((Path::new("bed.mp3"), 0.3)),
            Path::new("final.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-stream_loop -1"));
        assert!(joined.contains("volume=0.3"));
        assert!(joined.contains("amix=inputs=2:duration=first"));
        assert!(joined.contains("-shortest"));
    }

    #[test]
    fn test_final_mux_without_music_uses_plain_mapping() {
        let args = final_mux_args(
            Path::new("show.mp4"),
            Path::new("narration.mp3"),
            Path::new("subtitle.srt"),
            "Montserrat",
            26,
            None,
            Path::new("final.mp4"),
        );
        let joined = args.join(" ");
        assert!(!joined.contains("amix"));
        assert!(joined.contains("-vf"));
        assert!(joined.contains("-shortest"));
    }

    #[test]
    fn test_remux_and_concat_args() {
        let remux = remux_ts_args(Path::new("zoom1.mp4"), Path::new("zoom1.ts"));
        assert!(remux.join(" ").contains("h264_mp4toannexb"));
        assert!(remux.join(" ").contains("mpegts"));

        let concat = concat_ts_args(
            &[PathBuf::from("a.ts"), PathBuf::from("b.ts")],
            Path::new("slideshow.mp4"),
        );
        assert!(concat.join(" ").contains("concat:a.ts|b.ts"));
    }

    #[test]
    fn test_missing_output_is_named() {
        let err = ensure_output(Path::new("/definitely/not/here.mp4")).unwrap_err();
        match err {
            PipelineError::MissingOutput(path) => {
                assert!(path.ends_with("here.mp4"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
