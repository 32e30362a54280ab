pub mod assembly;
pub mod audio;
pub mod images;
pub mod merge;
pub mod script;
pub mod thumbnail;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::job::{GenerationJob, OutputLayout, WorkDir};
use crate::media::{EncoderRunner, ProcessRegistry};
use crate::monitor::ResourceMonitor;
use crate::retry::CancelFlag;
use crate::services::{
    HttpTextGenerator, ImageClient, SpeechClient, TextGenerator, TranscriptClient,
};
use crate::text;

/// Events published to whoever is observing the run (CLI today, a UI or an
/// upload collaborator tomorrow).
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Overall progress, 0-100, monotonic
    Progress(u8),
    /// Human-readable description of the current operation
    Operation(String),
    /// Terminal success; carries the description seed for the upload step
    Finished { description: String },
    /// Terminal failure with a single human-readable message
    Failed { message: String },
    /// Terminal cancellation; deliberately carries no diagnostics
    Cancelled,
}

/// Cloneable event publisher with a monotonic progress guard: emitting a
/// value lower than anything already published is a silent no-op, so a late
/// worker can never move the bar backwards.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    last_progress: Arc<AtomicU8>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                last_progress: Arc::new(AtomicU8::new(0)),
            },
            rx,
        )
    }

    pub fn progress(&self, value: u8) {
        let value = value.min(100);
        let previous = self.last_progress.fetch_max(value, Ordering::SeqCst);
        if value > previous {
            self.send(PipelineEvent::Progress(value));
        }
    }

    pub fn operation(&self, operation: impl Into<String>) {
        self.send(PipelineEvent::Operation(operation.into()));
    }

    fn send(&self, event: PipelineEvent) {
        // A detached observer is not an error worth failing a job over.
        let _ = self.tx.send(event);
    }
}

/// Pipeline stage, in execution order. Linear: every stage always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Script,
    Thumbnail,
    Images,
    Audio,
    Merge,
    Assembly,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Init => "Initialization",
            Stage::Script => "Script Generation",
            Stage::Thumbnail => "Thumbnail Generation",
            Stage::Images => "Image Generation",
            Stage::Audio => "Audio Generation",
            Stage::Merge => "Narration Merge",
            Stage::Assembly => "Video Assembly",
        }
    }

    const ORDER: [Stage; 7] = [
        Stage::Init,
        Stage::Script,
        Stage::Thumbnail,
        Stage::Images,
        Stage::Audio,
        Stage::Merge,
        Stage::Assembly,
    ];
}

/// Everything a stage function needs, borrowed for the duration of the run.
pub(crate) struct StageContext<'a> {
    pub job: &'a GenerationJob,
    pub config: &'a AppConfig,
    pub llm: &'a dyn TextGenerator,
    pub image_client: &'a ImageClient,
    pub tts: &'a SpeechClient,
    pub transcriber: &'a TranscriptClient,
    pub encoder: &'a EncoderRunner,
    pub layout: &'a OutputLayout,
    pub work: &'a WorkDir,
    pub events: &'a EventSender,
    pub cancel: &'a CancelFlag,
}

/// One video generation run. Owns its scratch space and subprocess registry;
/// teardown always runs, whatever the outcome.
pub struct GenerationPipeline {
    job: GenerationJob,
    config: AppConfig,
    events: EventSender,
    cancel: CancelFlag,
    registry: Arc<ProcessRegistry>,
    text_generator: Option<Box<dyn TextGenerator>>,
    step_times: Vec<(&'static str, Duration)>,
}

impl GenerationPipeline {
    pub fn new(job: GenerationJob, config: AppConfig, events: EventSender, cancel: CancelFlag) -> Self {
        Self {
            job,
            config,
            events,
            cancel,
            registry: Arc::new(ProcessRegistry::new()),
            text_generator: None,
            step_times: Vec::new(),
        }
    }

    /// Replace the HTTP text generator, mainly so tests can drive the script
    /// stage with a stub.
    pub fn with_text_generator(mut self, generator: Box<dyn TextGenerator>) -> Self {
        self.text_generator = Some(generator);
        self
    }

    /// Run the job to a terminal event. Returns the description seed on
    /// success so embedding callers do not need to watch the event stream.
    pub async fn run(mut self) -> PipelineResult<String> {
        let started = Instant::now();
        info!(
            "🚀 Starting video generation \"{}\" at {}",
            self.job.title,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );

        let mut work: Option<WorkDir> = None;
        let result = self.execute(&mut work).await;

        // Teardown always runs: stop stray encoder processes, then drop the
        // scratch directory.
        self.registry.terminate_all().await;
        if let Some(work) = work {
            info!("Cleaning up work directory: {}", work.path().display());
            work.cleanup();
        }

        match result {
            Ok(description) => {
                self.log_runtime_summary(started.elapsed());
                self.events.send(PipelineEvent::Finished {
                    description: description.clone(),
                });
                Ok(description)
            }
            Err(err) if err.is_cancelled() => {
                info!(
                    "Generation cancelled after {}",
                    format_duration(started.elapsed())
                );
                self.events.send(PipelineEvent::Cancelled);
                Err(PipelineError::Cancelled)
            }
            Err(err) => {
                let snapshot = ResourceMonitor::new().snapshot();
                error!(
                    "❌ Video generation failed after {}: {}",
                    format_duration(started.elapsed()),
                    err
                );
                error!("System state at failure: {}", snapshot);
                if let Some(hint) = err.diagnostic_hint() {
                    error!("Hint: {}", hint);
                }
                self.events.send(PipelineEvent::Failed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn execute(&mut self, work_slot: &mut Option<WorkDir>) -> PipelineResult<String> {
        self.job.validate()?;

        // Init
        let init_started = Instant::now();
        self.events.operation("Initializing");
        self.cancel.ensure_active()?;

        let encoder = EncoderRunner::new(Arc::clone(&self.registry), self.cancel.clone())?;
        let layout = OutputLayout::create(&self.config.output.base_dir, &self.job)?;
        // Parked in the caller's slot right away so teardown removes it even
        // when a later stage fails.
        let work: &WorkDir = work_slot.insert(WorkDir::create(&self.config.output.work_base_dir)?);

        let http_llm;
        let llm: &dyn TextGenerator = match &self.text_generator {
            Some(generator) => generator.as_ref(),
            None => {
                http_llm = HttpTextGenerator::new(&self.config.services, &self.job.api_key)?;
                &http_llm
            }
        };
        let image_client = ImageClient::new(&self.config.services)?;
        let tts = SpeechClient::new(&self.config.services)?;
        let transcriber = TranscriptClient::new(&self.config.services)?;

        let ctx = StageContext {
            job: &self.job,
            config: &self.config,
            llm,
            image_client: &image_client,
            tts: &tts,
            transcriber: &transcriber,
            encoder: &encoder,
            layout: &layout,
            work,
            events: &self.events,
            cancel: &self.cancel,
        };
        ctx.events.progress(5);
        self.step_times
            .push((Stage::Init.label(), init_started.elapsed()));

        // Script
        self.cancel.ensure_active()?;
        ctx.events.operation("Generating Script");
        let script_started = Instant::now();
        let parts = script::run(&ctx).await?;
        let total_script = parts.combined_sanitized();
        tokio::fs::write(layout.script_path(), &total_script).await?;
        self.step_times
            .push((Stage::Script.label(), script_started.elapsed()));

        // Thumbnail
        self.cancel.ensure_active()?;
        ctx.events.operation("Generating Thumbnail");
        let thumbnail_started = Instant::now();
        thumbnail::run(&ctx).await?;
        ctx.events.progress(25);
        self.step_times
            .push((Stage::Thumbnail.label(), thumbnail_started.elapsed()));

        // Images
        self.cancel.ensure_active()?;
        ctx.events.operation("Generating Images");
        let images_started = Instant::now();
        let image_count = images::run(&ctx, &total_script).await?;
        self.step_times
            .push((Stage::Images.label(), images_started.elapsed()));

        // Audio
        self.cancel.ensure_active()?;
        ctx.events.operation("Generating Audio and Transcriptions");
        let audio_started = Instant::now();
        let segment_count = audio::run(&ctx, &total_script).await?;
        self.step_times
            .push((Stage::Audio.label(), audio_started.elapsed()));

        // Merge
        self.cancel.ensure_active()?;
        ctx.events.operation("Merging Narration");
        let merge_started = Instant::now();
        let narration = merge::run(&ctx, segment_count).await?;
        self.step_times
            .push((Stage::Merge.label(), merge_started.elapsed()));

        // Assembly
        self.cancel.ensure_active()?;
        ctx.events.operation("Assembling Final Video");
        let assembly_started = Instant::now();
        assembly::run(&ctx, &narration, image_count).await?;
        self.step_times
            .push((Stage::Assembly.label(), assembly_started.elapsed()));

        Ok(text::first_paragraph(&parts.intro))
    }

    fn log_runtime_summary(&self, total: Duration) {
        info!("{}", "=".repeat(60));
        info!("🎬 VIDEO GENERATION RUNTIME SUMMARY");
        info!("{}", "=".repeat(60));
        info!("📊 TOTAL RUNTIME: {}", format_duration(total));
        info!("{}", "-".repeat(40));
        for stage in Stage::ORDER {
            if let Some((_, duration)) = self
                .step_times
                .iter()
                .find(|(label, _)| *label == stage.label())
            {
                let percentage = if total.as_secs_f64() > 0.0 {
                    duration.as_secs_f64() / total.as_secs_f64() * 100.0
                } else {
                    0.0
                };
                info!(
                    "   {}: {} ({:.1}%)",
                    stage.label(),
                    format_duration(*duration),
                    percentage
                );
            }
        }
        info!("{}", "-".repeat(40));
    }
}

/// Human-readable duration for log lines.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs_f64();
    let hours = (total / 3600.0) as u64;
    let minutes = ((total % 3600.0) / 60.0) as u64;
    let seconds = total % 60.0;

    if hours > 0 {
        format!("{}h {}m {:.1}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:.1}s", minutes, seconds)
    } else {
        format!("{:.1}s", seconds)
    }
}

/// 1-based indices whose expected files are missing from disk. Parallel
/// stages run this after every batch has settled; a gap is a hard failure.
pub(crate) fn missing_indexed_files(paths: impl Iterator<Item = std::path::PathBuf>) -> Vec<usize> {
    paths
        .enumerate()
        .filter(|(_, path)| !path.exists())
        .map(|(i, _)| i + 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let (events, mut rx) = EventSender::channel();
        events.progress(10);
        events.progress(30);
        events.progress(20); // dropped
        events.progress(30); // duplicate, dropped
        events.progress(200); // clamped
        drop(events);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::Progress(p) = event {
                seen.push(p);
            }
        }
        assert_eq!(seen, vec![10, 30, 100]);
    }

    #[test]
    fn test_missing_indexed_files_are_one_based() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("audio1.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("audio3.wav"), b"x").unwrap();

        let missing = missing_indexed_files(
            (1..=3).map(|i| dir.path().join(format!("audio{i}.wav"))),
        );
        assert_eq!(missing, vec![2]);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3904)), "1h 5m 4.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5.0s");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
    }
}
