use anyhow::Result;
use clap::{Arg, Command};
use std::path::PathBuf;
use tracing::{error, info, warn};

use slidecast::config::AppConfig;
use slidecast::job::GenerationJob;
use slidecast::pipeline::{EventSender, GenerationPipeline, PipelineEvent};
use slidecast::retry::CancelFlag;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("slidecast=info,warn")
        .init();

    let matches = Command::new("Slidecast")
        .version("0.1.0")
        .about("Automated narrated slideshow video generator")
        .arg(
            Arg::new("preset")
                .short('p')
                .long("preset")
                .value_name("FILE")
                .help("Job preset file (TOML) describing the video to generate")
                .required(true),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Base directory for deliverables"),
        )
        .arg(
            Arg::new("channel")
                .short('c')
                .long("channel")
                .value_name("NAME")
                .help("Override the preset's channel name"),
        )
        .arg(
            Arg::new("music")
                .short('m')
                .long("music")
                .value_name("FILE")
                .help("Background music mixed under the narration"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let preset_path = PathBuf::from(matches.get_one::<String>("preset").unwrap());
    if matches.get_flag("verbose") {
        info!("Verbose logging enabled");
    }

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    if let Some(dir) = matches.get_one::<String>("output-dir") {
        config.output.base_dir = PathBuf::from(dir);
    }
    config.validate()?;

    // Load and finalize the job preset
    let mut job = GenerationJob::from_preset_file(&preset_path)?;
    if let Some(channel) = matches.get_one::<String>("channel") {
        job.channel = channel.clone();
    }
    if let Some(music) = matches.get_one::<String>("music") {
        job.background_music = Some(PathBuf::from(music));
    }
    job.validate()?;

    info!("🚀 Slidecast starting...");
    info!("🎬 Title: {}", job.title);
    info!("📂 Output directory: {}", config.output.base_dir.display());
    info!("{}", config.summary());

    let cancel = CancelFlag::new();
    let (events, mut event_rx) = EventSender::channel();

    // Ctrl-C requests cooperative cancellation; the pipeline routes it
    // through the process registry before winding down.
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested, stopping after the current step...");
            ctrl_c_cancel.cancel();
        }
    });

    // Surface pipeline events on the console as they arrive.
    let observer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                PipelineEvent::Progress(value) => info!("⏳ Progress: {}%", value),
                PipelineEvent::Operation(operation) => info!("▶ {}", operation),
                PipelineEvent::Finished { description } => {
                    info!("🎉 Generation finished");
                    info!("📝 Description: {}", description);
                }
                PipelineEvent::Failed { message } => error!("❌ Generation failed: {}", message),
                PipelineEvent::Cancelled => warn!("🛑 Generation cancelled"),
            }
        }
    });

    let pipeline = GenerationPipeline::new(job, config, events, cancel);
    let outcome = pipeline.run().await;
    let _ = observer.await;

    match outcome {
        Ok(_) => Ok(()),
        Err(err) if err.is_cancelled() => {
            // A cancelled run is a deliberate outcome, not a failure report.
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
