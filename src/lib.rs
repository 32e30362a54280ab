/// Slidecast - narrated slideshow video generator
///
/// Drives a language model, an image-generation service, TTS and
/// transcription services, and the external media encoder through a
/// multi-stage cancellable pipeline that leaves one finished video (plus its
/// thumbnail, script, images and subtitles) on disk per job.

pub mod config;
pub mod error;
pub mod imaging;
pub mod job;
pub mod media;
pub mod monitor;
pub mod pipeline;
pub mod retry;
pub mod services;
pub mod subtitle;
pub mod text;

// Re-export main types for easy access
pub use crate::config::{AppConfig, ConfigBuilder, Language};
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::job::{GenerationJob, OutputLayout, StyleWeight, WorkDir};
pub use crate::media::{EncoderRunner, ProcessRegistry};
pub use crate::monitor::{ResourceMonitor, ResourceSnapshot};
pub use crate::pipeline::{EventSender, GenerationPipeline, PipelineEvent, Stage};
pub use crate::retry::CancelFlag;
pub use crate::services::{GeneratedText, TextGenerator};
