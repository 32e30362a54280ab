use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Language;
use crate::error::{PipelineError, PipelineResult};
use crate::text;

/// Weighted style modifier passed through to the image-generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleWeight {
    /// Style reference understood by the image service
    pub id: String,
    /// Signed influence, valid range -4.0 to 4.0
    pub weight: f32,
}

/// Everything one generation run needs, validated once at construction and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    /// Display title of the video
    pub title: String,
    /// Channel the deliverable is filed under
    #[serde(default = "default_channel")]
    pub channel: String,
    /// API key forwarded to the text-generation service
    pub api_key: String,

    /// Prompt template for the thumbnail image
    pub thumbnail_prompt: String,
    /// Prompt template for body images; `$chunk` is replaced per chunk
    pub images_prompt: String,
    /// Opening-section script prompt
    pub intro_prompt: String,
    /// Chained middle-section script prompt
    pub looping_prompt: String,
    /// Closing-section script prompt
    pub outro_prompt: String,

    /// Number of chained middle-section generations
    pub loop_length: u32,
    /// Word budget per narration chunk
    pub audio_word_limit: usize,
    /// Number of body images
    pub image_count: usize,
    /// Word budget per image chunk
    pub image_word_limit: usize,

    /// Image-service model for the thumbnail
    pub thumbnail_model: String,
    /// Style modifiers for the thumbnail
    #[serde(default)]
    pub thumbnail_styles: Vec<StyleWeight>,
    /// Image-service model for body images
    pub image_model: String,
    /// Style modifiers for body images
    #[serde(default)]
    pub image_styles: Vec<StyleWeight>,

    /// Narration language
    #[serde(default)]
    pub language: Language,
    /// Narration voice id; empty selects the language default
    #[serde(default)]
    pub voice: String,

    /// Optional background music file mixed under the narration
    #[serde(default)]
    pub background_music: Option<PathBuf>,
}

fn default_channel() -> String {
    "default".to_string()
}

impl GenerationJob {
    /// Load a job preset from a TOML file. Missing required fields fail here,
    /// before any stage runs.
    pub fn from_preset_file(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::validation(format!("cannot read preset {}: {e}", path.display()))
        })?;
        let job: Self = toml::from_str(&content)
            .map_err(|e| PipelineError::validation(format!("invalid preset: {e}")))?;
        job.validate()?;
        Ok(job)
    }

    /// Fail-fast input validation (never retried).
    pub fn validate(&self) -> PipelineResult<()> {
        if self.title.trim().is_empty() {
            return Err(PipelineError::validation("title must not be empty"));
        }
        if self.api_key.trim().is_empty() {
            return Err(PipelineError::validation("api_key must not be empty"));
        }
        for (name, prompt) in [
            ("thumbnail_prompt", &self.thumbnail_prompt),
            ("images_prompt", &self.images_prompt),
            ("intro_prompt", &self.intro_prompt),
            ("looping_prompt", &self.looping_prompt),
            ("outro_prompt", &self.outro_prompt),
        ] {
            if prompt.trim().is_empty() {
                return Err(PipelineError::validation(format!("{name} must not be empty")));
            }
        }
        if self.loop_length == 0 {
            return Err(PipelineError::validation("loop_length must be at least 1"));
        }
        if self.audio_word_limit == 0 || self.image_word_limit == 0 {
            return Err(PipelineError::validation("word limits must be at least 1"));
        }
        if self.image_count == 0 {
            return Err(PipelineError::validation("image_count must be at least 1"));
        }
        for style in self.thumbnail_styles.iter().chain(self.image_styles.iter()) {
            if !(-4.0..=4.0).contains(&style.weight) {
                return Err(PipelineError::validation(format!(
                    "style weight {} for {} is outside -4.0..=4.0",
                    style.weight, style.id
                )));
            }
        }
        if let Some(music) = &self.background_music {
            if !music.exists() {
                return Err(PipelineError::validation(format!(
                    "background music file not found: {}",
                    music.display()
                )));
            }
        }
        Ok(())
    }

    /// Title form safe for the job's output directory name.
    pub fn safe_folder_title(&self) -> String {
        text::safe_folder_name(&self.title)
    }

    /// Title form safe for deliverable file stems.
    pub fn safe_file_title(&self) -> String {
        text::safe_file_name(&self.title)
    }

    /// Narration voice, falling back to the language default.
    pub fn voice_id(&self) -> &str {
        if self.voice.trim().is_empty() {
            self.language.default_voice()
        } else {
            &self.voice
        }
    }
}

/// Durable per-job output tree: `{base}/{channel}/{safe_title}/` with one
/// subdirectory per artifact role. All indexed-artifact naming lives here so
/// producing and consuming stages cannot disagree about paths.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    safe_file_title: String,
}

impl OutputLayout {
    pub fn create(base: &Path, job: &GenerationJob) -> PipelineResult<Self> {
        let root = base.join(&job.channel).join(job.safe_folder_title());
        let layout = Self {
            root,
            safe_file_title: job.safe_file_title(),
        };
        for dir in [
            layout.main_dir(),
            layout.images_dir(),
            layout.voice_over_dir(),
            layout.prompts_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        info!("📂 Created output directory: {}", layout.root.display());
        Ok(layout)
    }

    pub fn main_dir(&self) -> PathBuf {
        self.root.join("main")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn voice_over_dir(&self) -> PathBuf {
        self.root.join("voice_over")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join("prompts")
    }

    /// Body image for 1-based index `i`.
    pub fn image_path(&self, i: usize) -> PathBuf {
        self.images_dir().join(format!("image{i}.jpg"))
    }

    /// Narration audio for 1-based segment index `i`.
    pub fn audio_path(&self, i: usize) -> PathBuf {
        self.voice_over_dir().join(format!("audio{i}.wav"))
    }

    /// Per-segment subtitle for 1-based segment index `i`.
    pub fn segment_subtitle_path(&self, i: usize) -> PathBuf {
        self.voice_over_dir().join(format!("subtitle{i}.srt"))
    }

    /// Merged full-length subtitle track.
    pub fn merged_subtitle_path(&self) -> PathBuf {
        self.voice_over_dir().join("subtitle.srt")
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.main_dir().join(format!("{}.jpg", self.safe_file_title))
    }

    pub fn script_path(&self) -> PathBuf {
        self.main_dir().join(format!("{}.txt", self.safe_file_title))
    }

    pub fn final_video_path(&self) -> PathBuf {
        self.main_dir().join(format!("{}.mp4", self.safe_file_title))
    }

    pub fn thumbnail_prompt_path(&self) -> PathBuf {
        self.prompts_dir().join("thumbnail-prompt.txt")
    }

    /// Audit copy of the generated prompt for body image `i`.
    pub fn image_prompt_path(&self, i: usize) -> PathBuf {
        self.prompts_dir().join(format!("image{i}-prompt.txt"))
    }
}

/// Ephemeral scratch directory, unique per job so concurrent jobs never
/// collide, removed in teardown whatever the outcome.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn create(base: &Path) -> PipelineResult<Self> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = base.join(format!("__work___{}", &suffix[..8]));
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        info!("Created work directory: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory and everything in it. Failure to clean up is a
    /// warning, never a job failure.
    pub fn cleanup(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Failed to clean up work directory {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_job() -> GenerationJob {
        GenerationJob {
            title: "A Night of Quiet Rain".to_string(),
            channel: "ambience".to_string(),
            api_key: "key".to_string(),
            thumbnail_prompt: "thumbnail".to_string(),
            images_prompt: "draw $chunk".to_string(),
            intro_prompt: "intro".to_string(),
            looping_prompt: "loop".to_string(),
            outro_prompt: "outro".to_string(),
            loop_length: 3,
            audio_word_limit: 400,
            image_count: 3,
            image_word_limit: 15,
            thumbnail_model: "runware:100@1".to_string(),
            thumbnail_styles: Vec::new(),
            image_model: "runware:100@1".to_string(),
            image_styles: Vec::new(),
            language: Language::AmericanEnglish,
            voice: String::new(),
            background_music: None,
        }
    }

    #[test]
    fn test_valid_job_passes_validation() {
        assert!(sample_job().validate().is_ok());
    }

    #[test]
    fn test_missing_title_fails_fast() {
        let mut job = sample_job();
        job.title = "  ".to_string();
        assert!(matches!(
            job.validate().unwrap_err(),
            PipelineError::Validation(_)
        ));
    }

    #[test]
    fn test_style_weight_out_of_range_rejected() {
        let mut job = sample_job();
        job.image_styles.push(StyleWeight {
            id: "style:1".to_string(),
            weight: 5.0,
        });
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_missing_background_music_rejected() {
        let mut job = sample_job();
        job.background_music = Some(PathBuf::from("/does/not/exist.mp3"));
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_empty_voice_falls_back_to_language_default() {
        let job = sample_job();
        assert_eq!(job.voice_id(), "am_michael");
    }

    #[test]
    fn test_preset_with_missing_field_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preset.toml");
        std::fs::write(&path, "title = \"only a title\"").unwrap();
        let err = GenerationJob::from_preset_file(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_output_layout_creates_all_roles() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::create(dir.path(), &sample_job()).unwrap();

        assert!(layout.main_dir().is_dir());
        assert!(layout.images_dir().is_dir());
        assert!(layout.voice_over_dir().is_dir());
        assert!(layout.prompts_dir().is_dir());
        assert_eq!(
            layout.audio_path(3).file_name().unwrap().to_str().unwrap(),
            "audio3.wav"
        );
        assert_eq!(
            layout.image_path(1).file_name().unwrap().to_str().unwrap(),
            "image1.jpg"
        );
    }

    #[test]
    fn test_work_dirs_are_unique_and_cleanable() {
        let dir = TempDir::new().unwrap();
        let a = WorkDir::create(dir.path()).unwrap();
        let b = WorkDir::create(dir.path()).unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());

        a.cleanup();
        b.cleanup();
        assert!(!a.path().exists());
        assert!(!b.path().exists());
    }
}
