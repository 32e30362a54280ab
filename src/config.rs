use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the slidecast generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// External model service endpoints
    pub services: ServicesConfig,

    /// Pipeline tuning (retries, batch sizes, pacing)
    pub pipeline: PipelineTuning,

    /// External encoder and rendering settings
    pub render: RenderConfig,

    /// Output and scratch locations
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Text-generation service endpoint
    pub llm_endpoint: String,

    /// Model identifier sent with every text-generation request
    pub llm_model: String,

    /// Maximum tokens per text-generation response
    pub llm_max_output_tokens: u32,

    /// Sampling temperature for text generation
    pub llm_temperature: f32,

    /// Text-generation request timeout (seconds)
    pub llm_timeout_seconds: u64,

    /// Image-generation service endpoint
    pub image_endpoint: String,

    /// Text-to-speech service endpoint
    pub tts_endpoint: String,

    /// Transcription service endpoint
    pub transcription_endpoint: String,

    /// Request timeout for image/TTS/transcription calls (seconds)
    pub media_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTuning {
    /// Attempt cap for every retried unit of work
    pub max_attempts: u32,

    /// Concurrent image generations per batch
    pub image_batch_size: usize,

    /// Concurrent audio generations per batch (TTS is heavier per call)
    pub audio_batch_size: usize,

    /// Pause after each successful image-service call (rate-limit headroom, ms)
    pub rate_limit_pause_ms: u64,

    /// Pause between image batches (ms)
    pub batch_pause_ms: u64,

    /// Pause between chained script-loop calls (ms)
    pub loop_pacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Final video width in pixels
    pub video_width: u32,

    /// Final video height in pixels
    pub video_height: u32,

    /// Thumbnail width in pixels
    pub thumbnail_width: u32,

    /// Thumbnail height in pixels
    pub thumbnail_height: u32,

    /// Encoder thread cap per invocation
    pub encoder_threads: usize,

    /// Looping particle-overlay clip composited over the closing image
    pub particles_path: PathBuf,

    /// Background music mix volume (0.0 - 1.0)
    pub music_volume: f32,

    /// Narration track bitrate
    pub audio_bitrate: String,

    /// Narration track sample rate (Hz)
    pub audio_sample_rate: u32,

    /// Burned-in subtitle font size
    pub subtitle_font_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base directory for durable deliverables
    pub base_dir: PathBuf,

    /// Base directory under which per-job scratch directories are created
    pub work_base_dir: PathBuf,
}

impl AppConfig {
    /// Load configuration from the usual file locations, falling back to
    /// environment overrides on defaults.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "slidecast.toml",
            "config/slidecast.toml",
            "~/.config/slidecast/config.toml",
            "/etc/slidecast/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Defaults with environment-variable overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("SLIDECAST_LLM_ENDPOINT") {
            config.services.llm_endpoint = endpoint;
        }
        if let Ok(endpoint) = std::env::var("SLIDECAST_IMAGE_ENDPOINT") {
            config.services.image_endpoint = endpoint;
        }
        if let Ok(endpoint) = std::env::var("SLIDECAST_TTS_ENDPOINT") {
            config.services.tts_endpoint = endpoint;
        }
        if let Ok(endpoint) = std::env::var("SLIDECAST_TRANSCRIPTION_ENDPOINT") {
            config.services.transcription_endpoint = endpoint;
        }
        if let Ok(output_dir) = std::env::var("SLIDECAST_OUTPUT_DIR") {
            config.output.base_dir = PathBuf::from(output_dir);
        }
        if let Ok(particles) = std::env::var("SLIDECAST_PARTICLES_PATH") {
            config.render.particles_path = PathBuf::from(particles);
        }

        Ok(config)
    }

    /// Validate tuning values before any job runs.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be greater than 0"));
        }
        if self.pipeline.image_batch_size == 0 || self.pipeline.audio_batch_size == 0 {
            return Err(anyhow!("batch sizes must be greater than 0"));
        }
        if self.render.video_width == 0 || self.render.video_height == 0 {
            return Err(anyhow!("video resolution must be non-zero"));
        }
        if self.render.video_width % 2 != 0 || self.render.video_height % 2 != 0 {
            return Err(anyhow!("video resolution must be even for the encoder"));
        }
        if !(0.0..=1.0).contains(&self.render.music_volume) {
            return Err(anyhow!("music_volume must be within 0.0 - 1.0"));
        }
        if self.services.llm_endpoint.is_empty()
            || self.services.image_endpoint.is_empty()
            || self.services.tts_endpoint.is_empty()
            || self.services.transcription_endpoint.is_empty()
        {
            return Err(anyhow!("all service endpoints must be configured"));
        }
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Slidecast Configuration:\n\
            - LLM endpoint: {}\n\
            - Image endpoint: {}\n\
            - TTS endpoint: {}\n\
            - Transcription endpoint: {}\n\
            - Output directory: {}\n\
            - Render target: {}x{} @ batches {}/{}",
            self.services.llm_endpoint,
            self.services.image_endpoint,
            self.services.tts_endpoint,
            self.services.transcription_endpoint,
            self.output.base_dir.display(),
            self.render.video_width,
            self.render.video_height,
            self.pipeline.image_batch_size,
            self.pipeline.audio_batch_size,
        )
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            services: ServicesConfig {
                llm_endpoint: "http://127.0.0.1:8001/generate-text".to_string(),
                llm_model: "gpt-4o-mini".to_string(),
                llm_max_output_tokens: 16000,
                llm_temperature: 1.0,
                llm_timeout_seconds: 120,
                image_endpoint: "http://127.0.0.1:8088/generate-images".to_string(),
                tts_endpoint: "http://127.0.0.1:8000/tts/base64".to_string(),
                transcription_endpoint: "http://127.0.0.1:8080/transcribe/".to_string(),
                media_timeout_seconds: 360,
            },
            pipeline: PipelineTuning {
                max_attempts: 3,
                image_batch_size: 4,
                audio_batch_size: 2,
                rate_limit_pause_ms: 500,
                batch_pause_ms: 1000,
                loop_pacing_ms: 500,
            },
            render: RenderConfig {
                video_width: 1920,
                video_height: 1080,
                thumbnail_width: 1280,
                thumbnail_height: 720,
                encoder_threads: num_cpus::get().min(4),
                particles_path: PathBuf::from("assets/particles.webm"),
                music_volume: 0.3,
                audio_bitrate: "128k".to_string(),
                audio_sample_rate: 44100,
                subtitle_font_size: 26,
            },
            output: OutputConfig {
                base_dir: PathBuf::from("./output"),
                work_base_dir: PathBuf::from("."),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.base_dir = dir;
        self
    }

    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.work_base_dir = dir;
        self
    }

    pub fn with_llm_endpoint(mut self, endpoint: String) -> Self {
        self.config.services.llm_endpoint = endpoint;
        self
    }

    pub fn with_batch_sizes(mut self, images: usize, audio: usize) -> Self {
        self.config.pipeline.image_batch_size = images;
        self.config.pipeline.audio_batch_size = audio;
        self
    }

    pub fn with_particles_path(mut self, path: PathBuf) -> Self {
        self.config.render.particles_path = path;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Narration language. One static table owns every per-language detail the
/// pipeline needs: the script-generation instruction, the default narration
/// voice, and subtitle font selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    AmericanEnglish,
    BritishEnglish,
    Spanish,
    French,
    Hindi,
    Italian,
    Japanese,
    BrazilianPortuguese,
    Chinese,
}

struct LanguageInfo {
    code: &'static str,
    instruction: &'static str,
    default_voice: &'static str,
    cjk: bool,
}

impl Language {
    /// Single-letter service code used by the TTS boundary.
    pub fn code(&self) -> &'static str {
        self.info().code
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "a" => Some(Self::AmericanEnglish),
            "b" => Some(Self::BritishEnglish),
            "e" => Some(Self::Spanish),
            "f" => Some(Self::French),
            "h" => Some(Self::Hindi),
            "i" => Some(Self::Italian),
            "j" => Some(Self::Japanese),
            "p" => Some(Self::BrazilianPortuguese),
            "z" => Some(Self::Chinese),
            _ => None,
        }
    }

    /// Instruction appended to every script-generation prompt.
    pub fn instruction(&self) -> &'static str {
        self.info().instruction
    }

    pub fn default_voice(&self) -> &'static str {
        self.info().default_voice
    }

    pub fn is_cjk(&self) -> bool {
        self.info().cjk
    }

    /// Font family for burned-in subtitles. CJK scripts need a CJK-capable
    /// family; everything else uses the fixed Latin font.
    pub fn subtitle_font(&self) -> &'static str {
        if self.is_cjk() {
            "Noto Sans CJK SC"
        } else {
            "Montserrat"
        }
    }

    fn info(&self) -> &'static LanguageInfo {
        match self {
            Self::AmericanEnglish => &LanguageInfo {
                code: "a",
                instruction: "Please generate all content in American English.",
                default_voice: "am_michael",
                cjk: false,
            },
            Self::BritishEnglish => &LanguageInfo {
                code: "b",
                instruction: "Please generate all content in British English.",
                default_voice: "bm_george",
                cjk: false,
            },
            Self::Spanish => &LanguageInfo {
                code: "e",
                instruction: "Por favor genera todo el contenido en Español.",
                default_voice: "ef_dora",
                cjk: false,
            },
            Self::French => &LanguageInfo {
                code: "f",
                instruction: "Veuillez générer tout le contenu en français.",
                default_voice: "ff_siwis",
                cjk: false,
            },
            Self::Hindi => &LanguageInfo {
                code: "h",
                instruction: "कृपया सभी सामग्री हिंदी में जेनरेट करें।",
                default_voice: "hf_alpha",
                cjk: false,
            },
            Self::Italian => &LanguageInfo {
                code: "i",
                instruction: "Si prega di generare tutti i contenuti in italiano.",
                default_voice: "if_sara",
                cjk: false,
            },
            Self::Japanese => &LanguageInfo {
                code: "j",
                instruction: "すべてのコンテンツを日本語で生成してください。",
                default_voice: "jf_alpha",
                cjk: true,
            },
            Self::BrazilianPortuguese => &LanguageInfo {
                code: "p",
                instruction: "Por favor, gere todo o conteúdo em português brasileiro.",
                default_voice: "pf_dora",
                cjk: false,
            },
            Self::Chinese => &LanguageInfo {
                code: "z",
                instruction: "请用中文生成所有内容。",
                default_voice: "zf_xiaobei",
                cjk: true,
            },
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Self::AmericanEnglish
    }
}

impl TryFrom<String> for Language {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_code(&value).ok_or_else(|| format!("unknown language code: {value}"))
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.code().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.image_batch_size, 4);
        assert_eq!(config.pipeline.audio_batch_size, 2);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_output_dir(PathBuf::from("/tmp/out"))
            .with_batch_sizes(8, 3)
            .build();

        assert_eq!(config.output.base_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.pipeline.image_batch_size, 8);
        assert_eq!(config.pipeline.audio_batch_size, 3);
    }

    #[test]
    fn test_invalid_music_volume_rejected() {
        let mut config = AppConfig::default();
        config.render.music_volume = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_language_codes_round_trip() {
        for code in ["a", "b", "e", "f", "h", "i", "j", "p", "z"] {
            let lang = Language::from_code(code).unwrap();
            assert_eq!(lang.code(), code);
        }
        assert!(Language::from_code("x").is_none());
    }

    #[test]
    fn test_cjk_languages_get_cjk_font() {
        assert!(Language::Japanese.is_cjk());
        assert!(Language::Chinese.is_cjk());
        assert_eq!(Language::Japanese.subtitle_font(), "Noto Sans CJK SC");
        assert_eq!(Language::French.subtitle_font(), "Montserrat");
        assert!(!Language::AmericanEnglish.is_cjk());
    }
}
