pub mod image_gen;
pub mod llm;
pub mod transcribe;
pub mod tts;

pub use image_gen::{ImageClient, ImageGenRequest};
pub use llm::{GeneratedText, HttpTextGenerator, TextGenerator};
pub use transcribe::TranscriptClient;
pub use tts::SpeechClient;
