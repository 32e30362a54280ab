use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the generation pipeline.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while generating a video.
///
/// The kind is set at the throw site; callers dispatch on the variant,
/// never on message text.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A remote service call failed (network error, bad status, bad body).
    /// Retryable until the attempt cap is reached.
    #[error("{service} request failed: {message}")]
    Service { service: &'static str, message: String },

    /// The external encoder exited with a non-zero status.
    #[error("encoder failed while {context}")]
    Encoder {
        context: String,
        stderr: Option<String>,
    },

    /// The external encoder did not finish within its wall-clock budget.
    #[error("encoder operation timed out after {seconds} seconds")]
    EncoderTimeout { seconds: u64 },

    /// A command completed but the file it should have produced is absent.
    #[error("expected output file was not created: {0}")]
    MissingOutput(PathBuf),

    /// A parallel stage finished with gaps in its indexed output set.
    #[error("missing {artifact} files after generation: {}", format_indices(.indices))]
    IncompleteStage {
        artifact: &'static str,
        indices: Vec<usize>,
    },

    /// Bad caller input, detected before any stage runs. Never retried.
    #[error("invalid job: {0}")]
    Validation(String),

    /// A retried operation failed on every attempt.
    #[error("operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// Cooperative cancellation. A terminal outcome, not a failure.
    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn service(service: &'static str, message: impl Into<String>) -> Self {
        Self::Service {
            service,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for cancellation, including cancellation surfaced through the
    /// retry wrapper.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::RetriesExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Extra log hint for failure classes that have a known usual cause.
    pub fn diagnostic_hint(&self) -> Option<&'static str> {
        match self {
            Self::EncoderTimeout { .. } => {
                Some("the encoder stalled; lower the encoder thread count or close other heavy processes")
            }
            Self::Encoder { .. } => {
                Some("check that the encoder build supports the filters used (zoompan, subtitles, amix)")
            }
            Self::Service { .. } => Some("check that the local model services are running and reachable"),
            _ => None,
        }
    }
}

fn format_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_stage_lists_indices() {
        let err = PipelineError::IncompleteStage {
            artifact: "audio",
            indices: vec![2, 5],
        };
        let msg = err.to_string();
        assert!(msg.contains("audio"));
        assert!(msg.contains("2, 5"));
    }

    #[test]
    fn test_cancellation_detected_through_retry_wrapper() {
        let err = PipelineError::RetriesExhausted {
            attempts: 3,
            source: Box::new(PipelineError::Cancelled),
        };
        assert!(err.is_cancelled());
        assert!(!PipelineError::validation("x").is_cancelled());
    }
}
