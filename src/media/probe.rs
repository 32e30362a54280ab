use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::media::encoder::EncoderRunner;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

impl EncoderRunner {
    /// Query a media file's duration.
    pub async fn probe_duration(&self, path: &Path) -> PipelineResult<Duration> {
        if !path.exists() {
            return Err(PipelineError::MissingOutput(path.to_path_buf()));
        }

        let mut child = Command::new(self.ffprobe_path())
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id().unwrap_or_default();
        self.registry().track(pid);

        let result = tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output()).await;
        self.registry().untrack(pid);

        let output = match result {
            Ok(output) => output?,
            Err(_) => {
                return Err(PipelineError::EncoderTimeout {
                    seconds: PROBE_TIMEOUT.as_secs(),
                })
            }
        };

        if !output.status.success() {
            return Err(PipelineError::Encoder {
                context: format!("probing duration of {}", path.display()),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let seconds: f64 = stdout.trim().parse().map_err(|_| PipelineError::Encoder {
            context: format!("parsing probed duration of {}", path.display()),
            stderr: Some(stdout.to_string()),
        })?;

        debug!("Probed {}: {:.2}s", path.display(), seconds);
        Ok(Duration::from_secs_f64(seconds))
    }
}
