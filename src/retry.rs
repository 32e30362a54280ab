use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{PipelineError, PipelineResult};

/// Default attempt cap for every retried operation in the pipeline.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Cooperative cancellation token shared between the caller and the running
/// pipeline. Checked at stage boundaries, before each parallel batch, and
/// before every retry attempt.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent and safe from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Error out if cancellation has been requested.
    pub fn ensure_active(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run `op` up to `max_attempts` times with exponential backoff.
///
/// The backoff before retry `n` (0-indexed attempt counter) is `2^n` seconds.
/// Cancellation is checked before every attempt and aborts immediately,
/// without sleeping; a `Cancelled` error from the operation itself is never
/// retried. On exhaustion the last error is wrapped with the attempt count.
pub async fn with_retries<T, F, Fut>(
    cancel: &CancelFlag,
    max_attempts: u32,
    mut op: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    debug_assert!(max_attempts > 0);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        cancel.ensure_active()?;

        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            cancel.ensure_active()?;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!("attempt {}/{} failed: {}", attempt + 1, max_attempts, err);
                last_error = Some(err);
            }
        }
    }

    Err(PipelineError::RetriesExhausted {
        attempts: max_attempts,
        source: Box::new(last_error.expect("at least one attempt ran")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Instant;

    fn flaky(failures: u32) -> (Arc<AtomicU32>, impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = PipelineResult<u32>> + Send>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < failures {
                    Err(PipelineError::service("test", "boom"))
                } else {
                    Ok(n)
                }
            }) as std::pin::Pin<Box<dyn Future<Output = PipelineResult<u32>> + Send>>
        };
        (calls, op)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures() {
        let cancel = CancelFlag::new();
        let (calls, op) = flaky(2);
        let start = Instant::now();

        let value = with_retries(&cancel, 3, op).await.unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two backoff sleeps: 1s + 2s of (paused) virtual time.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempt_count() {
        let cancel = CancelFlag::new();
        let (calls, op) = flaky(10);

        let err = with_retries(&cancel, 3, op).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            PipelineError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_without_attempting() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let (calls, op) = flaky(0);

        let err = with_retries(&cancel, 3, op).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_from_op_is_not_retried() {
        let cancel = CancelFlag::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = with_retries(&cancel, 3, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(PipelineError::Cancelled) }
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
