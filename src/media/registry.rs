use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// How long terminated processes get to exit before being killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Tracks every live external-encoder process so cancellation and teardown
/// can stop them all. Batch workers register from parallel tasks while the
/// cancellation path may be iterating, so all access goes through one lock.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    pids: Mutex<HashSet<u32>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned encoder process.
    pub fn track(&self, pid: u32) {
        self.pids.lock().unwrap().insert(pid);
    }

    /// Deregister a process that exited normally.
    pub fn untrack(&self, pid: u32) {
        self.pids.lock().unwrap().remove(&pid);
    }

    pub fn active_count(&self) -> usize {
        self.pids.lock().unwrap().len()
    }

    /// Terminate every tracked process: SIGTERM first, then SIGKILL for
    /// anything still alive after the grace period.
    pub async fn terminate_all(&self) {
        let pids: Vec<u32> = self.pids.lock().unwrap().drain().collect();
        if pids.is_empty() {
            return;
        }

        for &pid in &pids {
            info!("Terminating encoder process {}", pid);
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to signal process {}: {}", pid, e);
            }
        }

        let mut remaining: Vec<u32> = pids;
        let deadline = tokio::time::Instant::now() + TERMINATE_GRACE;
        while !remaining.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
            remaining.retain(|&pid| is_alive(pid));
        }

        for pid in remaining {
            warn!("Force killing encoder process {}", pid);
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
}

/// Signal 0 probes liveness without delivering anything.
fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_untrack_bookkeeping() {
        let registry = ProcessRegistry::new();
        registry.track(101);
        registry.track(202);
        assert_eq!(registry.active_count(), 2);

        registry.untrack(101);
        assert_eq!(registry.active_count(), 1);

        // Untracking an unknown pid is a no-op.
        registry.untrack(999);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_terminate_all_stops_live_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("child pid");

        let registry = ProcessRegistry::new();
        registry.track(pid);
        registry.terminate_all().await;

        let status = child.wait().await.unwrap();
        assert!(!status.success());
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_terminate_all_with_no_processes_is_quick() {
        let registry = ProcessRegistry::new();
        registry.terminate_all().await;
        assert_eq!(registry.active_count(), 0);
    }
}
