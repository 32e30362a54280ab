use std::fmt;
use sysinfo::System;
use tracing::warn;

const MEMORY_WARN_PERCENT: f32 = 85.0;
const CPU_WARN_PERCENT: f32 = 90.0;

/// Point-in-time system load reading, attached to failure logs and checked
/// periodically during the encoder-heavy assembly stage.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub memory_percent: f32,
    pub cpu_percent: f32,
}

impl fmt::Display for ResourceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory {:.1}%, cpu {:.1}%",
            self.memory_percent, self.cpu_percent
        )
    }
}

/// Tracks host memory and CPU pressure for diagnostics. Resource pressure is
/// never auto-mitigated; it only surfaces as warnings and failure context.
pub struct ResourceMonitor {
    system: System,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn snapshot(&mut self) -> ResourceSnapshot {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let total = self.system.total_memory();
        let memory_percent = if total > 0 {
            self.system.used_memory() as f32 / total as f32 * 100.0
        } else {
            0.0
        };

        ResourceSnapshot {
            memory_percent,
            cpu_percent: self.system.global_cpu_usage(),
        }
    }

    /// Log a warning when the host is under memory or CPU pressure.
    pub fn warn_if_constrained(&mut self) {
        let snapshot = self.snapshot();
        if snapshot.memory_percent > MEMORY_WARN_PERCENT {
            warn!("high memory usage: {:.1}%", snapshot.memory_percent);
        }
        if snapshot.cpu_percent > CPU_WARN_PERCENT {
            warn!("high CPU usage: {:.1}%", snapshot.cpu_percent);
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reports_sane_percentages() {
        let mut monitor = ResourceMonitor::new();
        let snapshot = monitor.snapshot();
        assert!(snapshot.memory_percent >= 0.0 && snapshot.memory_percent <= 100.0);
        assert!(snapshot.cpu_percent >= 0.0);
    }
}
