//! Stall detection for blocking device waits
//!
//! A compute submission blocks the caller until the device signals completion.
//! The wait is a bounded poll loop; each time a poll times out the loop calls
//! [`StallMonitor::check`], which warns once when the wait has gone on longer
//! than the configured threshold. A stalled device still stalls the caller.

use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default time after which a blocking wait is reported
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(5);

/// Tracks one blocking wait (RAII: reports recovery on drop if it warned)
pub struct StallMonitor<'a> {
    label: &'a str,
    operation: &'static str,
    started: Instant,
    threshold: Duration,
    has_warned: bool,
}

impl<'a> StallMonitor<'a> {
    pub fn new(label: &'a str, operation: &'static str, threshold: Duration) -> Self {
        Self {
            label,
            operation,
            started: Instant::now(),
            threshold,
            has_warned: false,
        }
    }

    /// Warn if the wait has exceeded the threshold (only once per wait)
    pub fn check(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed > self.threshold && !self.has_warned {
            self.has_warned = true;
            warn!(
                "⚠️  BLOCKED: [{}] {} for {:.1}s",
                self.label,
                self.operation,
                elapsed.as_secs_f64()
            );
        }
    }

    pub fn has_warned(&self) -> bool {
        self.has_warned
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for StallMonitor<'_> {
    fn drop(&mut self) {
        if self.has_warned {
            info!(
                "✅ UNBLOCKED: [{}] {} after {:.1}s",
                self.label,
                self.operation,
                self.started.elapsed().as_secs_f64()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warns_only_past_threshold() {
        let mut quiet = StallMonitor::new("fir", "wait", Duration::from_secs(3600));
        quiet.check();
        assert!(!quiet.has_warned());

        let mut loud = StallMonitor::new("fir", "wait", Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        loud.check();
        assert!(loud.has_warned());
        loud.check();
        assert!(loud.has_warned());
    }
}
