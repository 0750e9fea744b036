use crate::stop::{StopSignal, WaitOutcome};
use kubetester_config::Timings;
use kubetester_provider::{HealthCheck, ProviderError};
use std::time::Duration;
use tracing::{debug, warn};

/// Polls a health check until it passes, the attempts run out, or the stop
/// signal fires.
pub struct HealthGate<'a> {
    check: &'a dyn HealthCheck,
    stop: &'a StopSignal,
    attempts: u32,
    interval: Duration,
}

impl<'a> HealthGate<'a> {
    pub fn new(check: &'a dyn HealthCheck, stop: &'a StopSignal, timings: &Timings) -> Self {
        Self {
            check,
            stop,
            attempts: timings.health_attempts.max(1),
            interval: Duration::from_secs(timings.health_interval_secs),
        }
    }

    /// Returns the last failure if the cluster never reports healthy.
    pub fn wait_healthy(&self) -> Result<(), ProviderError> {
        let mut attempt = 1;
        loop {
            match self.check.check_health() {
                Ok(()) => {
                    debug!(attempt, "cluster healthy");
                    return Ok(());
                }
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    warn!(
                        attempt,
                        "health check failed: {e}; retrying in {}s",
                        self.interval.as_secs()
                    );
                    if let WaitOutcome::Stopped(_) = self.stop.wait(self.interval) {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
