//! Constant-interval retry.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::PlatformError;

/// Retry behaviour for non-streaming requests.
///
/// The interval never grows: a move submission must land as soon as the
/// platform is reachable again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts
    pub interval: Duration,
    /// Give up after this many attempts (None = keep trying)
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails with a final error, or runs out
    /// of attempts.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if self.max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(e);
                    }
                    warn!(request = what, attempt, error = %e, "request failed; retrying");
                    thread::sleep(self.interval);
                }
            }
        }
    }
}
