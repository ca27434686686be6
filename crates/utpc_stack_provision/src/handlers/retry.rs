use std::time::Duration;

use tracing::warn;
use utpc_stack_core::ResourceRef;

use crate::adapters::control_plane::ProviderError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Bounded retry for transient control-plane errors.
///
/// Only the identical call is repeated; fatal errors are returned on the
/// first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Linear backoff: attempt `n` waits `n * backoff` before the next try.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn run<T>(
        &self,
        resource: &ResourceRef,
        mut call: impl FnMut() -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        resource = %resource,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "transient control-plane error, retrying"
                    );
                    std::thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
