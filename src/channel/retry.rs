use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

/// Exponential backoff between attempts of one batch.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub(crate) fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max: max.max(initial),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the next attempt after `attempts` failed ones, or `None` when the batch has
    /// used up its attempts.
    pub(crate) fn delay(&self, attempts: u32) -> Option<Duration> {
        if attempts == 0 || attempts >= self.max_attempts {
            return None;
        }
        ExponentialBuilder::default()
            .with_min_delay(self.initial)
            .with_max_delay(self.max)
            .with_factor(2.0)
            .with_max_times(self.max_attempts as usize)
            .build()
            .nth(attempts as usize - 1)
    }
}
