use std::{path::PathBuf, time::Duration};

pub(crate) const DEFAULT_REDACTED_QUERY_PARAMS: [&str; 5] =
    ["password", "token", "api_key", "secret", "auth"];

/// Settings of the telemetry client.
///
/// ```
/// use application_insights::TelemetryConfig;
/// use std::time::Duration;
///
/// let config = TelemetryConfig::default()
///     .with_max_batch_size(100)
///     .with_max_batch_interval(Duration::from_secs(5))
///     .with_cloud_role("checkout");
/// ```
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub(crate) max_batch_size: usize,
    pub(crate) max_batch_interval: Duration,
    pub(crate) queue_capacity: usize,
    pub(crate) high_water_mark: usize,
    pub(crate) max_concurrent_transmissions: usize,
    pub(crate) initial_retry_interval: Duration,
    pub(crate) max_retry_interval: Duration,
    pub(crate) max_attempts: u32,
    pub(crate) spool_dir: Option<PathBuf>,
    pub(crate) reload_spool: bool,
    pub(crate) redacted_query_params: Vec<String>,
    pub(crate) max_url_length: usize,
    pub(crate) application_version: Option<String>,
    pub(crate) cloud_role: Option<String>,
    pub(crate) cloud_role_instance: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            max_batch_interval: Duration::from_secs(10),
            queue_capacity: 2048,
            high_water_mark: 10_000,
            max_concurrent_transmissions: 1,
            initial_retry_interval: Duration::from_secs(10),
            max_retry_interval: Duration::from_secs(60 * 60),
            max_attempts: 5,
            spool_dir: None,
            reload_spool: false,
            redacted_query_params: DEFAULT_REDACTED_QUERY_PARAMS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            max_url_length: 2048,
            application_version: None,
            cloud_role: None,
            cloud_role_instance: None,
        }
    }
}

impl TelemetryConfig {
    /// Number of envelopes after which a batch is sent. Default: 500.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Time after the first envelope of a batch at which the batch is sent. Default: 10 seconds.
    pub fn with_max_batch_interval(mut self, max_batch_interval: Duration) -> Self {
        self.max_batch_interval = max_batch_interval;
        self
    }

    /// Capacity of the queue between tracking calls and the channel worker. Items tracked while the
    /// queue is full are dropped. Default: 2048.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    /// Maximum number of envelopes buffered, in flight or waiting for a retry. The oldest buffered
    /// envelopes are dropped beyond it. Default: 10000.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark.max(1);
        self
    }

    /// Number of batches sent at the same time. Default: 1.
    pub fn with_max_concurrent_transmissions(mut self, max_concurrent_transmissions: usize) -> Self {
        self.max_concurrent_transmissions = max_concurrent_transmissions.max(1);
        self
    }

    /// Delay before the first retry of a failed batch. Doubles with every attempt. Default: 10
    /// seconds.
    pub fn with_initial_retry_interval(mut self, initial_retry_interval: Duration) -> Self {
        self.initial_retry_interval = initial_retry_interval;
        self
    }

    /// Upper bound of the retry delay. Default: 1 hour.
    pub fn with_max_retry_interval(mut self, max_retry_interval: Duration) -> Self {
        self.max_retry_interval = max_retry_interval;
        self
    }

    /// Number of times a batch is sent before it is dropped. Default: 5.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Directory envelopes are written to when they could not be sent before the client closed.
    /// Without it such envelopes are dropped.
    pub fn with_spool_dir(mut self, spool_dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(spool_dir.into());
        self
    }

    /// Send the envelopes found in the spool directory when the client starts. Default: false.
    pub fn with_reload_spool(mut self, reload_spool: bool) -> Self {
        self.reload_spool = reload_spool;
        self
    }

    /// Query parameters whose values are redacted from tracked URLs. Default: `password`,
    /// `token`, `api_key`, `secret` and `auth`.
    pub fn with_redacted_query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redacted_query_params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Tracked URLs longer than this are truncated. Default: 2048.
    pub fn with_max_url_length(mut self, max_url_length: usize) -> Self {
        self.max_url_length = max_url_length;
        self
    }

    /// Application version tag of every item.
    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.application_version = Some(version.into());
        self
    }

    /// Cloud role tag of every item.
    pub fn with_cloud_role(mut self, cloud_role: impl Into<String>) -> Self {
        self.cloud_role = Some(cloud_role.into());
        self
    }

    /// Cloud role instance tag of every item. Defaults to the host name.
    pub fn with_cloud_role_instance(mut self, cloud_role_instance: impl Into<String>) -> Self {
        self.cloud_role_instance = Some(cloud_role_instance.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(500, config.max_batch_size);
        assert_eq!(Duration::from_secs(10), config.max_batch_interval);
        assert_eq!(10_000, config.high_water_mark);
        assert_eq!(1, config.max_concurrent_transmissions);
        assert_eq!(Duration::from_secs(3600), config.max_retry_interval);
        assert_eq!(5, config.redacted_query_params.len());
        assert!(!config.reload_spool);
    }

    #[test]
    fn zero_limits_are_raised() {
        let config = TelemetryConfig::default()
            .with_max_batch_size(0)
            .with_max_concurrent_transmissions(0)
            .with_max_attempts(0);
        assert_eq!(1, config.max_batch_size);
        assert_eq!(1, config.max_concurrent_transmissions);
        assert_eq!(1, config.max_attempts);
    }
}
