//! Queue configuration.

use std::time::Duration;

use knowledge_core::{defaults, Error, Result};

/// Configuration for the queue manager.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts an item may consume before it is dead-lettered.
    pub max_retries: u32,
    /// Interval between background sweeps in milliseconds.
    pub poll_interval_ms: u64,
    /// Per-attempt ingestion timeout in seconds. `0` disables it.
    pub ingest_timeout_secs: u64,
    /// User identity attached to ingestion requests.
    pub user_id: Option<String>,
    /// Whether the background polling loop runs.
    pub enabled: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::QUEUE_MAX_RETRIES,
            poll_interval_ms: defaults::QUEUE_POLL_INTERVAL_MS,
            ingest_timeout_secs: defaults::INGEST_TIMEOUT_SECS,
            user_id: None,
            enabled: true,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `KNOWLEDGE_QUEUE_ENABLED` | `true` | Enable/disable background polling |
    /// | `KNOWLEDGE_QUEUE_MAX_RETRIES` | `1` | Attempts per item before dead-lettering |
    /// | `KNOWLEDGE_QUEUE_POLL_INTERVAL_MS` | `5000` | Interval between sweeps |
    /// | `KNOWLEDGE_QUEUE_TIMEOUT_SECS` | `300` | Per-attempt timeout, `0` disables |
    /// | `KNOWLEDGE_QUEUE_USER_ID` | unset | User identity for ingestion requests |
    pub fn from_env() -> Self {
        let enabled = std::env::var(defaults::ENV_QUEUE_ENABLED)
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_retries = std::env::var(defaults::ENV_QUEUE_MAX_RETRIES)
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults::QUEUE_MAX_RETRIES);

        let poll_interval_ms = std::env::var(defaults::ENV_QUEUE_POLL_INTERVAL_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::QUEUE_POLL_INTERVAL_MS)
            .max(1);

        let ingest_timeout_secs = std::env::var(defaults::ENV_QUEUE_TIMEOUT_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::INGEST_TIMEOUT_SECS);

        let user_id = std::env::var(defaults::ENV_QUEUE_USER_ID)
            .ok()
            .filter(|v| !v.is_empty());

        Self {
            max_retries,
            poll_interval_ms,
            ingest_timeout_secs,
            user_id,
            enabled,
        }
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the background sweep interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_ingest_timeout(mut self, secs: u64) -> Self {
        self.ingest_timeout_secs = secs;
        self
    }

    /// Set the user identity attached to requests.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Enable or disable background polling.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config(format!(
                "{} must be at least 1, otherwise no item is ever processed",
                defaults::ENV_QUEUE_MAX_RETRIES
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(format!(
                "{} must be greater than 0",
                defaults::ENV_QUEUE_POLL_INTERVAL_MS
            )));
        }
        Ok(())
    }

    /// Per-attempt timeout, if enabled.
    pub fn ingest_timeout(&self) -> Option<Duration> {
        (self.ingest_timeout_secs > 0).then(|| Duration::from_secs(self.ingest_timeout_secs))
    }
}
