//! Centralized default constants for the ingestion queue.
//!
//! Every crate and binary references these constants instead of defining its
//! own magic numbers.

// =============================================================================
// RETRY
// =============================================================================

/// Maximum processing attempts counted against an item before it is dead-lettered.
///
/// `retry_count` is incremented before every attempt, so with the default of 1
/// an item that fails its first attempt is not selected again.
pub const QUEUE_MAX_RETRIES: u32 = 1;

// =============================================================================
// SCHEDULING
// =============================================================================

/// Interval between background `check_all_bases` sweeps in milliseconds.
pub const QUEUE_POLL_INTERVAL_MS: u64 = 5_000;

/// Per-attempt ingestion timeout in seconds (5 minutes).
pub const INGEST_TIMEOUT_SECS: u64 = 300;

/// Progress value written when an attempt starts.
pub const PROGRESS_START: u8 = 0;

/// Progress value written when an attempt completes.
pub const PROGRESS_DONE: u8 = 100;

// =============================================================================
// EVENTS
// =============================================================================

/// Capacity of the queue event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Capacity of the notification broadcast channel.
pub const NOTIFICATION_BUS_CAPACITY: usize = 64;

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Enables or disables the background polling loop.
pub const ENV_QUEUE_ENABLED: &str = "KNOWLEDGE_QUEUE_ENABLED";

/// Overrides [`QUEUE_MAX_RETRIES`].
pub const ENV_QUEUE_MAX_RETRIES: &str = "KNOWLEDGE_QUEUE_MAX_RETRIES";

/// Overrides [`QUEUE_POLL_INTERVAL_MS`].
pub const ENV_QUEUE_POLL_INTERVAL_MS: &str = "KNOWLEDGE_QUEUE_POLL_INTERVAL_MS";

/// Overrides [`INGEST_TIMEOUT_SECS`]. `0` disables the timeout.
pub const ENV_QUEUE_TIMEOUT_SECS: &str = "KNOWLEDGE_QUEUE_TIMEOUT_SECS";

/// User identity attached to every ingestion request.
pub const ENV_QUEUE_USER_ID: &str = "KNOWLEDGE_QUEUE_USER_ID";
