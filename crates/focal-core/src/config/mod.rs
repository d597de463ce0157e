//! Engine configuration for the sync subsystem.
//!
//! Provides a unified `SyncSettings` struct used by desktop and mobile to
//! tune queue draining, retry/backoff, and circuit-breaker behavior.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sync::circuit_breaker::BreakerConfig;
use crate::sync::retry::RetryConfig;

/// Maximum persisted retries before a queue item is marked failed.
pub const MAX_SYNC_RETRIES: u32 = 3;

/// Tunables for the sync engine. Deserializes from partial documents,
/// backfilling omitted fields with defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Persisted retry ceiling per queue item (across drain passes)
    pub max_sync_retries: u32,
    /// Delay before a deduplicated follow-up drain is attempted
    pub drain_retry_delay: Duration,
    /// Batch size for `process_batch_with_retry`
    pub batch_size: usize,
    /// In-call retry/backoff configuration
    pub retry: RetryConfig,
    /// Circuit breaker configuration for the remote dependency
    pub breaker: BreakerConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_sync_retries: MAX_SYNC_RETRIES,
            drain_retry_delay: Duration::from_secs(5),
            batch_size: 10,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl SyncSettings {
    /// Set the persisted retry ceiling
    #[must_use]
    pub const fn with_max_sync_retries(mut self, max: u32) -> Self {
        self.max_sync_retries = max;
        self
    }

    /// Set the deduplicated drain retry delay
    #[must_use]
    pub const fn with_drain_retry_delay(mut self, delay: Duration) -> Self {
        self.drain_retry_delay = delay;
        self
    }

    /// Set the batch size for batched remote calls
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}
