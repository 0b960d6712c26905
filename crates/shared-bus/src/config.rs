//! Bus tuning knobs.

use std::time::Duration;

/// Transport-level dial retry, below the subscriber's own retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPolicy {
    /// Connection attempts per dial.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Settings shared by the publisher, the subscriber and the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Events buffered per network subscription before `publish` waits.
    pub channel_capacity: usize,
    /// How long undelivered events wait for their client to reconnect.
    pub deferred_ttl: Duration,
    /// Period of the deferred-registry expiry sweep.
    pub deferred_sweep_interval: Duration,
    /// Pause between subscription stream attempts.
    pub retry_delay: Duration,
    /// Attempts of the bootstrap snapshot pull.
    pub snapshot_attempts: u32,
    /// Pause between snapshot attempts.
    pub snapshot_retry_delay: Duration,
    pub dial: DialPolicy,
    /// Largest frame accepted or produced on the wire.
    pub max_frame_bytes: usize,
    /// Time a new connection has to send its request.
    pub request_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
            deferred_ttl: Duration::from_secs(60),
            deferred_sweep_interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
            snapshot_attempts: 10,
            snapshot_retry_delay: Duration::from_secs(1),
            dial: DialPolicy::default(),
            max_frame_bytes: 64 * 1024 * 1024,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl BusConfig {
    /// Short delays for tests over loopback.
    pub fn for_tests() -> Self {
        Self {
            channel_capacity: 64,
            retry_delay: Duration::from_millis(50),
            snapshot_retry_delay: Duration::from_millis(50),
            deferred_sweep_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }
}
