// ── Client configuration ──

use std::time::Duration;

/// Deadline for control RPCs: stream open, reads, writes, config queries.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for pipeline pushes, which may reprogram the device.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(60);

pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Tunables for one device client. Usually built by `p4rt-config` from the
/// global defaults and the device's overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub short_timeout: Duration,
    pub long_timeout: Duration,
    /// Capacity of the bounded queue feeding the outbound stream.
    pub outbound_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            short_timeout: SHORT_TIMEOUT,
            long_timeout: LONG_TIMEOUT,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}
