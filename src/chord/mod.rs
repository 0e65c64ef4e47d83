pub mod protocol;
pub mod routing;
pub mod types;
pub mod workers;

use std::time::Duration;

// Chord configuration
pub const RING_BITS: u32 = 64;
pub const FINGER_TABLE_SIZE: usize = RING_BITS as usize;
pub const STABILIZE_INTERVAL: Duration = Duration::from_secs(5);
pub const RPC_TIMEOUT: Duration = Duration::from_millis(1000);
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(3);
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(500);

/// Timing knobs of the maintenance protocol.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Deadline for the bootstrap `Join` exchange.
    pub join_timeout: Duration,
    /// Deadline for lookups and successor refreshes.
    pub rpc_timeout: Duration,
    /// Deadline for the predecessor "are you alive" probe.
    pub liveness_timeout: Duration,
    /// Period of the stabilization worker.
    pub stabilize_interval: Duration,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            join_timeout: JOIN_TIMEOUT,
            rpc_timeout: RPC_TIMEOUT,
            liveness_timeout: LIVENESS_TIMEOUT,
            stabilize_interval: STABILIZE_INTERVAL,
        }
    }
}
