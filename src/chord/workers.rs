use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::chord::protocol::RingProtocol;

/// Runs one stabilization tick every `period` until `shutdown` fires.
/// Ticks never overlap; a slow tick delays the next one instead of
/// queueing a burst.
pub async fn run_stabilize_worker(
    protocol: Arc<RingProtocol>,
    period: Duration,
    shutdown: CancellationToken,
) {
    info!("Starting stabilize worker for {}", protocol.local());
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick of an interval completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stabilize worker stopped");
                return;
            }
            _ = ticker.tick() => {
                debug!("Running stabilize");
                protocol.stabilize().await;
            }
        }
    }
}
