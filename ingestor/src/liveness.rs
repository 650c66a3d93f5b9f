use crate::broadcast::Broadcaster;
use crate::store::DeviceTracker;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

/// Periodically flips silent devices to offline and announces them.
pub async fn run_liveness(
    devices: Arc<dyn DeviceTracker>,
    broadcaster: Broadcaster,
    offline_after: Duration,
    every: Duration,
) {
    info!(
        "Starting liveness sweeper: offline after {:?}, every {:?}",
        offline_after, every
    );

    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        sweep(devices.as_ref(), &broadcaster, offline_after).await;
    }
}

/// Returns how many devices went offline.
pub async fn sweep(
    devices: &dyn DeviceTracker,
    broadcaster: &Broadcaster,
    offline_after: Duration,
) -> usize {
    let silence = chrono::Duration::from_std(offline_after)
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    let cutoff = Utc::now()
        .checked_sub_signed(silence)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    match devices.mark_stale(cutoff).await {
        Ok(stale) => {
            for status in &stale {
                info!("Device {} went offline (last seen {})", status.device_id, status.last_seen);
                broadcaster.publish_device_status(status);
            }
            stale.len()
        }
        Err(e) => {
            error!("Liveness sweep failed: {}", e);
            0
        }
    }
}
