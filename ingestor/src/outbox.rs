use crate::errors::Result;
use crate::metrics::{OUTBOX_DROPPED_TOTAL, OUTBOX_RETRIES_TOTAL};
use crate::model::{AlertEvent, SensorReading};
use crate::store::{AlertStore, ReadingStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// A store write whose first attempt failed.
#[derive(Debug, Clone)]
pub enum PendingWrite {
    Reading(SensorReading),
    Alert(AlertEvent),
}

impl PendingWrite {
    fn describe(&self) -> String {
        match self {
            PendingWrite::Reading(r) => format!("reading from {} at {}", r.device_id, r.timestamp),
            PendingWrite::Alert(a) => format!("{} alert {} for {}", a.level.as_str(), a.id, a.device_id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// 100ms, 200ms, 400ms, ... for the default base.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2_u32.saturating_pow(attempt.saturating_sub(1)).min(32)
    }
}

/// Sending half of the bounded retry queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<PendingWrite>,
}

impl Outbox {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PendingWrite>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues a failed write for retry. Returns false if it had to be dropped.
    pub fn enqueue(&self, write: PendingWrite) -> bool {
        match self.tx.try_send(write) {
            Ok(()) => true,
            Err(TrySendError::Full(write)) => {
                OUTBOX_DROPPED_TOTAL.inc();
                error!("Retry outbox full, dropping {}", write.describe());
                false
            }
            Err(TrySendError::Closed(write)) => {
                OUTBOX_DROPPED_TOTAL.inc();
                error!("Retry outbox closed, dropping {}", write.describe());
                false
            }
        }
    }
}

pub async fn run_outbox(
    mut rx: mpsc::Receiver<PendingWrite>,
    readings: Arc<dyn ReadingStore>,
    alerts: Arc<dyn AlertStore>,
    policy: RetryPolicy,
) {
    info!(
        "Starting retry outbox with max_attempts={}, base_backoff={:?}",
        policy.max_attempts, policy.base_backoff
    );

    while let Some(write) = rx.recv().await {
        retry_write(&write, readings.as_ref(), alerts.as_ref(), policy).await;
    }

    info!("Retry outbox stopped");
}

async fn retry_write(
    write: &PendingWrite,
    readings: &dyn ReadingStore,
    alerts: &dyn AlertStore,
    policy: RetryPolicy,
) -> bool {
    let mut attempt = 0;

    loop {
        attempt += 1;
        let backoff = policy.backoff(attempt);
        tokio::time::sleep(backoff).await;
        OUTBOX_RETRIES_TOTAL.inc();

        match apply(write, readings, alerts).await {
            Ok(()) => {
                debug!("Retried {} stored on attempt {}", write.describe(), attempt);
                return true;
            }
            Err(e) => {
                if attempt >= policy.max_attempts || !e.is_transient() {
                    OUTBOX_DROPPED_TOTAL.inc();
                    error!(
                        "Giving up on {} after {} retries: {}",
                        write.describe(),
                        attempt,
                        e
                    );
                    return false;
                }
                warn!(
                    "Retry {}/{} for {} failed: {}",
                    attempt,
                    policy.max_attempts,
                    write.describe(),
                    e
                );
            }
        }
    }
}

async fn apply(
    write: &PendingWrite,
    readings: &dyn ReadingStore,
    alerts: &dyn AlertStore,
) -> Result<()> {
    match write {
        PendingWrite::Reading(reading) => readings.append(reading).await,
        PendingWrite::Alert(alert) => alerts.append(alert).await,
    }
}
