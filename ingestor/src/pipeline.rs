//! ingest -> persist -> classify -> broadcast -> alert.

use crate::broadcast::Broadcaster;
use crate::classify::classify;
use crate::emitter::AlertEmitter;
use crate::metrics::{ACCEPTED_READINGS_TOTAL, REJECTED_PAYLOADS_TOTAL, STORE_FAILURES_TOTAL};
use crate::model::{
    AlertEvent, InboundMessage, MessageDirection, MessageLogEntry, SensorReading, Severity,
};
use crate::outbox::{Outbox, PendingWrite};
use crate::parse::{parse_payload, RejectedPayload};
use crate::store::Stores;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum Outcome {
    Rejected(RejectedPayload),
    Accepted {
        reading: SensorReading,
        severity: Severity,
        alert: Option<AlertEvent>,
    },
}

pub struct Ingestor {
    default_device_id: String,
    stores: Stores,
    broadcaster: Broadcaster,
    emitter: AlertEmitter,
    outbox: Outbox,
}

impl Ingestor {
    pub fn new(
        default_device_id: impl Into<String>,
        stores: Stores,
        broadcaster: Broadcaster,
        outbox: Outbox,
    ) -> Self {
        let emitter = AlertEmitter::new(stores.alerts.clone(), broadcaster.clone(), outbox.clone());
        Self {
            default_device_id: default_device_id.into(),
            stores,
            broadcaster,
            emitter,
            outbox,
        }
    }

    /// Runs one message through the whole pipeline. Never fails: every error
    /// is logged and the pipeline moves on.
    pub async fn handle(&self, message: &InboundMessage) -> Outcome {
        let reading = match parse_payload(&message.payload, &self.default_device_id, Utc::now()) {
            Ok(reading) => reading,
            Err(rejected) => {
                REJECTED_PAYLOADS_TOTAL.inc();
                error!(
                    "Dropping payload on {} ({} bytes): {}",
                    message.topic,
                    message.payload.len(),
                    rejected
                );
                let entry = MessageLogEntry::new(
                    MessageDirection::Received,
                    self.device_hint(&message.payload),
                    &message.topic,
                    &message.payload,
                )
                .failed(rejected.to_string());
                self.log_message(&entry).await;
                return Outcome::Rejected(rejected);
            }
        };
        ACCEPTED_READINGS_TOTAL.inc();
        debug!("Accepted reading from {}", reading.device_id);

        let mut entry = MessageLogEntry::new(
            MessageDirection::Received,
            reading.device_id.clone(),
            &message.topic,
            &message.payload,
        );

        self.track_device(&reading).await;

        if let Err(e) = self.stores.readings.append(&reading).await {
            STORE_FAILURES_TOTAL.inc();
            error!("Failed to store reading from {}: {}", reading.device_id, e);
            self.outbox.enqueue(PendingWrite::Reading(reading.clone()));
            entry = entry.failed(format!("reading not stored: {}", e));
        }

        self.broadcaster.publish_reading(&reading);

        let severity = classify(&reading);
        let alert = self.emitter.emit(&reading).await;

        self.log_message(&entry).await;

        Outcome::Accepted {
            reading,
            severity,
            alert,
        }
    }

    /// Device id named by a payload that failed to parse, if it is JSON at all.
    fn device_hint(&self, payload: &[u8]) -> String {
        serde_json::from_slice::<serde_json::Value>(payload)
            .ok()
            .and_then(|value| {
                value
                    .get("device_id")
                    .and_then(|id| id.as_str())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.default_device_id.clone())
    }

    async fn log_message(&self, entry: &MessageLogEntry) {
        if let Err(e) = self.stores.messages.record(entry).await {
            STORE_FAILURES_TOTAL.inc();
            warn!("Failed to log message on {}: {}", entry.topic, e);
        }
    }

    async fn track_device(&self, reading: &SensorReading) {
        match self
            .stores
            .devices
            .upsert(&reading.device_id, reading.timestamp)
            .await
        {
            Ok(status) => {
                if self.broadcaster.last_status(&status.device_id) != Some(status.status) {
                    info!("Device {} is {}", status.device_id, status.status.as_str());
                    self.broadcaster.publish_device_status(&status);
                }
            }
            Err(e) => {
                STORE_FAILURES_TOTAL.inc();
                warn!("Failed to update status of {}: {}", reading.device_id, e);
            }
        }
    }
}

/// Consumes the transport queue. Each message is handled on its own task, so
/// a slow store write for one reading does not hold back the next.
pub async fn run_ingestor(ingestor: Arc<Ingestor>, mut rx: mpsc::Receiver<InboundMessage>) {
    info!("Ingestor started");

    while let Some(message) = rx.recv().await {
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            ingestor.handle(&message).await;
        });
    }

    info!("Ingest queue closed, ingestor stopped");
}
