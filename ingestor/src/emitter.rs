use crate::broadcast::Broadcaster;
use crate::classify::classify;
use crate::metrics::{ALERTS_TOTAL, STORE_FAILURES_TOTAL};
use crate::model::{AlertEvent, AlertSnapshot, SensorReading};
use crate::outbox::{Outbox, PendingWrite};
use crate::store::AlertStore;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// Turns non-NORMAL classifications into persisted, broadcast alerts.
///
/// There is no cooldown here: every qualifying reading yields an event.
#[derive(Clone)]
pub struct AlertEmitter {
    store: Arc<dyn AlertStore>,
    broadcaster: Broadcaster,
    outbox: Outbox,
}

impl AlertEmitter {
    pub fn new(store: Arc<dyn AlertStore>, broadcaster: Broadcaster, outbox: Outbox) -> Self {
        Self {
            store,
            broadcaster,
            outbox,
        }
    }

    /// Classifies `reading` and returns the emitted alert, or `None` for NORMAL.
    pub async fn emit(&self, reading: &SensorReading) -> Option<AlertEvent> {
        let level = classify(reading).alert_level()?;

        let alert = AlertEvent {
            id: Uuid::new_v4(),
            device_id: reading.device_id.clone(),
            level,
            snapshot: AlertSnapshot::from(reading),
            timestamp: reading.timestamp,
            viewed: false,
            viewed_at: None,
        };

        if let Err(e) = self.store.append(&alert).await {
            STORE_FAILURES_TOTAL.inc();
            error!("Failed to persist {} alert for {}: {}", level.as_str(), alert.device_id, e);
            self.outbox.enqueue(PendingWrite::Alert(alert.clone()));
        }

        ALERTS_TOTAL.with_label_values(&[level.as_str()]).inc();
        warn!(
            "ALARM {} - device {}, gas {} ppm, temperature {:?}, humidity {:?}",
            level.as_str(),
            alert.device_id,
            alert.snapshot.gas_ppm,
            alert.snapshot.temperature,
            alert.snapshot.humidity
        );

        self.broadcaster.publish_alert(&alert);
        Some(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{Room, ServerEvent};
    use crate::classify::classify_snapshot;
    use crate::model::{AlertLevel, Severity};
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn reading(gas_ppm: i64, temperature: f64, humidity: f64) -> SensorReading {
        SensorReading {
            device_id: "dev-1".to_string(),
            timestamp: Utc::now(),
            temperature: Some(temperature),
            humidity: Some(humidity),
            gas_adc: 900,
            gas_ppm,
            voltage: 3.3,
            alarm: true,
        }
    }

    fn emitter() -> (AlertEmitter, Arc<MemoryStore>, Broadcaster) {
        let store = Arc::new(MemoryStore::new());
        let hub = Broadcaster::new(16);
        let (outbox, _rx) = Outbox::new(4);
        (AlertEmitter::new(store.clone(), hub.clone(), outbox), store, hub)
    }

    #[tokio::test]
    async fn test_darurat_alert_is_persisted_and_broadcast() {
        let (emitter, store, hub) = emitter();
        let (id, mut rx) = hub.connect();
        hub.subscribe(id, Room::Device("dev-1".to_string()));
        let _ = rx.try_recv();

        let r = reading(1600, 30.0, 60.0);
        let alert = emitter.emit(&r).await.unwrap();

        assert_eq!(alert.level, AlertLevel::Darurat);
        assert!(!alert.viewed);
        assert!(alert.viewed_at.is_none());
        assert_eq!(store.alert_count(), 1);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Alert(alert));
    }

    #[tokio::test]
    async fn test_normal_produces_nothing() {
        let (emitter, store, hub) = emitter();
        let (id, mut rx) = hub.connect();
        hub.subscribe(id, Room::AllDevices);
        let _ = rx.try_recv();

        let r = reading(200, 25.0, 60.0);
        assert!(emitter.emit(&r).await.is_none());
        assert_eq!(store.alert_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_suppression_between_alerts() {
        let (emitter, store, _hub) = emitter();
        let r = reading(1100, 30.0, 60.0);
        for _ in 0..3 {
            emitter.emit(&r).await;
        }
        assert_eq!(store.alert_count(), 3);
    }

    #[tokio::test]
    async fn test_level_matches_reevaluated_snapshot() {
        let (emitter, _store, _hub) = emitter();
        for r in [
            reading(1100, 30.0, 60.0),
            reading(0, 41.0, 60.0),
            reading(0, 30.0, 20.0),
            reading(1200, 36.0, 34.0),
        ] {
            let alert = emitter.emit(&r).await.unwrap();
            assert_eq!(Severity::from(alert.level), classify_snapshot(&alert.snapshot));
        }
    }

    #[tokio::test]
    async fn test_level_comes_from_the_reading() {
        let (emitter, store, _hub) = emitter();

        let r = reading(1600, 25.0, 60.0);
        assert_eq!(emitter.emit(&r).await.unwrap().level, AlertLevel::Darurat);

        let mut faulted = reading(200, 0.0, 0.0);
        faulted.temperature = None;
        faulted.humidity = None;
        assert!(emitter.emit(&faulted).await.is_none());
        assert_eq!(store.alert_count(), 1);
    }
}
