//! Persistence seams consumed by the pipeline.
//!
//! The ingestor appends readings, upserts device status, appends alerts and
//! keeps a log of MQTT traffic. Everything here returns a `Result`; callers decide whether
//! a failure is logged and dropped or handed to the retry outbox.

use crate::errors::Result;
use crate::model::{
    AlertEvent, DeviceState, DeviceStatus, MessageLogEntry, MessageLogQuery, ReadingQuery,
    SensorReading,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn append(&self, reading: &SensorReading) -> Result<()>;

    /// Most recent reading of every known device.
    async fn latest_per_device(&self) -> Result<Vec<SensorReading>>;

    /// Newest first.
    async fn recent(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>>;
}

#[async_trait]
pub trait DeviceTracker: Send + Sync {
    /// Creates the device as online if unseen, else refreshes `last_seen`
    /// and sets it online.
    async fn upsert(&self, device_id: &str, seen_at: DateTime<Utc>) -> Result<DeviceStatus>;

    /// Flags a known device as errored. `None` if the device is unknown.
    async fn report_error(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DeviceStatus>>;

    /// Marks online devices not seen since `cutoff` as offline and returns them.
    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceStatus>>;

    async fn list(&self) -> Result<Vec<DeviceStatus>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn append(&self, alert: &AlertEvent) -> Result<()>;

    /// Newest first.
    async fn recent(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<AlertEvent>>;
}

/// Record of every message received from or sent to the broker.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn record(&self, entry: &MessageLogEntry) -> Result<()>;

    /// Newest first.
    async fn recent(&self, query: &MessageLogQuery) -> Result<Vec<MessageLogEntry>>;
}

/// The store seams, usually backed by one store.
#[derive(Clone)]
pub struct Stores {
    pub readings: Arc<dyn ReadingStore>,
    pub devices: Arc<dyn DeviceTracker>,
    pub alerts: Arc<dyn AlertStore>,
    pub messages: Arc<dyn MessageLog>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ReadingStore + DeviceTracker + AlertStore + MessageLog + 'static,
    {
        Self {
            readings: store.clone(),
            devices: store.clone(),
            alerts: store.clone(),
            messages: store,
        }
    }
}

/// Process-local store used for development runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<SensorReading>>,
    devices: Mutex<HashMap<String, DeviceStatus>>,
    alerts: Mutex<Vec<AlertEvent>>,
    messages: Mutex<Vec<MessageLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reading_count(&self) -> usize {
        self.readings.lock().len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn append(&self, reading: &SensorReading) -> Result<()> {
        self.readings.lock().push(reading.clone());
        Ok(())
    }

    async fn latest_per_device(&self) -> Result<Vec<SensorReading>> {
        let readings = self.readings.lock();
        let mut latest: HashMap<&str, &SensorReading> = HashMap::new();
        for reading in readings.iter() {
            let newer = latest
                .get(reading.device_id.as_str())
                .map_or(true, |current| reading.timestamp >= current.timestamp);
            if newer {
                latest.insert(reading.device_id.as_str(), reading);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn recent(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>> {
        let readings = self.readings.lock();
        let mut matched: Vec<SensorReading> = readings
            .iter()
            .filter(|r| {
                query
                    .device_id
                    .as_deref()
                    .map_or(true, |id| r.device_id == id)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(query.limit);
        Ok(matched)
    }
}

#[async_trait]
impl DeviceTracker for MemoryStore {
    async fn upsert(&self, device_id: &str, seen_at: DateTime<Utc>) -> Result<DeviceStatus> {
        let mut devices = self.devices.lock();
        let device = devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceStatus {
                device_id: device_id.to_string(),
                device_name: DeviceStatus::default_name(device_id),
                status: DeviceState::Online,
                last_seen: seen_at,
            });
        device.status = DeviceState::Online;
        device.last_seen = seen_at;
        Ok(device.clone())
    }

    async fn report_error(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DeviceStatus>> {
        let mut devices = self.devices.lock();
        Ok(devices.get_mut(device_id).map(|device| {
            device.status = DeviceState::Error;
            device.last_seen = at;
            device.clone()
        }))
    }

    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceStatus>> {
        let mut devices = self.devices.lock();
        Ok(devices
            .values_mut()
            .filter(|d| d.status == DeviceState::Online && d.last_seen < cutoff)
            .map(|d| {
                d.status = DeviceState::Offline;
                d.clone()
            })
            .collect())
    }

    async fn list(&self) -> Result<Vec<DeviceStatus>> {
        let mut devices: Vec<DeviceStatus> = self.devices.lock().values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn append(&self, alert: &AlertEvent) -> Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    async fn recent(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<AlertEvent>> {
        let alerts = self.alerts.lock();
        let mut matched: Vec<AlertEvent> = alerts
            .iter()
            .filter(|a| device_id.map_or(true, |id| a.device_id == id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        Ok(matched)
    }
}

#[async_trait]
impl MessageLog for MemoryStore {
    async fn record(&self, entry: &MessageLogEntry) -> Result<()> {
        self.messages.lock().push(entry.clone());
        Ok(())
    }

    async fn recent(&self, query: &MessageLogQuery) -> Result<Vec<MessageLogEntry>> {
        let messages = self.messages.lock();
        let mut matched: Vec<MessageLogEntry> = messages
            .iter()
            .filter(|m| {
                query
                    .device_id
                    .as_deref()
                    .map_or(true, |id| m.device_id == id)
                    && query.direction.map_or(true, |d| m.direction == d)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(query.limit);
        Ok(matched)
    }
}
