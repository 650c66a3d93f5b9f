use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One accepted sensor sample. Built only by the payload parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SensorReading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    /// `None` when the device reports a sensor fault.
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_adc: i64,
    pub gas_ppm: i64,
    pub voltage: f64,
    pub alarm: bool,
}

/// Overall classification tier of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Normal,
    Siaga,
    Darurat,
}

impl Severity {
    /// The alert level for this tier, `None` for NORMAL.
    pub fn alert_level(self) -> Option<AlertLevel> {
        match self {
            Severity::Normal => None,
            Severity::Siaga => Some(AlertLevel::Siaga),
            Severity::Darurat => Some(AlertLevel::Darurat),
        }
    }
}

/// Level carried by a persisted alert. NORMAL is unrepresentable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Siaga,
    Darurat,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Siaga => "SIAGA",
            AlertLevel::Darurat => "DARURAT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SIAGA" => Some(AlertLevel::Siaga),
            "DARURAT" => Some(AlertLevel::Darurat),
            _ => None,
        }
    }
}

impl From<AlertLevel> for Severity {
    fn from(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Siaga => Severity::Siaga,
            AlertLevel::Darurat => Severity::Darurat,
        }
    }
}

/// The dimensions of a reading an alert level is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertSnapshot {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_ppm: i64,
}

impl From<&SensorReading> for AlertSnapshot {
    fn from(reading: &SensorReading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            gas_ppm: reading.gas_ppm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub device_id: String,
    pub level: AlertLevel,
    pub snapshot: AlertSnapshot,
    pub timestamp: DateTime<Utc>,
    pub viewed: bool,
    pub viewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
    Error,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Online => "online",
            DeviceState::Offline => "offline",
            DeviceState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(DeviceState::Online),
            "offline" => Some(DeviceState::Offline),
            "error" => Some(DeviceState::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub device_name: String,
    pub status: DeviceState,
    pub last_seen: DateTime<Utc>,
}

impl DeviceStatus {
    /// Display name given to devices first seen on the topic.
    pub fn default_name(device_id: &str) -> String {
        format!("Device {}", device_id)
    }
}

/// Raw message handed from the transport to the ingestor.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Filters for reading history queries.
#[derive(Debug, Clone, Default)]
pub struct ReadingQuery {
    pub device_id: Option<String>,
    pub limit: usize,
}

/// Which way a logged MQTT message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageDirection {
    Sent,
    Received,
}

impl MessageDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageDirection::Sent => "SENT",
            MessageDirection::Received => "RECEIVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(MessageDirection::Sent),
            "RECEIVED" => Some(MessageDirection::Received),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Success,
    Error,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Success => "success",
            MessageStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(MessageStatus::Success),
            "error" => Some(MessageStatus::Error),
            _ => None,
        }
    }
}

/// One row of the MQTT communication log. The payload is kept as text,
/// invalid UTF-8 replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub id: Uuid,
    pub device_id: String,
    #[serde(rename = "type")]
    pub direction: MessageDirection,
    pub topic: String,
    pub payload: String,
    pub status: MessageStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MessageLogEntry {
    pub fn new(
        direction: MessageDirection,
        device_id: impl Into<String>,
        topic: impl Into<String>,
        payload: &[u8],
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            direction,
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            status: MessageStatus::Success,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.status = MessageStatus::Error;
        self.error_message = Some(reason.into());
        self
    }
}

/// Filters for message log queries.
#[derive(Debug, Clone, Default)]
pub struct MessageLogQuery {
    pub device_id: Option<String>,
    pub direction: Option<MessageDirection>,
    pub limit: usize,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub limit: usize,
}
