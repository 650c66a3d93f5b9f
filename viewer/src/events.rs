//! Frames exchanged with the ingestor's `/ws` endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Normal,
    Siaga,
    Darurat,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Snapshot {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_ppm: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alert {
    pub id: String,
    pub device_id: String,
    pub level: Level,
    pub snapshot: Snapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_ppm: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub device_name: String,
    pub status: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitialData {
    #[serde(default)]
    pub readings: Vec<Reading>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    SensorData(Reading),
    Alert(Alert),
    DeviceStatus(Device),
    InitialData(InitialData),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "subscribe:device")]
    SubscribeDevice(String),
    #[serde(rename = "subscribe:all-devices")]
    SubscribeAllDevices,
}
