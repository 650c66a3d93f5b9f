use crate::errors::{Error, Result};
use crate::model::{
    AlertEvent, AlertLevel, AlertSnapshot, DeviceState, DeviceStatus, MessageDirection,
    MessageLogEntry, MessageLogQuery, MessageStatus, ReadingQuery, SensorReading,
};
use crate::store::{AlertStore, DeviceTracker, MessageLog, ReadingStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Postgres implementation of every store seam.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    device_id: String,
    device_name: String,
    status: String,
    last_seen: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for DeviceStatus {
    type Error = Error;

    fn try_from(row: DeviceRow) -> Result<Self> {
        let status = DeviceState::parse(&row.status).ok_or_else(|| {
            Error::Database(sqlx::Error::Decode(
                format!("unknown device status '{}'", row.status).into(),
            ))
        })?;
        Ok(DeviceStatus {
            device_id: row.device_id,
            device_name: row.device_name,
            status,
            last_seen: row.last_seen,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    device_id: String,
    level: String,
    temperature: Option<f64>,
    humidity: Option<f64>,
    gas_ppm: i64,
    ts: DateTime<Utc>,
    viewed: bool,
    viewed_at: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRow> for AlertEvent {
    type Error = Error;

    fn try_from(row: AlertRow) -> Result<Self> {
        let level = AlertLevel::parse(&row.level).ok_or_else(|| {
            Error::Database(sqlx::Error::Decode(
                format!("unknown alert level '{}'", row.level).into(),
            ))
        })?;
        Ok(AlertEvent {
            id: row.id,
            device_id: row.device_id,
            level,
            snapshot: AlertSnapshot {
                temperature: row.temperature,
                humidity: row.humidity,
                gas_ppm: row.gas_ppm,
            },
            timestamp: row.ts,
            viewed: row.viewed,
            viewed_at: row.viewed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    device_id: String,
    direction: String,
    topic: String,
    payload: String,
    status: String,
    error_message: Option<String>,
    ts: DateTime<Utc>,
}

impl TryFrom<MessageRow> for MessageLogEntry {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let direction = MessageDirection::parse(&row.direction).ok_or_else(|| {
            Error::Database(sqlx::Error::Decode(
                format!("unknown message direction '{}'", row.direction).into(),
            ))
        })?;
        let status = MessageStatus::parse(&row.status).ok_or_else(|| {
            Error::Database(sqlx::Error::Decode(
                format!("unknown message status '{}'", row.status).into(),
            ))
        })?;
        Ok(MessageLogEntry {
            id: row.id,
            device_id: row.device_id,
            direction,
            topic: row.topic,
            payload: row.payload,
            status,
            error_message: row.error_message,
            timestamp: row.ts,
        })
    }
}

const DEVICE_COLUMNS: &str = "device_id, device_name, status, last_seen";

#[async_trait]
impl ReadingStore for PgStore {
    async fn append(&self, reading: &SensorReading) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_readings (device_id, ts, temperature, humidity, gas_adc, gas_ppm, voltage, alarm)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&reading.device_id)
        .bind(reading.timestamp)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.gas_adc)
        .bind(reading.gas_ppm)
        .bind(reading.voltage)
        .bind(reading.alarm)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_per_device(&self) -> Result<Vec<SensorReading>> {
        let readings = sqlx::query_as::<_, SensorReading>(
            r#"
            SELECT DISTINCT ON (device_id)
                   device_id, ts AS timestamp, temperature, humidity, gas_adc, gas_ppm, voltage, alarm
            FROM sensor_readings
            ORDER BY device_id, ts DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(readings)
    }

    async fn recent(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>> {
        let readings = sqlx::query_as::<_, SensorReading>(
            r#"
            SELECT device_id, ts AS timestamp, temperature, humidity, gas_adc, gas_ppm, voltage, alarm
            FROM sensor_readings
            WHERE ($1::text IS NULL OR device_id = $1)
            ORDER BY ts DESC
            LIMIT $2
            "#,
        )
        .bind(query.device_id.as_deref())
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(readings)
    }
}

#[async_trait]
impl DeviceTracker for PgStore {
    async fn upsert(&self, device_id: &str, seen_at: DateTime<Utc>) -> Result<DeviceStatus> {
        let query = format!(
            r#"
            INSERT INTO devices (device_id, device_name, status, last_seen)
            VALUES ($1, $2, 'online', $3)
            ON CONFLICT (device_id) DO UPDATE
                SET status = 'online', last_seen = EXCLUDED.last_seen
            RETURNING {DEVICE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(device_id)
            .bind(DeviceStatus::default_name(device_id))
            .bind(seen_at)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn report_error(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DeviceStatus>> {
        let query = format!(
            "UPDATE devices SET status = 'error', last_seen = $2 WHERE device_id = $1 RETURNING {DEVICE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(device_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DeviceStatus::try_from).transpose()
    }

    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceStatus>> {
        let query = format!(
            "UPDATE devices SET status = 'offline' WHERE status = 'online' AND last_seen < $1 RETURNING {DEVICE_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DeviceStatus::try_from).collect()
    }

    async fn list(&self) -> Result<Vec<DeviceStatus>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY device_id");
        let rows = sqlx::query_as::<_, DeviceRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DeviceStatus::try_from).collect()
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn append(&self, alert: &AlertEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, device_id, level, temperature, humidity, gas_ppm, ts, viewed, viewed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(alert.id)
        .bind(&alert.device_id)
        .bind(alert.level.as_str())
        .bind(alert.snapshot.temperature)
        .bind(alert.snapshot.humidity)
        .bind(alert.snapshot.gas_ppm)
        .bind(alert.timestamp)
        .bind(alert.viewed)
        .bind(alert.viewed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, device_id: Option<&str>, limit: usize) -> Result<Vec<AlertEvent>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, device_id, level, temperature, humidity, gas_ppm, ts, viewed, viewed_at
            FROM alerts
            WHERE ($1::text IS NULL OR device_id = $1)
            ORDER BY ts DESC
            LIMIT $2
            "#,
        )
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertEvent::try_from).collect()
    }
}

#[async_trait]
impl MessageLog for PgStore {
    async fn record(&self, entry: &MessageLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mqtt_logs (id, device_id, direction, topic, payload, status, error_message, ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.device_id)
        .bind(entry.direction.as_str())
        .bind(&entry.topic)
        .bind(&entry.payload)
        .bind(entry.status.as_str())
        .bind(entry.error_message.as_deref())
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, query: &MessageLogQuery) -> Result<Vec<MessageLogEntry>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, device_id, direction, topic, payload, status, error_message, ts
            FROM mqtt_logs
            WHERE ($1::text IS NULL OR device_id = $1)
              AND ($2::text IS NULL OR direction = $2)
            ORDER BY ts DESC
            LIMIT $3
            "#,
        )
        .bind(query.device_id.as_deref())
        .bind(query.direction.map(MessageDirection::as_str))
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MessageLogEntry::try_from).collect()
    }
}
