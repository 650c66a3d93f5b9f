use crate::broadcast::Broadcaster;
use crate::model::{
    AlertEvent, DeviceStatus, ListResponse, MessageDirection, MessageLogEntry, MessageLogQuery,
    ReadingQuery, SensorReading,
};
use crate::mqtt::TransportHandle;
use crate::store::Stores;
use crate::ws::ws_handler;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub broadcaster: Broadcaster,
    pub transport: TransportHandle,
    /// Attributed to published messages that name no device.
    pub default_device_id: String,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    device_id: Option<String>,
    limit: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageLogParams {
    device_id: Option<String>,
    #[serde(rename = "type")]
    direction: Option<MessageDirection>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceErrorReport {
    error_code: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    topic: Option<String>,
    device_id: Option<String>,
    /// A JSON string is sent verbatim, anything else is serialized.
    message: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    topic: String,
    bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    mqtt_connected: bool,
    viewers: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/v1/readings", get(get_readings))
        .route("/api/v1/alerts", get(get_alerts))
        .route("/api/v1/devices", get(get_devices))
        .route("/api/v1/devices/:device_id/error", post(report_device_error))
        .route("/api/v1/mqtt/publish", post(publish_message))
        .route("/api/v1/mqtt/logs", get(get_message_logs))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mqtt_connected: state.transport.is_connected(),
        viewers: state.broadcaster.connection_count(),
    })
}

async fn get_readings(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<ListResponse<SensorReading>>, AppError> {
    let limit = params.limit();
    let query = ReadingQuery {
        device_id: params.device_id,
        limit,
    };
    let data = state.stores.readings.recent(&query).await?;

    Ok(Json(ListResponse {
        total: data.len(),
        data,
        limit,
    }))
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<ListResponse<AlertEvent>>, AppError> {
    let limit = params.limit();
    let data = state
        .stores
        .alerts
        .recent(params.device_id.as_deref(), limit)
        .await?;

    Ok(Json(ListResponse {
        total: data.len(),
        data,
        limit,
    }))
}

async fn get_devices(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<DeviceStatus>>, AppError> {
    let data = state.stores.devices.list().await?;

    Ok(Json(ListResponse {
        total: data.len(),
        limit: data.len(),
        data,
    }))
}

async fn report_device_error(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    report: Option<Json<DeviceErrorReport>>,
) -> Result<Json<DeviceStatus>, AppError> {
    let report = report.map(|Json(r)| r).unwrap_or_default();

    let status = state
        .stores
        .devices
        .report_error(&device_id, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("device {} not found", device_id)))?;

    warn!(
        "Device {} reported error {}: {}",
        device_id,
        report.error_code.as_deref().unwrap_or("-"),
        report.error_message.as_deref().unwrap_or("Unknown error")
    );
    state.broadcaster.publish_device_status(&status);

    Ok(Json(status))
}

async fn publish_message(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, AppError> {
    let topic = request
        .topic
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| state.transport.topic().to_string());
    let payload = match request.message {
        serde_json::Value::String(text) => text.into_bytes(),
        other => serde_json::to_vec(&other)?,
    };
    let device_id = request
        .device_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| state.default_device_id.clone());
    let entry = MessageLogEntry::new(MessageDirection::Sent, device_id, &topic, &payload);

    if !state.transport.is_connected() {
        let reason = "not connected to MQTT broker";
        log_sent(&state, &entry.failed(reason)).await;
        return Err(AppError::Unavailable(reason.to_string()));
    }

    let bytes = payload.len();
    if let Err(e) = state.transport.publish(&topic, payload).await {
        log_sent(&state, &entry.failed(e.to_string())).await;
        return Err(e.into());
    }
    log_sent(&state, &entry).await;

    Ok(Json(PublishResponse { topic, bytes }))
}

async fn log_sent(state: &AppState, entry: &MessageLogEntry) {
    if let Err(e) = state.stores.messages.record(entry).await {
        warn!("Failed to log message sent to {}: {}", entry.topic, e);
    }
}

async fn get_message_logs(
    State(state): State<AppState>,
    Query(params): Query<MessageLogParams>,
) -> Result<Json<ListResponse<MessageLogEntry>>, AppError> {
    let limit = clamp_limit(params.limit);
    let query = MessageLogQuery {
        device_id: params.device_id,
        direction: params.direction,
        limit,
    };
    let data = state.stores.messages.recent(&query).await?;

    Ok(Json(ListResponse {
        total: data.len(),
        data,
        limit,
    }))
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            AppError::Internal(e) => {
                error!("API error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {}", e),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
