use crate::broadcast::{Broadcaster, ConnectionId, Room};
use crate::rest::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

/// Viewer to server events, framed as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "subscribe:device", alias = "subscribe-device")]
    SubscribeDevice(String),
    #[serde(rename = "subscribe:all-devices")]
    SubscribeAllDevices,
    #[serde(rename = "unsubscribe:device", alias = "unsubscribe-device")]
    UnsubscribeDevice(String),
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_viewer(socket, state.broadcaster))
}

async fn serve_viewer(socket: WebSocket, broadcaster: Broadcaster) {
    let (id, mut events) = broadcaster.connect();
    info!("Viewer {} connected", id);

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode event for viewer: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let hub = broadcaster.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => handle_frame(&hub, id, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    broadcaster.disconnect(id);
    info!("Viewer {} disconnected", id);
}

fn handle_frame(hub: &Broadcaster, id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => apply(hub, id, event),
        Err(e) => warn!("Ignoring frame from viewer {}: {}", id, e),
    }
}

pub fn apply(hub: &Broadcaster, id: ConnectionId, event: ClientEvent) {
    debug!("Viewer {} sent {:?}", id, event);
    match event {
        ClientEvent::SubscribeDevice(device_id) => {
            hub.subscribe(id, Room::Device(device_id));
        }
        ClientEvent::SubscribeAllDevices => {
            hub.subscribe(id, Room::AllDevices);
        }
        ClientEvent::UnsubscribeDevice(device_id) => {
            hub.unsubscribe(id, &Room::Device(device_id));
        }
    }
}
