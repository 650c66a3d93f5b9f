//! Room-based fan-out to realtime viewers.
//!
//! Every viewer connection owns a bounded outbound queue. Rooms map to sets
//! of connections: one room per device plus a global room. The membership
//! table and the last-known state used for the initial push live behind a
//! single mutex, and events are queued while it is held so every viewer sees
//! events in publish order.

use crate::metrics::{CONNECTED_VIEWERS, VIEWER_EVENTS_DROPPED_TOTAL};
use crate::model::{AlertEvent, DeviceState, DeviceStatus, SensorReading};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Device(String),
    AllDevices,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Device(id) => write!(f, "device:{}", id),
            Room::AllDevices => f.write_str("all-devices"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// State pushed to a viewer as soon as it joins a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialSnapshot {
    pub readings: Vec<SensorReading>,
    pub devices: Vec<DeviceStatus>,
}

/// Server to viewer events, framed as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    SensorData(SensorReading),
    Alert(AlertEvent),
    DeviceStatus(DeviceStatus),
    InitialData(InitialSnapshot),
}

#[derive(Default)]
struct State {
    connections: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    rooms: HashMap<Room, BTreeSet<ConnectionId>>,
    latest_readings: HashMap<String, SensorReading>,
    device_status: HashMap<String, DeviceStatus>,
}

impl State {
    fn snapshot_for(&self, room: &Room) -> InitialSnapshot {
        match room {
            Room::Device(device_id) => InitialSnapshot {
                readings: self.latest_readings.get(device_id).cloned().into_iter().collect(),
                devices: self.device_status.get(device_id).cloned().into_iter().collect(),
            },
            Room::AllDevices => {
                let mut readings: Vec<SensorReading> =
                    self.latest_readings.values().cloned().collect();
                readings.sort_by(|a, b| a.device_id.cmp(&b.device_id));
                let mut devices: Vec<DeviceStatus> =
                    self.device_status.values().cloned().collect();
                devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
                InitialSnapshot { readings, devices }
            }
        }
    }

    fn remember_reading(&mut self, reading: &SensorReading) {
        let newer = self
            .latest_readings
            .get(&reading.device_id)
            .map_or(true, |current| reading.timestamp >= current.timestamp);
        if newer {
            self.latest_readings
                .insert(reading.device_id.clone(), reading.clone());
        }
    }

    /// Queues `event` for every member of the device room and the global
    /// room, once per connection.
    fn fan_out(&mut self, device_id: &str, event: ServerEvent) {
        let mut targets: BTreeSet<ConnectionId> = BTreeSet::new();
        if let Some(members) = self.rooms.get(&Room::Device(device_id.to_string())) {
            targets.extend(members.iter().copied());
        }
        if let Some(members) = self.rooms.get(&Room::AllDevices) {
            targets.extend(members.iter().copied());
        }

        let closed: Vec<ConnectionId> = targets
            .into_iter()
            .filter(|id| !self.send_to(*id, event.clone()))
            .collect();

        for id in closed {
            self.remove(id);
        }
    }

    /// Returns false once the viewer has gone away.
    fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let Some(tx) = self.connections.get(&id) else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                VIEWER_EVENTS_DROPPED_TOTAL.inc();
                debug!("Viewer {} queue full, event skipped", id);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn remove(&mut self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            debug!("Viewer {} removed", id);
        }
        self.rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        CONNECTED_VIEWERS.set(self.connections.len() as i64);
    }
}

/// Owned fan-out hub. Cloning yields another handle to the same rooms.
#[derive(Clone)]
pub struct Broadcaster {
    state: Arc<Mutex<State>>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Seeds the last-known state, typically from the store at startup.
    pub fn prime(&self, readings: Vec<SensorReading>, devices: Vec<DeviceStatus>) {
        let mut state = self.state.lock();
        for reading in &readings {
            state.remember_reading(reading);
        }
        for device in devices {
            state.device_status.insert(device.device_id.clone(), device);
        }
    }

    /// Registers a viewer and returns the receiving end of its queue.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut state = self.state.lock();
        state.connections.insert(id, tx);
        CONNECTED_VIEWERS.set(state.connections.len() as i64);
        (id, rx)
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.state.lock().remove(id);
    }

    /// Joins `room` and immediately queues the last-known state for it.
    /// Returns false for an unknown connection.
    pub fn subscribe(&self, id: ConnectionId, room: Room) -> bool {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&id) {
            return false;
        }
        let snapshot = state.snapshot_for(&room);
        debug!("Viewer {} joined {}", id, room);
        state.rooms.entry(room).or_default().insert(id);
        if !state.send_to(id, ServerEvent::InitialData(snapshot)) {
            state.remove(id);
            return false;
        }
        true
    }

    /// Returns whether the connection was a member of `room`.
    pub fn unsubscribe(&self, id: ConnectionId, room: &Room) -> bool {
        let mut state = self.state.lock();
        let Some(members) = state.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            state.rooms.remove(room);
        }
        if removed {
            debug!("Viewer {} left {}", id, room);
        }
        removed
    }

    pub fn publish_reading(&self, reading: &SensorReading) {
        let mut state = self.state.lock();
        state.remember_reading(reading);
        state.fan_out(&reading.device_id, ServerEvent::SensorData(reading.clone()));
    }

    pub fn publish_alert(&self, alert: &AlertEvent) {
        self.state
            .lock()
            .fan_out(&alert.device_id, ServerEvent::Alert(alert.clone()));
    }

    pub fn publish_device_status(&self, status: &DeviceStatus) {
        let mut state = self.state.lock();
        state
            .device_status
            .insert(status.device_id.clone(), status.clone());
        state.fan_out(&status.device_id, ServerEvent::DeviceStatus(status.clone()));
    }

    pub fn last_status(&self, device_id: &str) -> Option<DeviceState> {
        self.state
            .lock()
            .device_status
            .get(device_id)
            .map(|d| d.status)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn room_size(&self, room: &Room) -> usize {
        self.state.lock().rooms.get(room).map_or(0, BTreeSet::len)
    }
}
