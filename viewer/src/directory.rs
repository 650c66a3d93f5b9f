use crate::events::Device;
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Device id to display name, refreshed from the ingestor's device list.
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    names: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    data: Vec<Device>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Falls back to the id for devices not seen yet.
    pub fn name_of(&self, device_id: &str) -> String {
        self.names
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| device_id.to_string())
    }

    pub fn learn(&mut self, device: &Device) {
        self.names
            .insert(device.device_id.clone(), device.device_name.clone());
    }

    pub fn replace(&mut self, devices: &[Device]) {
        self.names = devices
            .iter()
            .map(|d| (d.device_id.clone(), d.device_name.clone()))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

pub async fn fetch_devices(client: &reqwest::Client, server: &str) -> Result<Vec<Device>> {
    let url = format!("{}/api/v1/devices", server.trim_end_matches('/'));
    let list: DeviceList = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(list.data)
}

/// Reloads the device list every `every` and hands each result to `tx`.
/// Returns once the receiving side is gone.
pub async fn refresh_devices(
    client: reqwest::Client,
    server: String,
    every: Duration,
    tx: mpsc::Sender<Vec<Device>>,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match fetch_devices(&client, &server).await {
            Ok(devices) => {
                if tx.send(devices).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("Failed to refresh device names: {:#}", e),
        }
    }
}
