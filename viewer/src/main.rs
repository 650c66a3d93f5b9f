mod directory;
mod events;
mod gate;

use anyhow::{Context, Result};
use clap::Parser;
use directory::{http_client, refresh_devices, DeviceDirectory, HTTP_TIMEOUT};
use events::{ClientEvent, Device, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use gate::{AlertGate, CooldownScope, SurfacedAlert};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relawand-viewer", about = "Watches Relawand alerts over the realtime socket")]
struct Args {
    /// Base URL of the ingestor HTTP server.
    #[arg(long, env = "VIEWER_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Watch only these devices instead of all of them.
    #[arg(long = "device")]
    devices: Vec<String>,

    #[arg(long, env = "ALERT_COOLDOWN_SECS", default_value_t = 60)]
    cooldown_secs: u64,

    #[arg(long, env = "ALERT_COOLDOWN_SCOPE", value_enum, default_value_t = CooldownScope::Global)]
    cooldown_scope: CooldownScope,

    /// How often the device name table is reloaded.
    #[arg(long, env = "DEVICE_REFRESH_SECS", default_value_t = 30)]
    refresh_secs: u64,

    #[arg(long, env = "VIEWER_RECONNECT_MS", default_value_t = 3000)]
    reconnect_ms: u64,
}

impl Args {
    fn ws_url(&self) -> String {
        let base = self.server.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", base)
    }

    fn subscriptions(&self) -> Vec<ClientEvent> {
        if self.devices.is_empty() {
            vec![ClientEvent::SubscribeAllDevices]
        } else {
            self.devices
                .iter()
                .cloned()
                .map(ClientEvent::SubscribeDevice)
                .collect()
        }
    }
}

struct Viewer {
    gate: AlertGate,
    directory: DeviceDirectory,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(
        "Starting Relawand viewer against {} (cooldown {}s, {:?})",
        args.server, args.cooldown_secs, args.cooldown_scope
    );

    let http = match http_client(HTTP_TIMEOUT) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let (devices_tx, mut devices_rx) = mpsc::channel(1);
    tokio::spawn(refresh_devices(
        http,
        args.server.clone(),
        Duration::from_secs(args.refresh_secs.max(1)),
        devices_tx,
    ));

    let mut viewer = Viewer {
        gate: AlertGate::new(Duration::from_secs(args.cooldown_secs), args.cooldown_scope),
        directory: DeviceDirectory::new(),
    };

    loop {
        match run_session(&args, &mut viewer, &mut devices_rx).await {
            Ok(()) => warn!("Realtime connection closed"),
            Err(e) => error!("Realtime connection failed: {:#}", e),
        }
        tokio::time::sleep(Duration::from_millis(args.reconnect_ms)).await;
        info!("Reconnecting to {}", args.ws_url());
    }
}

async fn run_session(
    args: &Args,
    viewer: &mut Viewer,
    devices: &mut mpsc::Receiver<Vec<Device>>,
) -> Result<()> {
    let url = args.ws_url();
    let (socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {}", url))?;
    info!("Connected to {}", url);

    let (mut sink, mut stream) = socket.split();
    for subscription in args.subscriptions() {
        sink.send(Message::Text(serde_json::to_string(&subscription)?))
            .await?;
    }

    loop {
        tokio::select! {
            Some(list) = devices.recv() => {
                viewer.directory.replace(&list);
                debug!("Device table holds {} names", viewer.directory.len());
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => viewer.on_frame(&text),
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

impl Viewer {
    fn on_frame(&mut self, text: &str) {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Ignoring frame: {}", e);
                return;
            }
        };

        match event {
            ServerEvent::Alert(alert) => {
                let id = alert.id.clone();
                match self.gate.offer(alert, &self.directory, Instant::now()) {
                    Some(surfaced) => show(&surfaced),
                    None => debug!("Alert {} suppressed", id),
                }
            }
            ServerEvent::DeviceStatus(device) => {
                info!("{} is {}", device.device_name, device.status);
                self.directory.learn(&device);
            }
            ServerEvent::InitialData(data) => {
                for device in &data.devices {
                    self.directory.learn(device);
                }
                info!(
                    "Initial state: {} readings, {} devices",
                    data.readings.len(),
                    data.devices.len()
                );
            }
            ServerEvent::SensorData(reading) => {
                debug!(
                    "{} at {}: temp {:?}, humidity {:?}, gas {} ppm",
                    reading.device_id,
                    reading.timestamp,
                    reading.temperature,
                    reading.humidity,
                    reading.gas_ppm
                );
            }
        }
    }
}

fn show(surfaced: &SurfacedAlert) {
    let alert = &surfaced.alert;
    warn!(
        "{:?} on {} at {}: gas {} ppm, temp {}, humidity {}",
        alert.level,
        surfaced.device_name,
        alert.timestamp,
        alert.snapshot.gas_ppm,
        alert
            .snapshot
            .temperature
            .map_or_else(|| "n/a".to_string(), |t| format!("{:.1}°C", t)),
        alert
            .snapshot
            .humidity
            .map_or_else(|| "n/a".to_string(), |h| format!("{:.0}%", h)),
    );
}
