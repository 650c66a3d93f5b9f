mod telemetry;

use clap::Parser;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use telemetry::ReadingGenerator;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relawand-simulator", about = "Publishes synthetic Relawand sensor readings")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    #[arg(long, env = "MQTT_TOPIC", default_value = "Relawand")]
    topic: String,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,

    /// Number of simulated boards.
    #[arg(long, env = "DEVICES", default_value_t = 3)]
    devices: usize,

    #[arg(long, env = "DEVICE_PREFIX", default_value = "STM32-")]
    device_prefix: String,

    /// Delay between two readings of the same board.
    #[arg(long, env = "INTERVAL_MS", default_value_t = 2000)]
    interval_ms: u64,

    #[arg(long, env = "SIAGA_RATE", default_value_t = 0.05)]
    siaga_rate: f64,

    #[arg(long, env = "DARURAT_RATE", default_value_t = 0.02)]
    darurat_rate: f64,

    /// Probability of a DHT fault (null temperature and humidity).
    #[arg(long, env = "FAULT_RATE", default_value_t = 0.02)]
    fault_rate: f64,

    /// Stop after this many rounds. Runs forever when unset.
    #[arg(long)]
    rounds: Option<u64>,

    /// Publish this literal payload once and exit.
    #[arg(long)]
    payload: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting Relawand simulator");
    info!("Broker: {}:{}, topic: {}", args.broker, args.port, args.topic);

    let client_id = format!("relawand-sim-{}", uuid::Uuid::new_v4().simple());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);
    if let Some(username) = &args.username {
        mqtt_options.set_credentials(username, args.password.clone().unwrap_or_default());
    }

    let (client, eventloop) = AsyncClient::new(mqtt_options, 1000);

    match args.payload.clone() {
        Some(payload) => inject(&client, eventloop, &args.topic, payload).await,
        None => simulate(&client, eventloop, &args).await,
    }
}

/// One-shot publish. Waits for the broker's ack so the process does not exit
/// with the message still queued.
async fn inject(client: &AsyncClient, mut eventloop: EventLoop, topic: &str, payload: String) {
    if serde_json::from_str::<serde_json::Value>(&payload).is_err() {
        warn!("Payload is not valid JSON, the ingestor will drop it");
    }

    if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload.into_bytes()).await {
        error!("Failed to queue payload: {}", e);
        std::process::exit(1);
    }

    let acked = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match acked {
        Ok(Ok(())) => info!("Payload published to {}", topic),
        Ok(Err(e)) => {
            error!("MQTT connection failed: {}", e);
            std::process::exit(1);
        }
        Err(_) => {
            error!("Timed out waiting for broker acknowledgement");
            std::process::exit(1);
        }
    }
}

async fn simulate(client: &AsyncClient, mut eventloop: EventLoop, args: &Args) {
    // Spawn eventloop handler
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let generator = ReadingGenerator {
        siaga_rate: args.siaga_rate,
        darurat_rate: args.darurat_rate,
        fault_rate: args.fault_rate,
    };
    let device_ids: Vec<String> = (1..=args.devices.max(1))
        .map(|n| format!("{}{:03}", args.device_prefix, n))
        .collect();

    info!(
        "Simulating {} devices every {}ms",
        device_ids.len(),
        args.interval_ms
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut round = 0u64;
    let mut published = 0u64;

    loop {
        ticker.tick().await;
        if args.rounds.is_some_and(|limit| round >= limit) {
            break;
        }
        round += 1;

        for device_id in &device_ids {
            // ThreadRng is not Send, keep it out of the await points.
            let reading = generator.generate(&mut rand::thread_rng(), device_id.clone());
            let payload = match serde_json::to_vec(&reading) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to serialize reading: {}", e);
                    continue;
                }
            };

            match client.publish(&args.topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => published += 1,
                Err(e) => warn!("Failed to publish: {}", e),
            }
        }

        if round % 30 == 0 {
            info!("Published {} readings", published);
        }
    }

    // Give the event loop a moment to flush the last round.
    tokio::time::sleep(Duration::from_millis(500)).await;
    info!("Done, published {} readings", published);
}
