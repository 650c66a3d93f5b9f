use axum::{routing::get, Router};
use relawand_ingestor::broadcast::Broadcaster;
use relawand_ingestor::config::{Config, StoreBackend};
use relawand_ingestor::outbox::{run_outbox, Outbox, RetryPolicy};
use relawand_ingestor::pipeline::{run_ingestor, Ingestor};
use relawand_ingestor::rest::{self, AppState};
use relawand_ingestor::store::{MemoryStore, Stores};
use relawand_ingestor::{db, liveness, metrics, mqtt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Relawand ingestor");
    info!(
        "MQTT broker: {}:{}, topic: {}",
        config.mqtt.host, config.mqtt.port, config.mqtt.topic
    );
    info!("HTTP server: {}", config.http_addr);

    // Initialize metrics
    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let stores = match config.store_backend {
        StoreBackend::Postgres => {
            info!(
                "Database: {}",
                config.database_url.split('@').last().unwrap_or("***")
            );
            match db::make_pool(&config.database_url).await {
                Ok(pool) => Stores::shared(Arc::new(db::PgStore::new(pool))),
                Err(e) => {
                    error!("Failed to connect to database: {}", e);
                    std::process::exit(1);
                }
            }
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store, nothing survives a restart");
            Stores::shared(Arc::new(MemoryStore::new()))
        }
    };

    let broadcaster = Broadcaster::new(config.viewer_queue);
    match (
        stores.readings.latest_per_device().await,
        stores.devices.list().await,
    ) {
        (Ok(readings), Ok(devices)) => {
            info!(
                "Loaded {} latest readings and {} devices",
                readings.len(),
                devices.len()
            );
            broadcaster.prime(readings, devices);
        }
        (Err(e), _) | (_, Err(e)) => warn!("Starting with an empty snapshot: {}", e),
    }

    let (outbox, outbox_rx) = Outbox::new(config.outbox_capacity);
    let policy = RetryPolicy {
        max_attempts: config.outbox_max_attempts,
        ..RetryPolicy::default()
    };
    let outbox_handle = tokio::spawn(run_outbox(
        outbox_rx,
        stores.readings.clone(),
        stores.alerts.clone(),
        policy,
    ));

    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let (transport, eventloop) = mqtt::connect(&config.mqtt);
    let mqtt_transport = transport.clone();
    let reconnect_period = config.mqtt.reconnect_period;
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(mqtt_transport, eventloop, reconnect_period, tx).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let ingestor = Arc::new(Ingestor::new(
        config.default_device_id.clone(),
        stores.clone(),
        broadcaster.clone(),
        outbox,
    ));
    let ingestor_handle = tokio::spawn(run_ingestor(ingestor, rx));

    let liveness_handle = tokio::spawn(liveness::run_liveness(
        stores.devices.clone(),
        broadcaster.clone(),
        config.offline_after,
        config.liveness_interval,
    ));

    // Build HTTP app with REST API, realtime socket and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(AppState {
            stores,
            broadcaster,
            transport,
            default_device_id: config.default_device_id.clone(),
        }));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = ingestor_handle => {
            error!("Ingestor task terminated");
        }
        _ = outbox_handle => {
            error!("Retry outbox terminated");
        }
        _ = liveness_handle => {
            error!("Liveness sweeper terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
