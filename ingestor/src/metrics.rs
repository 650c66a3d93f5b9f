use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_messages_total",
        "Total messages received from MQTT"
    ))
    .expect("valid metric");
    pub static ref ACCEPTED_READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_accepted_readings_total",
        "Total payloads decoded into sensor readings"
    ))
    .expect("valid metric");
    pub static ref REJECTED_PAYLOADS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_rejected_payloads_total",
        "Total payloads dropped by the parser"
    ))
    .expect("valid metric");
    pub static ref INGEST_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_ingest_dropped_total",
        "Messages dropped because the ingest queue was full"
    ))
    .expect("valid metric");
    pub static ref STORE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_store_failures_total",
        "Failed store writes (readings, devices, alerts)"
    ))
    .expect("valid metric");
    pub static ref OUTBOX_RETRIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_outbox_retries_total",
        "Write attempts made by the retry outbox"
    ))
    .expect("valid metric");
    pub static ref OUTBOX_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_outbox_dropped_total",
        "Writes abandoned by the retry outbox"
    ))
    .expect("valid metric");
    pub static ref ALERTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("relawand_alerts_total", "Alerts emitted by level"),
        &["level"]
    )
    .expect("valid metric");
    pub static ref CONNECTED_VIEWERS: IntGauge = IntGauge::with_opts(Opts::new(
        "relawand_connected_viewers",
        "Realtime viewer connections"
    ))
    .expect("valid metric");
    pub static ref VIEWER_EVENTS_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_viewer_events_dropped_total",
        "Events skipped for viewers whose queue was full"
    ))
    .expect("valid metric");
    pub static ref MQTT_CONNECTED: Gauge = Gauge::with_opts(Opts::new(
        "relawand_mqtt_connected",
        "1 while the broker connection is up"
    ))
    .expect("valid metric");
    pub static ref MQTT_RECONNECTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relawand_mqtt_reconnects_total",
        "Broker reconnect attempts"
    ))
    .expect("valid metric");
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACCEPTED_READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_PAYLOADS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OUTBOX_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OUTBOX_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONNECTED_VIEWERS.clone()))?;
    REGISTRY.register(Box::new(VIEWER_EVENTS_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MQTT_CONNECTED.clone()))?;
    REGISTRY.register(Box::new(MQTT_RECONNECTS_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
