use crate::config::MqttConfig;
use crate::errors::{Error, Result};
use crate::metrics::{INGEST_DROPPED_TOTAL, MESSAGES_TOTAL, MQTT_CONNECTED, MQTT_RECONNECTS_TOTAL};
use crate::model::InboundMessage;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Cloneable handle to the broker connection, shared with the REST layer.
#[derive(Clone)]
pub struct TransportHandle {
    client: AsyncClient,
    topic: String,
    connected: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes raw bytes, used to inject synthetic readings.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let size = payload.len();
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        info!("Published {} bytes to {}", size, topic);
        Ok(())
    }
}

/// Builds the client and its event loop. Nothing touches the network until
/// the loop is polled by [`run_mqtt`].
pub fn connect(config: &MqttConfig) -> (TransportHandle, EventLoop) {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
    mqtt_options.set_keep_alive(config.keep_alive);
    // Messages published while we are away are not wanted.
    mqtt_options.set_clean_session(true);
    if let Some((username, password)) = &config.credentials {
        mqtt_options.set_credentials(username, password);
    }

    let (client, eventloop) = AsyncClient::new(mqtt_options, 64);
    let handle = TransportHandle {
        client,
        topic: config.topic.clone(),
        connected: Arc::new(AtomicBool::new(false)),
    };
    (handle, eventloop)
}

/// What the run loop should do after an event.
#[derive(Debug)]
enum Step {
    Subscribe,
    Forward(InboundMessage),
    Idle,
}

/// Connection bookkeeping, kept apart from the socket so it can be tested.
struct Session {
    topic: String,
    connected: Arc<AtomicBool>,
    ever_connected: bool,
    reconnect_period: Duration,
}

impl Session {
    fn new(handle: &TransportHandle, reconnect_period: Duration) -> Self {
        Self {
            topic: handle.topic.clone(),
            connected: handle.connected.clone(),
            ever_connected: false,
            reconnect_period,
        }
    }

    fn set_connected(&self, up: bool) {
        self.connected.store(up, Ordering::Release);
        MQTT_CONNECTED.set(if up { 1.0 } else { 0.0 });
    }

    fn on_event(&mut self, event: Event) -> Step {
        let Event::Incoming(packet) = event else {
            return Step::Idle;
        };

        match packet {
            Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
                info!("Connected to broker");
                self.ever_connected = true;
                self.set_connected(true);
                Step::Subscribe
            }
            Packet::SubAck(ack) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    error!("Broker rejected subscription to {}", self.topic);
                } else {
                    info!("Subscribed to {}", self.topic);
                }
                Step::Idle
            }
            Packet::Publish(publish) => {
                MESSAGES_TOTAL.inc();
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );
                Step::Forward(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                })
            }
            Packet::Disconnect => {
                warn!("Broker closed the session");
                self.set_connected(false);
                Step::Idle
            }
            _ => Step::Idle,
        }
    }

    /// Returns how long to wait before the next attempt, or a fatal error.
    fn on_error(&mut self, err: &ConnectionError) -> Result<Duration> {
        let was_connected = self.connected.load(Ordering::Acquire);
        self.set_connected(false);

        if let ConnectionError::ConnectionRefused(code) = err {
            let auth_failure = matches!(
                code,
                ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized
            );
            if auth_failure && !self.ever_connected {
                return Err(Error::BrokerRejected(format!("{:?}", code)));
            }
        }

        if was_connected {
            warn!("Disconnected from broker: {}", err);
        } else {
            debug!("Broker still unreachable: {}", err);
        }
        MQTT_RECONNECTS_TOTAL.inc();
        Ok(self.reconnect_period)
    }
}

/// Drives the broker connection forever.
///
/// The topic is (re)subscribed after every successful connect. Connection
/// errors are retried on a fixed period; only an authentication refusal
/// before the first successful connect ends the loop. Messages that arrive
/// while the ingest queue is full are dropped.
pub async fn run_mqtt(
    handle: TransportHandle,
    mut eventloop: EventLoop,
    reconnect_period: Duration,
    tx: mpsc::Sender<InboundMessage>,
) -> Result<()> {
    info!("Starting MQTT session for topic {}", handle.topic);

    let mut session = Session::new(&handle, reconnect_period);

    loop {
        match eventloop.poll().await {
            Ok(event) => match session.on_event(event) {
                Step::Subscribe => {
                    if let Err(e) = handle.client.try_subscribe(&session.topic, QoS::AtMostOnce) {
                        error!("Failed to request subscription to {}: {}", session.topic, e);
                    }
                }
                Step::Forward(message) => forward(&tx, message)?,
                Step::Idle => {}
            },
            Err(e) => {
                let wait = session.on_error(&e)?;
                tokio::time::sleep(wait).await;
            }
        }
    }
}

fn forward(tx: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> Result<()> {
    match tx.try_send(message) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(message)) => {
            INGEST_DROPPED_TOTAL.inc();
            warn!("Ingest queue full, dropping message on {}", message.topic);
            Ok(())
        }
        Err(TrySendError::Closed(_)) => {
            error!("Ingest queue closed, stopping transport");
            Err(Error::ChannelSend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish, SubAck};

    fn session() -> (Session, TransportHandle) {
        let config = MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            topic: "Relawand".to_string(),
            client_id: "test-client".to_string(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            reconnect_period: Duration::from_millis(1000),
        };
        let (handle, _eventloop) = connect(&config);
        (Session::new(&handle, config.reconnect_period), handle)
    }

    fn connack(code: ConnectReturnCode) -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck::new(code, false)))
    }

    fn io_error() -> ConnectionError {
        ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "broker down",
        ))
    }

    #[test]
    fn test_connack_subscribes_and_sets_flag() {
        tokio_test::block_on(async {
            let (mut session, handle) = session();
            assert!(!handle.is_connected());

            assert!(matches!(session.on_event(connack(ConnectReturnCode::Success)), Step::Subscribe));
            assert!(handle.is_connected());
        });
    }

    #[test]
    fn test_reconnect_resubscribes_and_resumes_flow() {
        tokio_test::block_on(async {
            let (mut session, handle) = session();
            session.on_event(connack(ConnectReturnCode::Success));

            let wait = session.on_error(&io_error()).unwrap();
            assert_eq!(wait, Duration::from_millis(1000));
            assert!(!handle.is_connected());

            // Fixed period, no backoff growth.
            assert_eq!(session.on_error(&io_error()).unwrap(), wait);

            assert!(matches!(session.on_event(connack(ConnectReturnCode::Success)), Step::Subscribe));
            assert!(handle.is_connected());

            let publish = Publish::new("Relawand", QoS::AtMostOnce, br#"{"gas_ppm":1}"#.to_vec());
            match session.on_event(Event::Incoming(Packet::Publish(publish))) {
                Step::Forward(message) => {
                    assert_eq!(message.topic, "Relawand");
                    assert_eq!(message.payload, br#"{"gas_ppm":1}"#.to_vec());
                }
                other => panic!("expected forward, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_auth_refusal_before_first_connect_is_fatal() {
        tokio_test::block_on(async {
            let (mut session, _handle) = session();
            let err = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
            assert!(matches!(session.on_error(&err), Err(Error::BrokerRejected(_))));
        });
    }

    #[test]
    fn test_auth_refusal_after_connect_is_retried() {
        tokio_test::block_on(async {
            let (mut session, _handle) = session();
            session.on_event(connack(ConnectReturnCode::Success));
            let err = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
            assert!(session.on_error(&err).is_ok());
        });
    }

    #[test]
    fn test_unreachable_broker_is_retried() {
        tokio_test::block_on(async {
            let (mut session, _handle) = session();
            for _ in 0..5 {
                assert!(session.on_error(&io_error()).is_ok());
            }
        });
    }

    #[test]
    fn test_suback_failure_is_logged_only() {
        tokio_test::block_on(async {
            let (mut session, _handle) = session();
            let ack = SubAck::new(1, vec![SubscribeReasonCode::Failure]);
            assert!(matches!(session.on_event(Event::Incoming(Packet::SubAck(ack))), Step::Idle));
        });
    }

    #[test]
    fn test_full_ingest_queue_drops() {
        let (tx, mut rx) = mpsc::channel(1);
        let message = || InboundMessage {
            topic: "Relawand".to_string(),
            payload: b"{}".to_vec(),
        };
        assert!(forward(&tx, message()).is_ok());
        assert!(forward(&tx, message()).is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(matches!(forward(&tx, message()), Err(Error::ChannelSend)));
    }
}
