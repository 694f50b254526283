//! Publish capability consumed by the retrier, and its MQTT implementation.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::BrokerSettings;
use crate::error::{PublishError, RelayError, RelayResult};

/// A single request/acknowledgement round trip to the broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Release the connection. Called once, after the pacer and sender stopped.
    async fn disconnect(&self) {}
}

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// MQTT transport backed by `rumqttc`.
///
/// A background task drives the client event loop and tracks whether the
/// broker session is up. Publishing while disconnected fails fast so the
/// retrier can back off instead of piling requests into the client.
/// With QoS 0 an attempt succeeds once the client accepted the packet;
/// higher QoS levels are acknowledged by the broker asynchronously.
pub struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Connect and wait for the broker's CONNACK. Any failure here is fatal
    /// to startup.
    pub async fn connect(settings: &BrokerSettings) -> RelayResult<Self> {
        let qos = qos_from_level(settings.qos)?;

        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.host.clone(),
            settings.port,
        );
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
        options.set_clean_session(true);
        if let Some(username) = &settings.username {
            options.set_credentials(
                username.clone(),
                settings.password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let connect_timeout = Duration::from_millis(settings.connect_timeout_ms);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(RelayError::connection(format!(
                                "broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(RelayError::connection(e.to_string())),
                }
            }
        };

        match timeout(connect_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RelayError::connection(format!(
                    "no CONNACK from {}:{} within {:?}",
                    settings.host, settings.port, connect_timeout
                )))
            }
        }
        info!(
            "🔌 Connected to MQTT broker {}:{} as {}",
            settings.host, settings.port, settings.client_id
        );

        let connected = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));
        let driver = tokio::spawn(drive_event_loop(
            eventloop,
            connected.clone(),
            closing.clone(),
            Duration::from_millis(settings.reconnect_delay_ms),
        ));

        Ok(Self {
            client,
            qos,
            connected,
            closing,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }
        self.client
            .publish(topic, self.qos, false, payload.to_vec())
            .await
            .map_err(|e| PublishError::rejected(e.to_string()))
    }

    async fn disconnect(&self) {
        self.closing.store(true, Ordering::Release);
        if let Err(e) = self.client.disconnect().await {
            warn!("🔌 Failed to request MQTT disconnect: {e}");
        }

        let Some(mut driver) = self.driver.lock().await.take() else {
            return;
        };
        if timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
            driver.abort();
        }
        info!("🔌 Disconnected from MQTT broker");
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let up = ack.code == ConnectReturnCode::Success;
                connected.store(up, Ordering::Release);
                if up {
                    info!("🔌 MQTT session re-established");
                } else {
                    error!("🔌 Broker refused reconnect: {:?}", ack.code);
                }
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                connected.store(false, Ordering::Release);
                debug!("🔌 MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::Release);
                if closing.load(Ordering::Acquire) {
                    break;
                }
                warn!("🔌 MQTT connection lost: {e}, retrying in {reconnect_delay:?}");
                sleep(reconnect_delay).await;
            }
        }
    }
}

fn qos_from_level(level: u8) -> RelayResult<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(RelayError::invalid_value("broker.qos", other)),
    }
}
