//! MQTT broker connection

use anpr2mqtt_core::config::MqttSettings;
use anpr2mqtt_core::error::{Anpr2MqttError, Result};
use anpr2mqtt_core::publisher::{HomeAssistantPublisher, MessageSink};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Publishes through a `rumqttc` client at QoS 0
#[derive(Clone)]
pub struct MqttSink {
    client: AsyncClient,
}

impl MqttSink {
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| Anpr2MqttError::Publish(format!("subscribe {}: {}", topic, e)))
    }
}

#[async_trait]
impl MessageSink for MqttSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await
            .map_err(|e| Anpr2MqttError::Publish(format!("{}: {}", topic, e)))
    }
}

pub fn options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    if let Some(user) = &settings.user {
        options.set_credentials(user, settings.password.clone().unwrap_or_default());
    }
    options
}

/// Create the client and wait for the broker to accept the connection
pub async fn connect(settings: &MqttSettings, timeout: Duration) -> anyhow::Result<(MqttSink, EventLoop)> {
    let (client, mut eventloop) = AsyncClient::new(options(settings), REQUEST_CAPACITY);

    let connected = tokio::time::timeout(timeout, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    if matches!(
                        ack.code,
                        ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword
                    ) {
                        bail!("Invalid MQTT credentials: {:?}", ack.code);
                    }
                    bail!("Connection refused by broker: {:?}", ack.code);
                }
                Ok(event) => debug!("MQTT event before connection: {:?}", event),
                Err(e) => bail!("Failed to connect to MQTT: {}", e),
            }
        }
    })
    .await
    .map_err(|_| anyhow!("Timed out connecting to MQTT at {}:{}", settings.host, settings.port))?;
    connected?;

    info!(
        "Connected to MQTT at {}:{} as {}",
        settings.host,
        settings.port,
        settings.user.as_deref().unwrap_or("anonymous")
    );
    Ok((MqttSink { client }, eventloop))
}

/// Drive the network loop and forward Home Assistant status messages
///
/// Discovery is replayed when Home Assistant comes online and whenever the
/// broker connection is re-established.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    sink: MqttSink,
    publisher: Arc<HomeAssistantPublisher>,
) -> JoinHandle<()> {
    let status_topic = publisher.status_topic();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Reconnected to broker: {:?}", ack.code);
                    // Requests are queued through the loop being polled here
                    let sink = sink.clone();
                    let publisher = publisher.clone();
                    let status_topic = status_topic.clone();
                    tokio::spawn(async move {
                        if let Err(e) = sink.subscribe(&status_topic).await {
                            error!("Failed to subscribe to {}: {}", status_topic, e);
                        }
                        publisher.republish_discovery().await;
                    });
                }
                Ok(Event::Incoming(Packet::Publish(message))) if message.topic == status_topic => {
                    let publisher = publisher.clone();
                    tokio::spawn(async move {
                        publisher.on_platform_status(&message.payload).await;
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect)) => warn!("Disconnected by broker"),
                Ok(_) => {}
                Err(e) => {
                    warn!("Disconnect failure from broker: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_settings() {
        let settings = MqttSettings {
            host: "broker.local".to_string(),
            port: 8883,
            user: Some("anpr".to_string()),
            password: Some("secret".to_string()),
            ..MqttSettings::default()
        };
        let options = options(&settings);
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(options.client_id(), "anpr2mqtt");
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
        assert_eq!(
            options.credentials(),
            Some(("anpr".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_options_without_credentials() {
        let options = options(&MqttSettings::default());
        assert!(options.credentials().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..MqttSettings::default()
        };
        assert!(connect(&settings, Duration::from_secs(5)).await.is_err());
    }
}
