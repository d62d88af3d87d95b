use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, QoS};
use rumqttc::{Incoming, Outgoing};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::util::client_id;

pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
    reconnect_delay: Duration,
}

#[derive(Debug)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl MqttMessage {
    /// Whether the message was delivered under `filter`, wildcards included.
    pub fn is_on(&self, filter: &str) -> bool {
        rumqttc::matches(&self.topic, filter)
    }
}

#[derive(Debug)]
pub enum MqttEvent {
    /// Sent on every ConnAck. Subscriptions must be renewed after a reconnect.
    Connected,
    Message(MqttMessage),
}

// Small abstraction on top of rumqttc::EventLoop,
// to make mqtt messages easier to work with in the rest of the application.
impl MqttClient {
    pub fn new(config: &MqttConfig) -> MqttClient {
        let client_id = client_id(&config.client_prefix);
        info!(
            "Connecting to MQTT broker at {}:{} as {}",
            config.host, config.port, client_id
        );

        let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);
        mqtt_options
            .set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)))
            .set_clean_session(true)
            .set_max_packet_size(1024 * 1024, 1024 * 1024);

        let (client, event_loop) = AsyncClient::new(mqtt_options, 50);

        MqttClient {
            client,
            event_loop,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }

    pub fn run(mut self) -> (JoinHandle<()>, mpsc::Receiver<MqttEvent>, AsyncClient) {
        let (tx, rx) = mpsc::channel(32);

        let handle = tokio::spawn(async move {
            loop {
                let event = self.event_loop.poll().await;

                match event {
                    Ok(event) => {
                        let result = MqttClient::handle_event(event);
                        if let Some(msg) = result {
                            if let Err(e) = tx.send(msg).await {
                                error!("cannot send to mqtt message channel: {:?}", e);
                                break; // break event loop if channel is closed
                            }
                        }
                    }
                    Err(e) => {
                        error!("rumqttc polling error: {:?}", e);
                        warn!("Reconnecting in {:?}...", self.reconnect_delay);
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                }
            }
        });

        (handle, rx, self.client)
    }

    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    /// Drives the event loop inline until everything queued so far has been
    /// written and the connection is closed. For one-shot publishers.
    pub async fn flush_and_disconnect(mut self, timeout: Duration) -> anyhow::Result<()> {
        self.client.disconnect().await?;

        let drive = async {
            loop {
                match self.event_loop.poll().await? {
                    Event::Outgoing(Outgoing::Disconnect) => return Ok::<_, rumqttc::ConnectionError>(()),
                    event => debug!("{:?}", event),
                }
            }
        };

        tokio::time::timeout(timeout, drive)
            .await
            .context("timed out waiting for the broker")?
            .context("connection to the broker failed")?;
        Ok(())
    }

    fn handle_event(event: Event) -> Option<MqttEvent> {
        match event {
            Event::Incoming(Incoming::ConnAck(ack)) => {
                info!("Connected to MQTT broker ({:?})", ack.code);
                Some(MqttEvent::Connected)
            }
            Event::Incoming(Incoming::Publish(p)) => {
                debug!("Topic: {}, Payload: {:?}", p.topic, p.payload);

                Some(MqttEvent::Message(MqttMessage {
                    topic: p.topic,
                    payload: p.payload,
                }))
            }
            Event::Incoming(Incoming::Disconnect) => {
                warn!("Broker sent disconnect");
                None
            }
            _ => None,
        }
    }
}

/// Subscribes at most-once; the broker may drop or reorder deliveries.
pub async fn subscribe(client: &AsyncClient, topic: &str) {
    match client.subscribe(topic, QoS::AtMostOnce).await {
        Ok(()) => info!("Subscribed to {}", topic),
        Err(e) => error!("Subscription error on {}: {:?}", topic, e),
    }
}

/// Waits for the first ConnAck. Returns false on timeout or if the loop died.
pub async fn wait_for_connection(events: &mut mpsc::Receiver<MqttEvent>, timeout: Duration) -> bool {
    let connected = async {
        while let Some(event) = events.recv().await {
            if let MqttEvent::Connected = event {
                return true;
            }
        }
        false
    };
    tokio::time::timeout(timeout, connected).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode};

    #[test]
    fn test_handle_event_publish() {
        let topic = "iot/fitness/data".to_string();
        let payload = Bytes::from("test payload");
        let p = rumqttc::Publish::new(topic.clone(), QoS::AtMostOnce, payload.clone());
        let event = Event::Incoming(Incoming::Publish(p));

        let maybe_msg = MqttClient::handle_event(event);

        match maybe_msg {
            Some(MqttEvent::Message(msg)) => {
                assert_eq!(msg.topic, topic);
                assert_eq!(msg.payload, payload);
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_handle_event_connack() {
        let ack = ConnAck::new(ConnectReturnCode::Success, false);
        let event = Event::Incoming(Incoming::ConnAck(ack));

        assert!(matches!(
            MqttClient::handle_event(event),
            Some(MqttEvent::Connected)
        ));
    }

    #[test]
    fn test_handle_event_ignores_pingresp() {
        let event = Event::Incoming(Incoming::PingResp);
        assert!(MqttClient::handle_event(event).is_none());
    }

    #[test]
    fn message_matches_wildcard_filters() {
        let msg = MqttMessage {
            topic: "iot/fitness/data".to_string(),
            payload: Bytes::new(),
        };

        assert!(msg.is_on("iot/fitness/data"));
        assert!(msg.is_on("iot/+/data"));
        assert!(msg.is_on("iot/#"));
        assert!(!msg.is_on("iot/device/command"));
        assert!(!msg.is_on("iot/+/command"));
    }

    #[tokio::test]
    async fn wait_skips_until_connected() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(MqttEvent::Message(MqttMessage {
            topic: "t".to_string(),
            payload: Bytes::new(),
        }))
        .await
        .unwrap();
        tx.send(MqttEvent::Connected).await.unwrap();

        assert!(wait_for_connection(&mut rx, Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let (_tx, mut rx) = mpsc::channel::<MqttEvent>(4);
        assert!(!wait_for_connection(&mut rx, Duration::from_secs(10)).await);
    }
}
