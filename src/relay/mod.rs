//! Subscribes to the data topic and persists every valid reading.
//!
//! Nothing that arrives on the topic can stop the relay: unparseable payloads
//! are logged and discarded, failed inserts are logged and (depending on the
//! persist policy) retried a bounded number of times before being dropped.

pub mod api;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PersistPolicy};
use crate::mqtt::client::{subscribe, wait_for_connection};
use crate::mqtt::{MqttClient, MqttEvent};
use crate::shutdown::shutdown_signal;
use crate::store::{self, ReadingStore};
use crate::telemetry::{SensorReading, StoredReading};

use api::ApiState;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Stored,
    /// Not a valid reading; discarded.
    Rejected,
    /// Valid, but the store would not take it.
    Dropped,
}

pub struct Relay {
    store: Arc<dyn ReadingStore>,
    policy: PersistPolicy,
}

impl Relay {
    pub fn new(store: Arc<dyn ReadingStore>, policy: PersistPolicy) -> Self {
        Relay { store, policy }
    }

    pub async fn handle_payload(&self, payload: &[u8]) -> Outcome {
        let reading = match SensorReading::from_json(payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Parse error: {} ({:?})", e, String::from_utf8_lossy(payload));
                return Outcome::Rejected;
            }
        };
        debug!("Received: {:?}", reading);

        self.persist(&StoredReading::from(reading)).await
    }

    async fn persist(&self, row: &StoredReading) -> Outcome {
        let (attempts, delay_ms) = match self.policy {
            PersistPolicy::Drop => (1, 0),
            PersistPolicy::Retry { attempts, delay_ms } => (attempts.max(1), delay_ms),
        };

        for attempt in 1..=attempts {
            match self.store.insert(row).await {
                Ok(()) => {
                    info!("Saved reading from {} at {}", row.uid, row.timestamp);
                    return Outcome::Stored;
                }
                Err(e) => {
                    error!("Save error (attempt {}/{}): {}", attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(retry_delay(delay_ms, attempt)).await;
                    }
                }
            }
        }

        warn!("Dropping reading from {} at {}", row.uid, row.timestamp);
        Outcome::Dropped
    }
}

/// Exponential backoff: `base`, `2*base`, `4*base`, ... capped at 30s.
pub fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RETRY_DELAY)
}

pub async fn run(config: &Config) -> Result<()> {
    let store = store::open(&config.relay.store)
        .await
        .context("cannot open reading store")?;

    let address = format!("0.0.0.0:{}", config.relay.http_port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("cannot bind {}", address))?;

    let (mqtt_handle, mut events, client) = MqttClient::new(&config.mqtt).run();
    let timeout = Duration::from_secs(config.mqtt.connect_timeout_secs);
    if !wait_for_connection(&mut events, timeout).await {
        mqtt_handle.abort();
        bail!(
            "could not connect to MQTT broker at {}:{} within {:?}",
            config.mqtt.host,
            config.mqtt.port,
            timeout
        );
    }

    let data_topic = config.topics.data.clone();
    subscribe(&client, &data_topic).await;

    let app = api::router(ApiState {
        store: store.clone(),
        publisher: Arc::new(client.clone()),
        command_topic: config.topics.command.clone(),
    });

    let (stop_server, mut server_stopped) = watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_stopped.changed().await;
            })
            .await
    });
    info!("Server running on http://{}", address);

    let relay = Relay::new(store, config.relay.persist_policy);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(MqttEvent::Connected) => subscribe(&client, &data_topic).await,
                Some(MqttEvent::Message(msg)) if msg.is_on(&data_topic) => {
                    relay.handle_payload(&msg.payload).await;
                }
                Some(MqttEvent::Message(msg)) => debug!("Ignoring message on {}", msg.topic),
                None => {
                    error!("MQTT event loop stopped");
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    info!("Server shutting down...");
    let _ = stop_server.send(true);
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Web server error: {}", e),
        Err(e) => error!("Web server task failed: {:?}", e),
    }
    if let Err(e) = client.disconnect().await {
        warn!("MQTT disconnect failed: {}", e);
    }
    mqtt_handle.abort();
    Ok(())
}
