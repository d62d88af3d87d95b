use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};

use crate::error::PublishError;

/// Fire-and-forget publishing. Implementations must not retry.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

// Enqueues without waiting for room: when the request queue is full
// (broker unreachable) the message is dropped and reported.
#[async_trait]
impl Publish for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingPublisher;
