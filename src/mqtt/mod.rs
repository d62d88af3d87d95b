pub mod client;
pub mod publisher;

pub use client::{MqttClient, MqttEvent, MqttMessage};
pub use publisher::Publish;
