//! Value types shared by the client and its transports
//!
//! - [`MqttMessage`] - one inbound broker message
//! - [`QoS`] - MQTT delivery guarantee levels
//! - [`ConnectionStatus`] - snapshot of the connection lifecycle

pub mod message;
pub mod status;

pub use message::{MessageError, MessageRecord, MqttMessage, QoS};
pub use status::ConnectionStatus;
