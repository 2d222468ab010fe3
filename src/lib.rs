//! Dyson MQTT - local MQTT client for Dyson air purifiers and fans
//!
//! Connects to a device's on-board MQTT broker with its serial and
//! credential, subscribes to its status topics, buffers inbound messages for
//! polling and publishes commands.
//!
//! # Overview
//!
//! - [`config`] - validated [`ConnectionConfig`] and TOML [`Settings`]
//! - [`client`] - the [`DysonMqttClient`] facade, status tracking, the
//!   bounded message queue and the scoped [`Session`] guard
//! - [`transport`] - the [`MqttTransport`](transport::MqttTransport)
//!   boundary and its rumqttc implementation
//! - [`testing`] - a recording mock transport and an in-process broker for tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dyson_mqtt::{ConnectionConfig, DysonMqttClient};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::builder(
//!     "192.168.1.100",
//!     "475",
//!     "device-credential",
//!     ["475/SERIAL/status/current"],
//! )
//! .build()?;
//!
//! let client = DysonMqttClient::new(config);
//! client.set_message_callback(Some(Arc::new(|message| {
//!     println!("{}: {}", message.topic(), message.payload_str());
//! })));
//! client.connect()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod testing;
pub mod transport;

pub use client::{
    ClientOptions, ConnectionCallback, DysonMqttClient, MessageCallback, Session,
    DEFAULT_MAX_QUEUE_SIZE,
};
pub use config::{ConfigError, ConnectionConfig, Settings, ValidationError};
pub use error::{ClientError, ClientResult, TopicError};
pub use models::{ConnectionStatus, MessageError, MessageRecord, MqttMessage, QoS};
