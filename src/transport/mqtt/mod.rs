//! rumqttc implementation of [`MqttTransport`](crate::transport::MqttTransport)
//!
//! Pure functions are kept apart from I/O:
//!
//! - [`connection`] - option building, client ids, topic validation, backoff
//! - [`message_handler`] - routing rumqttc events onto transport events
//! - [`client`] - the event-loop task and request plumbing
//!
//! ```rust,no_run
//! use dyson_mqtt::transport::mqtt::RumqttcTransport;
//! use dyson_mqtt::transport::MqttTransport;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = RumqttcTransport::new("");
//! transport.configure("475", "secret");
//! transport.connect_async("192.168.1.100", 1883, 60)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{RumqttcTransport, REQUEST_CHANNEL_CAPACITY};
pub use connection::ReconnectConfig;
pub use message_handler::{ErrorRoute, EventRoute, LoopControl, MessageHandler};
