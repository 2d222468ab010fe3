//! MQTT client facade for Dyson devices
//!
//! [`DysonMqttClient`] owns one validated [`ConnectionConfig`], the live
//! connection status, a bounded inbound queue and a transport handle. All
//! caller-facing methods return immediately; connection outcomes and inbound
//! messages arrive on the transport's own execution context and are folded
//! into shared state under short-lived locks.
//!
//! ```no_run
//! use dyson_mqtt::{ConnectionConfig, DysonMqttClient};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::builder(
//!     "192.168.1.100",
//!     "serial",
//!     "credential",
//!     ["438/serial/status/current"],
//! )
//! .build()?;
//!
//! let client = DysonMqttClient::new(config);
//! let session = client.session()?;
//! for message in session.get_messages() {
//!     println!("{}: {}", message.topic(), message.payload_str());
//! }
//! session.close()?;
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod session;
pub mod state;

use bytes::Bytes;
use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ClientError, ClientResult, TopicError};
use crate::models::{ConnectionStatus, MqttMessage, QoS};
use crate::transport::mqtt::{RumqttcTransport, REQUEST_CHANNEL_CAPACITY};
use crate::transport::{ConnectCode, InboundMessage, LogLevel, MqttTransport, TransportEvents};

pub use queue::MessageQueue;
pub use session::Session;
pub use state::{ConnectionNotice, LifecycleEvent, StatusTracker};

/// Default bound on buffered inbound messages
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// QoS used for every publish and subscription
pub const CLIENT_QOS: QoS = QoS::ExactlyOnce;

/// Invoked for every accepted inbound message
pub type MessageCallback = Arc<dyn Fn(MqttMessage) + Send + Sync>;

/// Invoked with `(connected, error)` on every connection state change
pub type ConnectionCallback = Arc<dyn Fn(bool, Option<String>) + Send + Sync>;

/// Tunables that are not part of the connection itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub max_queue_size: NonZeroUsize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_queue_size: NonZeroUsize::new(DEFAULT_MAX_QUEUE_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// State shared between the caller and the transport's event context
struct ClientShared {
    config: ConnectionConfig,
    status: StatusTracker,
    queue: MessageQueue,
    message_callback: Mutex<Option<MessageCallback>>,
    connection_callback: Mutex<Option<ConnectionCallback>>,
}

impl ClientShared {
    fn message_callback(&self) -> Option<MessageCallback> {
        self.message_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn connection_callback(&self) -> Option<ConnectionCallback> {
        self.connection_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify_connection(&self, notice: ConnectionNotice) {
        let Some(callback) = self.connection_callback() else {
            return;
        };
        let ConnectionNotice { connected, error } = notice;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(connected, error))) {
            error!("Error in connection callback: {}", panic_message(&*panic));
        }
    }
}

/// Thread-safe, non-blocking MQTT client
pub struct DysonMqttClient {
    shared: Arc<ClientShared>,
    transport: Arc<dyn MqttTransport>,
}

impl DysonMqttClient {
    /// Create a client backed by the rumqttc transport
    ///
    /// The transport picks up the ambient tokio runtime; without one,
    /// [`connect`](Self::connect) fails with [`ClientError::Connection`].
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_options(config, ClientOptions::default())
    }

    /// The request channel is sized so every configured topic can be
    /// subscribed from the connect callback without waiting for the loop.
    pub fn with_options(config: ConnectionConfig, options: ClientOptions) -> Self {
        let capacity = REQUEST_CHANNEL_CAPACITY.saturating_add(config.mqtt_topics().len());
        let transport =
            Arc::new(RumqttcTransport::new(config.client_id()).with_request_capacity(capacity));
        Self::with_transport_and_options(config, transport, options)
    }

    /// Create a client over an arbitrary transport
    pub fn with_transport(config: ConnectionConfig, transport: Arc<dyn MqttTransport>) -> Self {
        Self::with_transport_and_options(config, transport, ClientOptions::default())
    }

    pub fn with_transport_and_options(
        config: ConnectionConfig,
        transport: Arc<dyn MqttTransport>,
        options: ClientOptions,
    ) -> Self {
        let shared = Arc::new(ClientShared {
            config,
            status: StatusTracker::new(),
            queue: MessageQueue::new(options.max_queue_size),
            message_callback: Mutex::new(None),
            connection_callback: Mutex::new(None),
        });
        Self { shared, transport }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Start connecting to the device
    ///
    /// Returns once the request is issued. The attempt is counted even when
    /// the transport rejects it here.
    pub fn connect(&self) -> ClientResult<()> {
        let config = &self.shared.config;
        self.shared.status.record(LifecycleEvent::ConnectAttempt);

        self.transport.set_event_handler(Arc::new(ClientEvents {
            shared: Arc::clone(&self.shared),
            transport: Arc::downgrade(&self.transport),
        }));
        self.transport
            .configure(config.mqtt_username(), config.mqtt_password());
        self.transport.set_keepalive(config.keepalive());

        info!(
            host = %config.host(),
            port = config.port(),
            "Connecting to MQTT broker"
        );
        self.transport
            .connect_async(config.host(), config.port(), config.keepalive())
            .map_err(|source| {
                error!(error = %source, "Connection request rejected");
                ClientError::Connection {
                    host: config.host().to_string(),
                    port: config.port(),
                    source,
                }
            })
    }

    /// Request disconnection
    ///
    /// The client stays usable for a later [`connect`](Self::connect) even
    /// when this fails.
    pub fn disconnect(&self) -> ClientResult<()> {
        self.transport.disconnect().map_err(|e| {
            error!(error = %e, "Error during disconnect");
            ClientError::Cleanup(e)
        })?;
        info!("Disconnect requested");
        Ok(())
    }

    /// Publish a non-retained message at QoS 2
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> ClientResult<()> {
        if !self.shared.status.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let payload = Bytes::copy_from_slice(payload.as_ref());
        let receipt = self
            .transport
            .publish(topic, payload, CLIENT_QOS, false)
            .map_err(|source| TopicError::Failed {
                topic: topic.to_string(),
                source,
            })?;

        if !receipt.is_success() {
            return Err(TopicError::Rejected {
                topic: topic.to_string(),
                code: receipt.code,
            }
            .into());
        }

        debug!(topic, mid = ?receipt.message_id, "Publish queued");
        Ok(())
    }

    /// Take every buffered message in arrival order
    pub fn get_messages(&self) -> Vec<MqttMessage> {
        self.shared.queue.drain()
    }

    /// Snapshot of the connection status
    pub fn get_status(&self) -> ConnectionStatus {
        self.shared.status.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.status.is_connected()
    }

    /// Replace or clear the message callback
    pub fn set_message_callback(&self, callback: Option<MessageCallback>) {
        *self
            .shared
            .message_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// Replace or clear the connection callback
    pub fn set_connection_callback(&self, callback: Option<ConnectionCallback>) {
        *self
            .shared
            .connection_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// Connect and return a guard that disconnects when dropped
    pub fn session(&self) -> ClientResult<Session<'_>> {
        Session::open(self)
    }
}

impl std::fmt::Debug for DysonMqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DysonMqttClient")
            .field("config", &self.shared.config)
            .field("status", &self.shared.status.snapshot())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

/// Event sink registered with the transport
///
/// Holds the transport weakly: the transport owns this handler, so a strong
/// reference back would keep both alive forever.
struct ClientEvents {
    shared: Arc<ClientShared>,
    transport: Weak<dyn MqttTransport>,
}

impl ClientEvents {
    fn subscribe_topics(&self) {
        if !self.shared.status.is_connected() {
            return;
        }
        let Some(transport) = self.transport.upgrade() else {
            return;
        };

        for topic in self.shared.config.mqtt_topics() {
            match transport.subscribe(topic, CLIENT_QOS) {
                Ok(receipt) if receipt.is_success() => {
                    info!(topic = %topic, "Subscribed to topic");
                }
                Ok(receipt) => {
                    error!(topic = %topic, code = %receipt.code, "Failed to subscribe to topic");
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "Error subscribing to topic");
                }
            }
        }
    }
}

impl TransportEvents for ClientEvents {
    fn on_connect(&self, code: ConnectCode) {
        let notice = self.shared.status.record(LifecycleEvent::ConnectResult(code));

        if code.is_accepted() {
            info!("Connected to MQTT broker");
        } else {
            error!(code = code.code(), "{}", state::refusal_message(code));
        }

        if let Some(notice) = notice {
            self.shared.notify_connection(notice);
        }
        self.subscribe_topics();
    }

    fn on_disconnect(&self, code: i32) {
        let notice = self.shared.status.record(LifecycleEvent::Disconnected(code));

        if code == crate::transport::DISCONNECT_NORMAL {
            info!("Disconnected from MQTT broker");
        } else {
            warn!(code, "Unexpected disconnection from MQTT broker");
        }

        if let Some(notice) = notice {
            self.shared.notify_connection(notice);
        }
    }

    fn on_message(&self, raw: InboundMessage) {
        let message = match MqttMessage::from_inbound(raw) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Error processing message");
                return;
            }
        };

        debug!(
            topic = %message.topic(),
            bytes = message.payload().len(),
            "Received message"
        );

        if let Some(callback) = self.shared.message_callback() {
            let delivered = message.clone();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(delivered))) {
                error!("Error in message callback: {}", panic_message(&*panic));
            }
        }

        let evicted = self.shared.queue.push(message);
        if evicted > 0 {
            warn!(
                evicted,
                max_size = self.shared.queue.max_size().get(),
                "Message queue full, dropped oldest messages"
            );
        }
    }

    fn on_subscribe(&self, message_id: u16, granted_qos: &[u8]) {
        debug!("Subscription confirmed (mid: {message_id}, QoS: {granted_qos:?})");
    }

    fn on_publish(&self, message_id: u16) {
        debug!("Message published (mid: {message_id})");
    }

    fn on_log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Warning | LogLevel::Error => warn!("MQTT: {message}"),
            LogLevel::Debug | LogLevel::Info | LogLevel::Notice => debug!("MQTT: {message}"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("callback panicked")
}
