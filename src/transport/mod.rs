//! Transport boundary for the client
//!
//! The client never speaks MQTT itself. It drives an [`MqttTransport`] for
//! outbound requests and receives broker events through [`TransportEvents`],
//! which the transport calls from its own execution context (a network task
//! or thread). Tests substitute [`crate::testing::MockTransport`].

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::QoS;

pub mod mqtt;

/// Disconnect code reported after a disconnect the client asked for
pub const DISCONNECT_NORMAL: i32 = 0;
/// Disconnect code reported when the broker or network dropped the link
pub const DISCONNECT_CONNECTION_LOST: i32 = 7;

/// Outbound capability the client needs from an MQTT implementation
///
/// Every method must return promptly: outcomes of `connect_async` arrive
/// later through [`TransportEvents`].
pub trait MqttTransport: Send + Sync {
    /// Register the sink that receives broker events
    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>);

    /// Store credentials for the next connection attempt
    fn configure(&self, username: &str, password: &str);

    /// Store the keep-alive interval for the next connection attempt
    ///
    /// Takes precedence over the `keepalive` argument of
    /// [`connect_async`](Self::connect_async).
    fn set_keepalive(&self, seconds: u16);

    /// Start connecting in the background
    ///
    /// Errors only for problems detectable before any network activity.
    fn connect_async(&self, host: &str, port: u16, keepalive: u16) -> Result<(), TransportError>;

    /// Queue a subscription request
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<RequestReceipt, TransportError>;

    /// Queue a publish request
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<RequestReceipt, TransportError>;

    /// Request disconnection from the broker
    fn disconnect(&self) -> Result<(), TransportError>;
}

/// Inbound broker events, invoked from the transport's execution context
pub trait TransportEvents: Send + Sync {
    fn on_connect(&self, code: ConnectCode);
    fn on_disconnect(&self, code: i32);
    fn on_message(&self, message: InboundMessage);
    fn on_subscribe(&self, message_id: u16, granted_qos: &[u8]);
    fn on_publish(&self, message_id: u16);
    fn on_log(&self, level: LogLevel, message: &str);
}

/// Raw message as delivered by a transport, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
}

/// CONNACK outcome of a connection attempt (MQTT 3.1.1 return codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCode {
    Accepted,
    RefusedProtocolVersion,
    RefusedClientId,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    Unknown(u8),
}

impl ConnectCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ConnectCode::Accepted,
            1 => ConnectCode::RefusedProtocolVersion,
            2 => ConnectCode::RefusedClientId,
            3 => ConnectCode::ServerUnavailable,
            4 => ConnectCode::BadCredentials,
            5 => ConnectCode::NotAuthorized,
            other => ConnectCode::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ConnectCode::Accepted => 0,
            ConnectCode::RefusedProtocolVersion => 1,
            ConnectCode::RefusedClientId => 2,
            ConnectCode::ServerUnavailable => 3,
            ConnectCode::BadCredentials => 4,
            ConnectCode::NotAuthorized => 5,
            ConnectCode::Unknown(code) => code,
        }
    }

    pub fn is_accepted(self) -> bool {
        self == ConnectCode::Accepted
    }

    /// Human-readable reason, in the wording brokers commonly log
    pub fn describe(self) -> &'static str {
        match self {
            ConnectCode::Accepted => "Connection Accepted.",
            ConnectCode::RefusedProtocolVersion => {
                "Connection Refused: unacceptable protocol version."
            }
            ConnectCode::RefusedClientId => "Connection Refused: identifier rejected.",
            ConnectCode::ServerUnavailable => "Connection Refused: broker unavailable.",
            ConnectCode::BadCredentials => "Connection Refused: bad user name or password.",
            ConnectCode::NotAuthorized => "Connection Refused: not authorised.",
            ConnectCode::Unknown(_) => "Connection Refused: unknown reason.",
        }
    }
}

/// Immediate result of a queued subscribe/publish request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestReceipt {
    pub code: RequestCode,
    /// Packet id, when the transport knows it at request time
    pub message_id: Option<u16>,
}

impl RequestReceipt {
    pub fn success(message_id: Option<u16>) -> Self {
        Self {
            code: RequestCode::Success,
            message_id,
        }
    }

    pub fn failed(code: RequestCode) -> Self {
        Self {
            code,
            message_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == RequestCode::Success
    }
}

/// Result codes a transport may report for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCode {
    Success,
    /// No live session to carry the request
    NoConnection,
    /// The outbound request queue is full
    QueueFull,
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestCode::Success => write!(f, "success"),
            RequestCode::NoConnection => write!(f, "no connection to broker"),
            RequestCode::QueueFull => write!(f, "request queue full"),
        }
    }
}

/// Severity of a transport log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

/// Failures raised synchronously by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No async runtime available to drive the MQTT event loop")]
    NoRuntime,
    #[error("Invalid connection options: {0}")]
    InvalidOptions(String),
    #[error("Invalid topic: '{0}'")]
    InvalidTopic(String),
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_code_round_trip_for_known_codes() {
        for code in 0..=5u8 {
            assert_eq!(ConnectCode::from_code(code).code(), code);
        }
        assert_eq!(ConnectCode::from_code(42), ConnectCode::Unknown(42));
        assert_eq!(ConnectCode::Unknown(42).code(), 42);
    }

    #[test]
    fn test_connect_code_descriptions_are_distinct() {
        let refusals = [
            ConnectCode::RefusedProtocolVersion,
            ConnectCode::RefusedClientId,
            ConnectCode::ServerUnavailable,
            ConnectCode::BadCredentials,
            ConnectCode::NotAuthorized,
            ConnectCode::Unknown(99),
        ];

        for (i, a) in refusals.iter().enumerate() {
            assert!(!a.is_accepted());
            for b in &refusals[i + 1..] {
                assert_ne!(a.describe(), b.describe());
            }
        }
        assert!(ConnectCode::Accepted.is_accepted());
        assert_eq!(
            ConnectCode::NotAuthorized.describe(),
            "Connection Refused: not authorised."
        );
    }

    #[test]
    fn test_request_receipt() {
        assert!(RequestReceipt::success(Some(1)).is_success());
        let failed = RequestReceipt::failed(RequestCode::QueueFull);
        assert!(!failed.is_success());
        assert_eq!(failed.message_id, None);
        assert_eq!(RequestCode::NoConnection.to_string(), "no connection to broker");
    }

    #[test]
    fn test_transport_error_display() {
        let errors = vec![
            TransportError::NoRuntime,
            TransportError::InvalidOptions("bad".to_string()),
            TransportError::InvalidTopic("a/#".to_string()),
            TransportError::Other("boom".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
