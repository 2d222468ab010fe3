//! Error types returned by client operations
//!
//! Failures discovered inside event handlers (refused connections, bad
//! inbound messages, callback panics) never surface here. They are logged
//! and, for connection failures, recorded in
//! [`ConnectionStatus::last_error`](crate::models::ConnectionStatus).

use thiserror::Error;

use crate::transport::{RequestCode, TransportError};

/// Errors returned synchronously by [`DysonMqttClient`](crate::DysonMqttClient)
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport rejected the connect request before any network activity
    #[error("Failed to initiate connection to {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: TransportError,
    },

    /// The transport failed while tearing the connection down
    #[error("Error during disconnect: {0}")]
    Cleanup(#[source] TransportError),

    /// Publishing requires an established connection
    #[error("Client is not connected")]
    NotConnected,

    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// Publish failures, split by where they happened
#[derive(Debug, Error)]
pub enum TopicError {
    /// The transport accepted the call but reported a non-success code
    #[error("Failed to publish to topic {topic}: {code}")]
    Rejected { topic: String, code: RequestCode },

    /// The transport call itself failed
    #[error("Error publishing to topic {topic}: {source}")]
    Failed {
        topic: String,
        #[source]
        source: TransportError,
    },
}

impl TopicError {
    pub fn topic(&self) -> &str {
        match self {
            TopicError::Rejected { topic, .. } | TopicError::Failed { topic, .. } => topic,
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connection_error_display() {
        let error = ClientError::Connection {
            host: "192.168.1.100".to_string(),
            port: 1883,
            source: TransportError::NoRuntime,
        };

        let message = error.to_string();
        assert!(message.starts_with("Failed to initiate connection to 192.168.1.100:1883"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_cleanup_error_display() {
        let error = ClientError::Cleanup(TransportError::Other("Disconnect failed".to_string()));
        assert_eq!(error.to_string(), "Error during disconnect: Disconnect failed");
    }

    #[test]
    fn test_topic_errors_are_distinguishable() {
        let rejected = TopicError::Rejected {
            topic: "test/topic".to_string(),
            code: RequestCode::NoConnection,
        };
        let failed = TopicError::Failed {
            topic: "test/topic".to_string(),
            source: TransportError::Other("Publish failed".to_string()),
        };

        assert!(rejected.to_string().starts_with("Failed to publish to topic test/topic"));
        assert!(failed.to_string().starts_with("Error publishing to topic test/topic"));
        assert_eq!(rejected.topic(), failed.topic());
    }

    #[test]
    fn test_topic_error_is_transparent_in_client_error() {
        let error: ClientError = TopicError::Rejected {
            topic: "a/b".to_string(),
            code: RequestCode::QueueFull,
        }
        .into();

        assert_eq!(error.to_string(), "Failed to publish to topic a/b: request queue full");
    }

    #[test]
    fn test_not_connected_display() {
        assert_eq!(ClientError::NotConnected.to_string(), "Client is not connected");
    }
}
