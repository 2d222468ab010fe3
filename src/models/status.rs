//! Connection lifecycle snapshot

use chrono::{DateTime, Utc};

/// Connection lifecycle state of a client
///
/// The client owns the live record; callers only ever see copies returned by
/// [`DysonMqttClient::get_status`](crate::DysonMqttClient::get_status).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_connect_time: Option<DateTime<Utc>>,
    pub last_disconnect_time: Option<DateTime<Utc>>,
    /// Incremented once per `connect()` call, whatever its outcome
    pub connection_attempts: u64,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    /// JSON object form, timestamps as RFC 3339 strings or null
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "connected": self.connected,
            "last_connect_time": self.last_connect_time.map(|t| t.to_rfc3339()),
            "last_disconnect_time": self.last_disconnect_time.map(|t| t.to_rfc3339()),
            "connection_attempts": self.connection_attempts,
            "last_error": self.last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_creation() {
        let status = ConnectionStatus::default();

        assert!(!status.connected);
        assert_eq!(status.last_connect_time, None);
        assert_eq!(status.last_disconnect_time, None);
        assert_eq!(status.connection_attempts, 0);
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_status_to_json() {
        let connect_time = Utc::now();
        let status = ConnectionStatus {
            connected: true,
            last_connect_time: Some(connect_time),
            connection_attempts: 3,
            last_error: Some("Test error".to_string()),
            ..Default::default()
        };

        assert_eq!(
            status.to_json(),
            json!({
                "connected": true,
                "last_connect_time": connect_time.to_rfc3339(),
                "last_disconnect_time": null,
                "connection_attempts": 3,
                "last_error": "Test error",
            })
        );
    }
}
