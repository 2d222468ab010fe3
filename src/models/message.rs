//! Inbound MQTT message model

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

use crate::transport::InboundMessage;

/// MQTT quality-of-service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    /// QoS 0 - fire and forget
    AtMostOnce,
    /// QoS 1 - acknowledged delivery
    AtLeastOnce,
    /// QoS 2 - assured single delivery
    ExactlyOnce,
}

impl QoS {
    /// Numeric level as carried on the wire (0, 1 or 2)
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = MessageError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(MessageError::InvalidQos(other)),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Errors raised while turning a transport message into an [`MqttMessage`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),
}

/// One message received from the broker
///
/// Immutable once built. The payload is kept as raw bytes; use
/// [`MqttMessage::payload_str`] for a text view.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    timestamp: DateTime<Utc>,
}

impl MqttMessage {
    /// Create a message stamped with the current time
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self::with_timestamp(topic, payload, qos, retain, Utc::now())
    }

    /// Create a message with an explicit receive time
    pub fn with_timestamp(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            timestamp,
        }
    }

    /// Convert a raw transport message, stamping it with the current time
    pub fn from_inbound(raw: InboundMessage) -> Result<Self, MessageError> {
        let qos = QoS::try_from(raw.qos)?;
        Ok(Self::new(raw.topic, raw.payload, qos, raw.retain))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Payload decoded as UTF-8; invalid sequences become U+FFFD
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Flat record for logging and export
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            topic: self.topic.clone(),
            payload: self.payload_str().into_owned(),
            qos: self.qos.level(),
            retain: self.retain,
            timestamp: Some(self.timestamp.to_rfc3339()),
        }
    }

    /// JSON object form of [`MqttMessage::to_record`]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "topic": self.topic,
            "payload": self.payload_str(),
            "qos": self.qos.level(),
            "retain": self.retain,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

/// Plain key-value view of a message, payload rendered as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
    pub timestamp: Option<String>,
}
