//! Pure connection setup for the rumqttc transport
//!
//! Option building, client-id assignment, topic validation, backoff and
//! code mapping. Nothing here touches the network.

use rumqttc::{ConnectReturnCode, MqttOptions};
use std::time::Duration;
use uuid::Uuid;

use crate::models::QoS;
use crate::transport::{ConnectCode, TransportError};

/// Prefix for generated client ids
pub const CLIENT_ID_PREFIX: &str = "dyson-mqtt";

/// Delay schedule between event-loop polls after an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds, indexed by consecutive failure
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the poll following the `attempt`th consecutive failure
    /// (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Use the configured client id, or generate a unique one when it is empty
pub fn resolve_client_id(client_id: &str) -> String {
    if client_id.is_empty() {
        format!("{CLIENT_ID_PREFIX}-{}", Uuid::new_v4())
    } else {
        client_id.to_string()
    }
}

/// Build rumqttc options for one connection attempt
///
/// Checks everything rumqttc would otherwise panic on.
pub fn build_mqtt_options(
    client_id: &str,
    host: &str,
    port: u16,
    keepalive: u16,
    credentials: Option<(&str, &str)>,
) -> Result<MqttOptions, TransportError> {
    if host.trim().is_empty() {
        return Err(TransportError::InvalidOptions("host is empty".to_string()));
    }
    if port == 0 {
        return Err(TransportError::InvalidOptions("port must be non-zero".to_string()));
    }
    if keepalive == 0 {
        return Err(TransportError::InvalidOptions(
            "keepalive must be at least one second".to_string(),
        ));
    }
    if client_id.is_empty() || client_id.starts_with(' ') {
        return Err(TransportError::InvalidOptions(format!(
            "invalid client id '{client_id}'"
        )));
    }

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(u64::from(keepalive)));
    options.set_clean_session(true);
    if let Some((username, password)) = credentials {
        options.set_credentials(username, password);
    }
    Ok(options)
}

/// Publish topics must be concrete: non-empty, no wildcards
pub fn validate_publish_topic(topic: &str) -> Result<(), TransportError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(TransportError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Subscription filters may use `+` for a whole level and `#` as the whole
/// last level
pub fn validate_subscription_filter(filter: &str) -> Result<(), TransportError> {
    let invalid = || TransportError::InvalidTopic(filter.to_string());
    if filter.is_empty() {
        return Err(invalid());
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        let multi = level.contains('#');
        let single = level.contains('+');
        if multi && (*level != "#" || i != last) {
            return Err(invalid());
        }
        if single && *level != "+" {
            return Err(invalid());
        }
    }
    Ok(())
}

pub fn to_rumqttc_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

pub fn connect_code(code: ConnectReturnCode) -> ConnectCode {
    match code {
        ConnectReturnCode::Success => ConnectCode::Accepted,
        ConnectReturnCode::RefusedProtocolVersion => ConnectCode::RefusedProtocolVersion,
        ConnectReturnCode::BadClientId => ConnectCode::RefusedClientId,
        ConnectReturnCode::ServiceUnavailable => ConnectCode::ServerUnavailable,
        ConnectReturnCode::BadUserNamePassword => ConnectCode::BadCredentials,
        ConnectReturnCode::NotAuthorized => ConnectCode::NotAuthorized,
    }
}
