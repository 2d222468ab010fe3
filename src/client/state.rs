//! Connection status tracking
//!
//! [`LifecycleEvent::apply`] is the pure transition function; [`StatusTracker`]
//! wraps the live [`ConnectionStatus`] in a mutex and applies events to it
//! from whichever context the transport delivers them on.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::ConnectionStatus;
use crate::transport::{ConnectCode, DISCONNECT_NORMAL};

/// Transport lifecycle events that change the connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `connect()` was called
    ConnectAttempt,
    /// CONNACK received, accepted or refused
    ConnectResult(ConnectCode),
    /// The link went down with the given code
    Disconnected(i32),
}

/// What the connection callback should be told after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionNotice {
    pub connected: bool,
    pub error: Option<String>,
}

impl LifecycleEvent {
    /// Apply the event to `status`, returning the notice for the connection
    /// callback (none for connect attempts)
    pub fn apply(self, status: &mut ConnectionStatus, now: DateTime<Utc>) -> Option<ConnectionNotice> {
        match self {
            LifecycleEvent::ConnectAttempt => {
                status.connection_attempts += 1;
                None
            }
            LifecycleEvent::ConnectResult(code) if code.is_accepted() => {
                status.connected = true;
                status.last_connect_time = Some(now);
                status.last_error = None;
                Some(ConnectionNotice {
                    connected: true,
                    error: None,
                })
            }
            LifecycleEvent::ConnectResult(code) => {
                let message = refusal_message(code);
                status.connected = false;
                status.last_error = Some(message.clone());
                Some(ConnectionNotice {
                    connected: false,
                    error: Some(message),
                })
            }
            LifecycleEvent::Disconnected(code) => {
                let error = (code != DISCONNECT_NORMAL)
                    .then(|| format!("Unexpected disconnection: {code}"));
                status.connected = false;
                status.last_disconnect_time = Some(now);
                status.last_error = error.clone();
                Some(ConnectionNotice {
                    connected: false,
                    error,
                })
            }
        }
    }
}

/// `last_error` text for a refused connection
pub fn refusal_message(code: ConnectCode) -> String {
    format!("Failed to connect to MQTT broker: {}", code.describe())
}

/// Mutex-guarded owner of the live [`ConnectionStatus`]
#[derive(Debug, Default)]
pub struct StatusTracker {
    status: Mutex<ConnectionStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event stamped with the current time
    pub fn record(&self, event: LifecycleEvent) -> Option<ConnectionNotice> {
        event.apply(&mut self.lock(), Utc::now())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn snapshot(&self) -> ConnectionStatus {
        self.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn force_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
