//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for the network: it records every outbound
//! call, returns configurable results, and lets tests fire broker events at
//! whatever handler the client registered. [`RecordingEvents`] is the
//! opposite end, a [`TransportEvents`] sink that only remembers what it saw.

use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::QoS;
use crate::transport::{
    ConnectCode, InboundMessage, LogLevel, MqttTransport, RequestCode, RequestReceipt,
    TransportError, TransportEvents,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A publish request as the transport received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCall {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Default)]
struct MockState {
    handler: Option<Arc<dyn TransportEvents>>,
    credentials: Option<(String, String)>,
    keepalive: Option<u16>,
    connect_calls: Vec<(String, u16, u16)>,
    subscriptions: Vec<(String, QoS)>,
    publications: Vec<PublishCall>,
    disconnect_calls: usize,
    next_message_id: u16,

    connect_error: Option<String>,
    disconnect_error: Option<String>,
    publish_error: Option<String>,
    failing_subscriptions: Vec<String>,
    subscribe_code: Option<RequestCode>,
    publish_code: Option<RequestCode>,
}

impl MockState {
    fn receipt(&mut self, code: Option<RequestCode>) -> RequestReceipt {
        match code {
            Some(code) if code != RequestCode::Success => RequestReceipt::failed(code),
            _ => {
                self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
                RequestReceipt::success(Some(self.next_message_id))
            }
        }
    }
}

/// Mock transport for testing
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connect_async` fail synchronously
    pub fn fail_connect(&self, message: impl Into<String>) {
        lock(&self.state).connect_error = Some(message.into());
    }

    /// Make `disconnect` fail
    pub fn fail_disconnect(&self, message: impl Into<String>) {
        lock(&self.state).disconnect_error = Some(message.into());
    }

    /// Make `publish` raise instead of returning a code
    pub fn fail_publish(&self, message: impl Into<String>) {
        lock(&self.state).publish_error = Some(message.into());
    }

    /// Make `subscribe` raise for one topic
    pub fn fail_subscribe_to(&self, topic: impl Into<String>) {
        lock(&self.state).failing_subscriptions.push(topic.into());
    }

    pub fn set_subscribe_code(&self, code: RequestCode) {
        lock(&self.state).subscribe_code = Some(code);
    }

    pub fn set_publish_code(&self, code: RequestCode) {
        lock(&self.state).publish_code = Some(code);
    }

    /// Clear configured failures
    pub fn heal(&self) {
        let mut state = lock(&self.state);
        state.connect_error = None;
        state.disconnect_error = None;
        state.publish_error = None;
        state.failing_subscriptions.clear();
        state.subscribe_code = None;
        state.publish_code = None;
    }

    pub fn handler(&self) -> Option<Arc<dyn TransportEvents>> {
        lock(&self.state).handler.clone()
    }

    pub fn configured(&self) -> Option<(String, String)> {
        lock(&self.state).credentials.clone()
    }

    pub fn keepalive(&self) -> Option<u16> {
        lock(&self.state).keepalive
    }

    pub fn connect_calls(&self) -> Vec<(String, u16, u16)> {
        lock(&self.state).connect_calls.clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.state).subscriptions.clone()
    }

    pub fn publications(&self) -> Vec<PublishCall> {
        lock(&self.state).publications.clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        lock(&self.state).disconnect_calls
    }

    // The handler is cloned out first: it calls back into this transport.

    pub fn fire_connect(&self, code: ConnectCode) {
        if let Some(handler) = self.handler() {
            handler.on_connect(code);
        }
    }

    pub fn fire_disconnect(&self, code: i32) {
        if let Some(handler) = self.handler() {
            handler.on_disconnect(code);
        }
    }

    pub fn fire_message(&self, message: InboundMessage) {
        if let Some(handler) = self.handler() {
            handler.on_message(message);
        }
    }

    pub fn fire_subscribe(&self, message_id: u16, granted_qos: &[u8]) {
        if let Some(handler) = self.handler() {
            handler.on_subscribe(message_id, granted_qos);
        }
    }

    pub fn fire_publish(&self, message_id: u16) {
        if let Some(handler) = self.handler() {
            handler.on_publish(message_id);
        }
    }

    pub fn fire_log(&self, level: LogLevel, message: &str) {
        if let Some(handler) = self.handler() {
            handler.on_log(level, message);
        }
    }
}

impl MqttTransport for MockTransport {
    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>) {
        lock(&self.state).handler = Some(handler);
    }

    fn configure(&self, username: &str, password: &str) {
        lock(&self.state).credentials = Some((username.to_string(), password.to_string()));
    }

    fn set_keepalive(&self, seconds: u16) {
        lock(&self.state).keepalive = Some(seconds);
    }

    fn connect_async(&self, host: &str, port: u16, keepalive: u16) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.connect_calls.push((host.to_string(), port, keepalive));
        match &state.connect_error {
            Some(message) => Err(TransportError::Other(message.clone())),
            None => Ok(()),
        }
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<RequestReceipt, TransportError> {
        let mut state = lock(&self.state);
        state.subscriptions.push((topic.to_string(), qos));
        if state.failing_subscriptions.iter().any(|t| t == topic) {
            return Err(TransportError::Other(format!("subscribe to {topic} failed")));
        }
        let code = state.subscribe_code;
        Ok(state.receipt(code))
    }

    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<RequestReceipt, TransportError> {
        let mut state = lock(&self.state);
        state.publications.push(PublishCall {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        if let Some(message) = &state.publish_error {
            return Err(TransportError::Other(message.clone()));
        }
        let code = state.publish_code;
        Ok(state.receipt(code))
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.disconnect_calls += 1;
        match &state.disconnect_error {
            Some(message) => Err(TransportError::Other(message.clone())),
            None => Ok(()),
        }
    }
}

/// Event sink that records every call
#[derive(Debug, Default)]
pub struct RecordingEvents {
    connects: Mutex<Vec<ConnectCode>>,
    disconnects: Mutex<Vec<i32>>,
    messages: Mutex<Vec<InboundMessage>>,
    subscribes: Mutex<Vec<(u16, Vec<u8>)>>,
    publishes: Mutex<Vec<u16>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingEvents {
    pub fn connects(&self) -> Vec<ConnectCode> {
        lock(&self.connects).clone()
    }

    pub fn disconnects(&self) -> Vec<i32> {
        lock(&self.disconnects).clone()
    }

    pub fn messages(&self) -> Vec<InboundMessage> {
        lock(&self.messages).clone()
    }

    pub fn subscribes(&self) -> Vec<(u16, Vec<u8>)> {
        lock(&self.subscribes).clone()
    }

    pub fn publishes(&self) -> Vec<u16> {
        lock(&self.publishes).clone()
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        lock(&self.logs).clone()
    }
}

impl TransportEvents for RecordingEvents {
    fn on_connect(&self, code: ConnectCode) {
        lock(&self.connects).push(code);
    }

    fn on_disconnect(&self, code: i32) {
        lock(&self.disconnects).push(code);
    }

    fn on_message(&self, message: InboundMessage) {
        lock(&self.messages).push(message);
    }

    fn on_subscribe(&self, message_id: u16, granted_qos: &[u8]) {
        lock(&self.subscribes).push((message_id, granted_qos.to_vec()));
    }

    fn on_publish(&self, message_id: u16) {
        lock(&self.publishes).push(message_id);
    }

    fn on_log(&self, level: LogLevel, message: &str) {
        lock(&self.logs).push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_calls() {
        let transport = MockTransport::new();

        transport.configure("user", "pass");
        transport.set_keepalive(30);
        transport.connect_async("host", 1883, 30).unwrap();
        let sub = transport.subscribe("a/b", QoS::ExactlyOnce).unwrap();
        let publ = transport
            .publish("a/b", Bytes::from_static(b"x"), QoS::AtMostOnce, true)
            .unwrap();
        transport.disconnect().unwrap();

        assert_eq!(transport.configured(), Some(("user".into(), "pass".into())));
        assert_eq!(transport.keepalive(), Some(30));
        assert_eq!(transport.connect_calls(), vec![("host".to_string(), 1883, 30)]);
        assert_eq!(sub.message_id, Some(1));
        assert_eq!(publ.message_id, Some(2));
        assert!(transport.publications()[0].retain);
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[test]
    fn test_mock_failures_and_heal() {
        let transport = MockTransport::new();
        transport.fail_connect("boom");
        transport.fail_disconnect("boom");
        transport.set_publish_code(RequestCode::QueueFull);

        assert!(transport.connect_async("h", 1, 1).is_err());
        assert!(transport.disconnect().is_err());
        let receipt = transport
            .publish("t", Bytes::new(), QoS::AtMostOnce, false)
            .unwrap();
        assert_eq!(receipt.code, RequestCode::QueueFull);

        transport.heal();
        assert!(transport.connect_async("h", 1, 1).is_ok());
        assert!(transport.disconnect().is_ok());
    }

    #[test]
    fn test_fire_reaches_registered_handler() {
        let transport = MockTransport::new();
        let events = Arc::new(RecordingEvents::default());

        // Firing with no handler is a no-op
        transport.fire_connect(ConnectCode::Accepted);

        transport.set_event_handler(events.clone());
        transport.fire_connect(ConnectCode::Accepted);
        transport.fire_subscribe(1, &[2]);
        transport.fire_publish(2);
        transport.fire_log(LogLevel::Notice, "hello");
        transport.fire_disconnect(0);

        assert_eq!(events.connects(), vec![ConnectCode::Accepted]);
        assert_eq!(events.subscribes(), vec![(1, vec![2])]);
        assert_eq!(events.publishes(), vec![2]);
        assert_eq!(events.logs(), vec![(LogLevel::Notice, "hello".to_string())]);
        assert_eq!(events.disconnects(), vec![0]);
    }
}
